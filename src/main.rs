use std::time::Duration;
use tracing::{error, info, warn};

use wallet_tx_sync::{EngineConfig, SyncEngine, SyncError};

const DEFAULT_LISTEN_SECS: u64 = 30;

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let mut args = std::env::args().skip(1);
	let Some(address) = args.next() else {
		error!("Usage: wallet-tx-sync <address> [switch-address]");
		std::process::exit(2);
	};
	let switch_to = args.next();

	if let Err(e) = run(&address, switch_to.as_deref()).await {
		error!("Transaction sync failed: {}", e);
		std::process::exit(1);
	}
}

async fn run(address: &str, switch_to: Option<&str>) -> Result<(), SyncError> {
	info!("Starting transaction sync service");

	let config = EngineConfig::from_env()?;
	info!("Using node {} ({})", config.rest_url, config.ws_url);

	let listen = listen_duration();
	let engine = SyncEngine::from_config(config)?;

	engine.initialize(address).await?;
	report(&engine).await;
	tokio::time::sleep(listen).await;

	if let Some(next) = switch_to {
		engine.switch_account(next).await?;
		report(&engine).await;
		tokio::time::sleep(listen).await;
	}

	report(&engine).await;
	engine.uninitialize().await?;
	info!("Transaction sync service stopped");
	Ok(())
}

fn listen_duration() -> Duration {
	match std::env::var("WALLET_SYNC_LISTEN_SECS") {
		Ok(value) => match value.parse() {
			Ok(secs) => Duration::from_secs(secs),
			Err(e) => {
				warn!("Ignoring WALLET_SYNC_LISTEN_SECS {:?}: {}", value, e);
				Duration::from_secs(DEFAULT_LISTEN_SECS)
			}
		},
		Err(_) => Duration::from_secs(DEFAULT_LISTEN_SECS),
	}
}

async fn report(engine: &SyncEngine) {
	let status = engine.status().await;
	let snapshot = engine.snapshot().await;

	info!(
		"Account {}: {} partial, {} unconfirmed, {} confirmed",
		status.address.as_deref().unwrap_or("-"),
		snapshot.partial.len(),
		snapshot.unconfirmed.len(),
		snapshot.confirmed.len()
	);
	if let Some(account) = &status.account {
		info!(
			"Account height {:?}, public key {}",
			account.address_height,
			account.public_key.as_deref().unwrap_or("unknown")
		);
	}
	for tx in snapshot.confirmed.iter().take(5) {
		info!("  {} at height {:?}", tx.hash, tx.height);
	}
}
