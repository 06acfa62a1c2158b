//!
//! REST client for the node API.
//!
//! This module provides an async client for the account, transaction and block endpoints of the
//! node REST gateway. Transient failures (timeouts, refused connections, 5xx responses) are
//! retried with exponential backoff up to a configurable budget; everything else is returned to
//! the caller as an `ApiError`.

use super::services::{AccountService, BlockService};
use super::types::*;
use crate::config::EngineConfig;

use backoff::{ExponentialBackoff, future::retry};
use futures_util::future::join_all;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Node REST client
#[derive(Clone)]
pub struct HttpApiClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the REST gateway, without a trailing slash.
	rest_url: String,
	/// Total time budget for retrying a single request.
	retry_max_elapsed: Duration,
}

impl HttpApiClient {
	/// Create a new REST client.
	///
	/// # Arguments
	/// * `rest_url` - Base URL of the REST gateway.
	/// * `request_timeout` - Timeout applied to every HTTP request.
	/// * `retry_max_elapsed` - Time budget for retrying transient failures.
	pub fn new(
		rest_url: String,
		request_timeout: Duration,
		retry_max_elapsed: Duration,
	) -> Result<Self, ApiError> {
		let http_client = Client::builder().timeout(request_timeout).build()?;

		Ok(Self {
			http_client,
			rest_url: rest_url.trim_end_matches('/').to_string(),
			retry_max_elapsed,
		})
	}

	pub fn from_config(config: &EngineConfig) -> Result<Self, ApiError> {
		Self::new(
			config.rest_url.clone(),
			config.request_timeout,
			config.retry_max_elapsed,
		)
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.rest_url, path.trim_start_matches('/'))
	}

	/// Execute a GET request and return the decoded JSON body.
	///
	/// # Errors
	/// `NotFound` for 404 responses, `StatusError` for other non-success statuses once the
	/// retry budget is spent, `HttpError` for transport and decoding failures.
	pub async fn get_json(
		&self,
		path: &str,
		query: &[(&str, String)],
	) -> Result<serde_json::Value, ApiError> {
		let url = self.url(path);
		let policy = ExponentialBackoff {
			max_elapsed_time: Some(self.retry_max_elapsed),
			..ExponentialBackoff::default()
		};

		retry(policy, || async {
			let response = self
				.http_client
				.get(&url)
				.query(query)
				.send()
				.await
				.map_err(|e| {
					if e.is_timeout() || e.is_connect() {
						warn!("Transient error requesting {}: {}", url, e);
						backoff::Error::transient(ApiError::HttpError(e))
					} else {
						backoff::Error::permanent(ApiError::HttpError(e))
					}
				})?;

			let status = response.status();
			if status == StatusCode::NOT_FOUND {
				return Err(backoff::Error::permanent(ApiError::NotFound(url.clone())));
			}
			if !status.is_success() {
				let body = response.text().await.unwrap_or_default();
				let error = ApiError::StatusError {
					status: status.as_u16(),
					body,
				};
				return Err(if status.is_server_error() {
					warn!("Server error requesting {}: {}", url, error);
					backoff::Error::transient(error)
				} else {
					backoff::Error::permanent(error)
				});
			}

			response
				.json::<serde_json::Value>()
				.await
				.map_err(|e| backoff::Error::permanent(ApiError::HttpError(e)))
		})
		.await
	}
}

#[async_trait::async_trait]
impl AccountService for HttpApiClient {
	async fn get_info(&self, address: &str) -> Result<AccountInfo, ApiError> {
		let response = self.get_json(&format!("accounts/{}", address), &[]).await?;
		let account = response.get("account").cloned().ok_or(ApiError::NoData)?;
		let info: AccountInfo = serde_json::from_value(account)?;

		debug!("Fetched account info for {}", address);
		Ok(info.normalized())
	}

	async fn get_transactions(&self, query: &PageQuery) -> Result<Vec<Transaction>, ApiError> {
		let mut params = vec![
			("address", query.address.clone()),
			("pageSize", query.page_size.to_string()),
			("order", "desc".to_string()),
		];
		if let Some(continuation_id) = &query.continuation_id {
			params.push(("offset", continuation_id.clone()));
		}

		let response = self
			.get_json(&format!("transactions/{}", query.group), &params)
			.await?;

		// Paginated gateways wrap records in `data`, older ones return the bare array
		let records = match response {
			serde_json::Value::Array(records) => serde_json::Value::Array(records),
			mut wrapped => wrapped
				.get_mut("data")
				.map(serde_json::Value::take)
				.ok_or(ApiError::NoData)?,
		};

		let records: Vec<TransactionDto> = serde_json::from_value(records)?;
		records
			.into_iter()
			.map(|record| record.into_transaction(query.group))
			.collect()
	}
}

#[async_trait::async_trait]
impl BlockService for HttpApiClient {
	async fn fetch_blocks(&self, heights: &[u64]) -> Result<(), ApiError> {
		let requests = heights.iter().map(|height| async move {
			let path = format!("blocks/{}", height);
			self.get_json(&path, &[]).await
		});
		let results = join_all(requests).await;

		let mut first_error = None;
		for (height, result) in heights.iter().zip(results) {
			match result {
				Ok(_) => debug!("Fetched block {}", height),
				Err(e) => {
					error!("Failed to fetch block {}: {}", height, e);
					first_error.get_or_insert(e);
				}
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::{Arc, Mutex};
	use tokio::io::{AsyncReadExt, AsyncWriteExt};
	use tokio::net::TcpListener;

	/// Minimal HTTP server answering every request from `respond(path)` and recording the paths.
	async fn serve(
		respond: fn(&str) -> (u16, String),
	) -> (String, Arc<Mutex<Vec<String>>>) {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let url = format!("http://{}", listener.local_addr().unwrap());
		let seen = Arc::new(Mutex::new(Vec::new()));

		let recorded = seen.clone();
		tokio::spawn(async move {
			loop {
				let Ok((mut socket, _)) = listener.accept().await else {
					break;
				};
				let recorded = recorded.clone();
				tokio::spawn(async move {
					let mut request = Vec::new();
					let mut buf = [0u8; 1024];
					while !request.windows(4).any(|w| w == b"\r\n\r\n") {
						match socket.read(&mut buf).await {
							Ok(0) | Err(_) => return,
							Ok(n) => request.extend_from_slice(&buf[..n]),
						}
					}
					let request = String::from_utf8_lossy(&request).to_string();
					let target = request.split(' ').nth(1).unwrap_or("/").to_string();
					recorded.lock().unwrap().push(target.clone());

					let path = target.split('?').next().unwrap_or("/").to_string();
					let (status, body) = respond(&path);
					let response = format!(
						"HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
						status,
						body.len(),
						body
					);
					let _ = socket.write_all(response.as_bytes()).await;
					let _ = socket.shutdown().await;
				});
			}
		});

		(url, seen)
	}

	fn client(url: String) -> HttpApiClient {
		HttpApiClient::new(url, Duration::from_secs(5), Duration::from_millis(200)).unwrap()
	}

	fn blocks_and_pages(path: &str) -> (u16, String) {
		match path {
			"/blocks/404" => (404, "{}".to_string()),
			p if p.starts_with("/blocks/") => (200, r#"{"block":{}}"#.to_string()),
			"/transactions/unconfirmed" => (
				200,
				r#"{"data":[{"id":"5f1","meta":{"hash":"H1","height":"12"},"transaction":{}}]}"#
					.to_string(),
			),
			"/accounts/TADDR" => (
				200,
				r#"{"account":{"address":"TADDR","addressHeight":"3","publicKey":"0000","mosaics":[]}}"#
					.to_string(),
			),
			_ => (404, "{}".to_string()),
		}
	}

	#[tokio::test]
	async fn fetch_blocks_requests_every_height() {
		let (url, seen) = serve(blocks_and_pages).await;
		let client = client(url);

		client.fetch_blocks(&[5, 7]).await.unwrap();

		let mut seen = seen.lock().unwrap().clone();
		seen.sort();
		assert_eq!(seen, vec!["/blocks/5", "/blocks/7"]);
	}

	#[tokio::test]
	async fn fetch_blocks_reports_a_missing_block() {
		let (url, seen) = serve(blocks_and_pages).await;
		let client = client(url);

		let result = client.fetch_blocks(&[9, 404]).await;

		assert!(matches!(result, Err(ApiError::NotFound(_))));
		assert_eq!(seen.lock().unwrap().len(), 2);
	}

	#[tokio::test]
	async fn transactions_are_read_from_wrapped_pages() {
		let (url, seen) = serve(blocks_and_pages).await;
		let client = client(url);

		let query = PageQuery::new(
			TransactionGroup::Unconfirmed,
			"TADDR",
			25,
			Some("5f0".to_string()),
		);
		let page = client.get_transactions(&query).await.unwrap();

		assert_eq!(page.len(), 1);
		assert_eq!(page[0].hash, "H1");
		assert_eq!(page[0].group, TransactionGroup::Unconfirmed);
		assert_eq!(page[0].height, Some(12));

		let target = seen.lock().unwrap()[0].clone();
		assert!(target.starts_with("/transactions/unconfirmed?"));
		assert!(target.contains("address=TADDR"));
		assert!(target.contains("pageSize=25"));
		assert!(target.contains("offset=5f0"));
	}

	#[tokio::test]
	async fn account_info_is_normalized() {
		let (url, _) = serve(blocks_and_pages).await;
		let info = client(url).get_info("TADDR").await.unwrap();

		assert_eq!(info.address, "TADDR");
		assert_eq!(info.address_height, Some(3));
		assert_eq!(info.public_key, None);
	}

	#[tokio::test]
	async fn unknown_account_is_not_found() {
		let (url, _) = serve(blocks_and_pages).await;
		let result = client(url).get_info("TOTHER").await;
		assert!(matches!(result, Err(ApiError::NotFound(_))));
	}
}
