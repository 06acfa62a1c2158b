//! Account transaction synchronization against a node REST gateway and websocket push channel.

pub mod api;
pub mod config;
pub mod wallet;

pub use config::EngineConfig;
pub use wallet::{SyncEngine, SyncError};
