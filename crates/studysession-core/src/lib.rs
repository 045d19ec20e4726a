//! Client session core for the study platform.
//!
//! Establishes, persists, renews, and tears down an authenticated session
//! against the study API, and keeps it alive with a heartbeat:
//!
//! - [`auth::SessionManager`]: login, logout, bootstrap, single-flight token refresh
//! - [`api::RequestGateway`]: bearer injection plus one refresh-and-replay on 401
//! - [`heartbeat::HeartbeatScheduler`]: interval pings and a teardown beacon
//! - [`auth::PersistedStore`]: file, keychain, or in-memory credential storage

pub mod api;
pub mod auth;
pub mod config;
pub mod heartbeat;
pub mod models;
pub mod notify;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Result;

pub use api::{ApiError, HttpClient, RequestGateway};
pub use auth::{SessionManager, SessionPhase};
pub use config::{Config, StoreBackend};
pub use heartbeat::{HeartbeatHandle, HeartbeatScheduler};
pub use notify::{Notice, NoticeLevel, Notifier};

use auth::{FileStore, KeyringStore, MemoryStore, PersistedStore};

/// Open the credential store selected in the config.
pub fn open_store(config: &Config) -> Result<Arc<dyn PersistedStore>> {
    let store: Arc<dyn PersistedStore> = match config.store {
        StoreBackend::File => Arc::new(FileStore::open(&config.storage_dir()?)?),
        StoreBackend::Keyring => Arc::new(KeyringStore::new()),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

/// Wire up the HTTP transport, the configured store, and a session manager.
pub fn connect(config: &Config, notifier: Arc<dyn Notifier>) -> Result<(Arc<SessionManager>, RequestGateway)> {
    let transport = Arc::new(HttpClient::new(config)?);
    let store = open_store(config)?;
    let session = SessionManager::new(transport, store, notifier)?;
    let gateway = RequestGateway::new(Arc::clone(&session));
    Ok((session, gateway))
}
