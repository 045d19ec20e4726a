//! Authentication module for managing the client session and its credentials.
//!
//! This module provides:
//! - `SessionManager`: the session state machine (login, logout, bootstrap, refresh)
//! - `TokenRefresher`: the single refresh-token exchange
//! - `PersistedStore`: durable credential storage (`MemoryStore`, `FileStore`, `KeyringStore`)

pub mod credentials;
pub mod refresher;
pub mod session;
pub mod store;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use credentials::KeyringStore;
pub use refresher::{TokenRefresher, REFRESH_PATH};
pub use session::{Session, SessionManager, SessionPhase};
pub use store::{FileStore, MemoryStore, PersistedRecord, PersistedStore};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
