//! Durable key/value storage for session credentials.
//!
//! The record is three fixed keys (`access_token`, `refresh_token`, `user`)
//! written together and deleted together. `PersistedRecord` is the typed view
//! of those keys; `PersistedStore` is the raw storage each back end provides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::Profile;

use super::lock;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const USER_KEY: &str = "user";

/// Every key owned by the session record
pub const SESSION_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY];

/// Storage file name in the storage directory
const STORAGE_FILE: &str = "storage.json";

pub trait PersistedStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key, attempting all of them before reporting the first failure.
    fn clear(&self, keys: &[&str]) -> Result<()> {
        let mut first_err = None;
        for key in keys {
            if let Err(e) = self.remove(key) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Typed mirror of the persisted session keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedRecord {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<Profile>,
}

impl PersistedRecord {
    pub fn load(store: &dyn PersistedStore) -> Result<Self> {
        let access_token = store.get(ACCESS_TOKEN_KEY)?.filter(|t| !t.is_empty());
        let refresh_token = store.get(REFRESH_TOKEN_KEY)?.filter(|t| !t.is_empty());
        let user = match store.get(USER_KEY)? {
            Some(raw) => match serde_json::from_str::<Profile>(&raw) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    warn!(error = %e, "Ignoring unreadable persisted user record");
                    None
                }
            },
            None => None,
        };
        Ok(Self {
            access_token,
            refresh_token,
            user,
        })
    }

    /// Write every key; absent values are removed so the store never holds a stale mix.
    pub fn save(&self, store: &dyn PersistedStore) -> Result<()> {
        match self.access_token {
            Some(ref token) => store.set(ACCESS_TOKEN_KEY, token)?,
            None => store.remove(ACCESS_TOKEN_KEY)?,
        }
        match self.refresh_token {
            Some(ref token) => store.set(REFRESH_TOKEN_KEY, token)?,
            None => store.remove(REFRESH_TOKEN_KEY)?,
        }
        match self.user {
            Some(ref user) => {
                let raw = serde_json::to_string(user).context("Failed to encode user record")?;
                store.set(USER_KEY, &raw)?;
            }
            None => store.remove(USER_KEY)?,
        }
        Ok(())
    }

    pub fn clear(store: &dyn PersistedStore) -> Result<()> {
        store.clear(&SESSION_KEYS)
    }
}

/// In-process store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl PersistedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// The file is read once at open and rewritten in full on every mutation.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(storage_dir: &Path) -> Result<Self> {
        let path = storage_dir.join(STORAGE_FILE);
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read storage file")?;
            match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    // Rewritten on the next mutation
                    warn!(path = %path.display(), error = %e, "Ignoring unreadable storage file");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write storage file")?;
        Ok(())
    }
}

impl PersistedStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.write(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.write(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> PersistedRecord {
        PersistedRecord {
            access_token: Some("T1".into()),
            refresh_token: Some("R1".into()),
            user: Some(Profile {
                name: Some("A".into()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_record_save_and_load() {
        let store = MemoryStore::new();
        sample_record().save(&store).unwrap();

        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("T1"));
        assert_eq!(store.get(USER_KEY).unwrap().as_deref(), Some(r#"{"name":"A"}"#));
        assert_eq!(PersistedRecord::load(&store).unwrap(), sample_record());
    }

    #[test]
    fn test_record_save_removes_absent_values() {
        let store = MemoryStore::new();
        sample_record().save(&store).unwrap();

        let partial = PersistedRecord {
            access_token: Some("T2".into()),
            ..Default::default()
        };
        partial.save(&store).unwrap();

        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(USER_KEY).unwrap(), None);
    }

    #[test]
    fn test_unreadable_user_is_treated_as_absent() {
        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "T1").unwrap();
        store.set(USER_KEY, "{not json").unwrap();

        let record = PersistedRecord::load(&store).unwrap();
        assert_eq!(record.access_token.as_deref(), Some("T1"));
        assert!(record.user.is_none());
    }

    #[test]
    fn test_clear_removes_all_session_keys() {
        let store = MemoryStore::new();
        sample_record().save(&store).unwrap();
        PersistedRecord::clear(&store).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::open(dir.path()).unwrap();
            sample_record().save(&store).unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(PersistedRecord::load(&reopened).unwrap(), sample_record());

        PersistedRecord::clear(&reopened).unwrap();
        let cleared = FileStore::open(dir.path()).unwrap();
        assert_eq!(PersistedRecord::load(&cleared).unwrap(), PersistedRecord::default());
    }

    #[test]
    fn test_file_store_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STORAGE_FILE), "{not json").unwrap();

        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(PersistedRecord::load(&store).unwrap(), PersistedRecord::default());

        sample_record().save(&store).unwrap();
        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(PersistedRecord::load(&reopened).unwrap(), sample_record());
    }

    #[test]
    fn test_file_store_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FileStore::open(&nested).unwrap();
        store.set(ACCESS_TOKEN_KEY, "T1").unwrap();
        assert!(store.path().exists());
    }
}
