//! Persistence capability for cached lists, snapshots and notifications.
//!
//! # Responsibility
//! - Define the key/value blob store every component persists through.
//! - Own key naming so each component writes only its own namespace.
//! - Decode cached JSON, resetting corrupt namespaces to their default.
//!
//! # Invariants
//! - Writes are whole-blob replacements; readers never see partial blobs.
//! - A corrupt blob never crashes a component; it is logged and dropped.

use log::{error, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard};

use crate::model::book::ListType;

mod memory;
pub mod migrations;
mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

pub type StorageResult<T> = Result<T, StorageError>;

/// Key of the notification list namespace.
pub const NOTIFICATIONS_KEY: &str = "notifications/items";
/// Key of the notification preference set.
pub const PREFERENCES_KEY: &str = "notifications/preferences";
/// Key of the last known push permission state.
pub const PERMISSION_KEY: &str = "notifications/permission";

/// Key of the removals whose remote delete is not yet confirmed.
pub const PENDING_DELETES_KEY: &str = "pending/deletes";

/// Prefix shared by every availability snapshot key.
pub const TRACKING_PREFIX: &str = "tracking/";

/// Returns the storage key of one list.
pub fn list_key(list: ListType) -> String {
    format!("lists/{}", list.as_str())
}

/// Returns the storage key of the snapshot set of one tracked item.
pub fn tracking_key(external_id: &str) -> String {
    format!("{TRACKING_PREFIX}{external_id}")
}

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "cache serialization failed: {err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "cache schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Durable key/value store for JSON text blobs.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, blob: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Returns all keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}

/// Reads and decodes one namespace, falling back to `T::default()`.
///
/// Corrupt blobs are removed so the namespace starts clean on next write.
pub fn load_or_default<T>(storage: &dyn Storage, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let blob = match storage.get(key) {
        Ok(Some(blob)) => blob,
        Ok(None) => return T::default(),
        Err(err) => {
            error!(
                "event=cache_read module=storage status=error key={} error={}",
                key, err
            );
            return T::default();
        }
    };

    match serde_json::from_str::<T>(&blob) {
        Ok(value) => value,
        Err(err) => {
            warn!(
                "event=cache_reset module=storage status=corrupt key={} error={}",
                key, err
            );
            if let Err(remove_err) = storage.remove(key) {
                error!(
                    "event=cache_reset module=storage status=error key={} error={}",
                    key, remove_err
                );
            }
            T::default()
        }
    }
}

/// Encodes and writes one namespace as a whole-blob replacement.
pub fn save_json<T>(storage: &dyn Storage, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let blob = serde_json::to_string(value)?;
    storage.set(key, &blob)
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::{list_key, load_or_default, save_json, tracking_key, MemoryStorage, Storage};
    use crate::model::book::ListType;
    use std::collections::BTreeMap;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(list_key(ListType::Reserved), "lists/reserved");
        assert_eq!(tracking_key("abc"), "tracking/abc");
    }

    #[test]
    fn corrupt_blob_resets_to_default_and_is_removed() {
        let storage = MemoryStorage::new();
        storage.set("lists/wishlist", "{not json").unwrap();

        let loaded: Vec<String> = load_or_default(&storage, "lists/wishlist");
        assert!(loaded.is_empty());
        assert!(storage.get("lists/wishlist").unwrap().is_none());
    }

    #[test]
    fn save_then_load_returns_value() {
        let storage = MemoryStorage::new();
        let mut value = BTreeMap::new();
        value.insert("North Branch".to_string(), 2_u32);
        save_json(&storage, "tracking/abc", &value).unwrap();

        let loaded: BTreeMap<String, u32> = load_or_default(&storage, "tracking/abc");
        assert_eq!(loaded, value);
    }
}
