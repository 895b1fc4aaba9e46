use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

pub const TOKEN_KEY: &str = "token";
pub const USER_KEY: &str = "user";
pub const LAST_DASHBOARD_VIEW_KEY: &str = "lastDashboardView";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("persistent storage is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to write `{key}`: {message}")]
    Write { key: String, message: String },
    #[error("failed to remove `{key}`: {message}")]
    Remove { key: String, message: String },
}

/// Synchronous string key/value store that survives reloads.
pub trait PersistentKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-local [`PersistentKv`] used by tests and headless hosts.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }

    /// Sorted copy of every entry.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistentKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.lock().remove(key);
        Ok(())
    }
}

/// Reads `key`, logging and swallowing backend failures.
pub(crate) fn read_or_absent(kv: &dyn PersistentKv, key: &str) -> Option<String> {
    match kv.get(key) {
        Ok(value) => value.filter(|value| !value.trim().is_empty()),
        Err(error) => {
            tracing::warn!(key, %error, "persistent storage read failed");
            None
        }
    }
}

pub(crate) fn write_logged(kv: &dyn PersistentKv, key: &str, value: &str) {
    if let Err(error) = kv.set(key, value) {
        tracing::warn!(key, %error, "persistent storage write failed");
    }
}

pub(crate) fn remove_logged(kv: &dyn PersistentKv, key: &str) {
    if let Err(error) = kv.remove(key) {
        tracing::warn!(key, %error, "persistent storage remove failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kv_set_get_remove() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get(TOKEN_KEY).expect("get"), None);

        kv.set(TOKEN_KEY, "tok-1").expect("set");
        assert_eq!(kv.get(TOKEN_KEY).expect("get"), Some("tok-1".to_string()));

        kv.remove(TOKEN_KEY).expect("remove");
        kv.remove(TOKEN_KEY).expect("second remove is a no-op");
        assert!(kv.snapshot().is_empty());
    }

    #[test]
    fn read_or_absent_treats_blank_values_as_missing() {
        let kv = MemoryKv::with_entries([(TOKEN_KEY, "   "), (USER_KEY, "{}")]);
        assert_eq!(read_or_absent(&kv, TOKEN_KEY), None);
        assert_eq!(read_or_absent(&kv, USER_KEY), Some("{}".to_string()));
    }
}
