use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{HashFields, HashStore};
use crate::errors::{SyncError, SyncResult};

/// In-process [`HashStore`].
///
/// Useful for tests and for running the file passes without a cache server.
/// Failures can be injected with [`MemoryStore::set_unavailable`] and
/// [`MemoryStore::fail_on_key`], slow commands with [`MemoryStore::delay_key`].
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, HashFields>>,
    unavailable: RwLock<bool>,
    failing_keys: RwLock<HashSet<String>>,
    delayed_keys: RwLock<HashMap<String, Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a whole hash.
    pub fn insert_hash<I, K, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        if let Ok(mut data) = self.data.write() {
            data.insert(
                key.to_string(),
                fields
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            );
        }
    }

    /// Snapshot of one hash.
    pub fn get(&self, key: &str) -> Option<HashFields> {
        self.data.read().ok()?.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every operation fail as if the server were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut flag) = self.unavailable.write() {
            *flag = unavailable;
        }
    }

    /// Make reads and writes of one key fail.
    pub fn fail_on_key(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(key.to_string());
        }
    }

    /// Make reads and writes of one key take `delay` before answering.
    pub fn delay_key(&self, key: &str, delay: Duration) {
        if let Ok(mut keys) = self.delayed_keys.write() {
            keys.insert(key.to_string(), delay);
        }
    }

    fn delay_for(&self, key: &str) -> Option<Duration> {
        self.delayed_keys
            .read()
            .ok()
            .and_then(|keys| keys.get(key).copied())
    }

    fn check(&self, key: Option<&str>) -> SyncResult<()> {
        if self.unavailable.read().map(|f| *f).unwrap_or(false) {
            return Err(SyncError::Cache("store unavailable".to_string()));
        }
        if let Some(key) = key {
            let failing = self
                .failing_keys
                .read()
                .map(|keys| keys.contains(key))
                .unwrap_or(false);
            if failing {
                return Err(SyncError::Cache(format!("command failed for {key}")));
            }
        }
        Ok(())
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, BTreeMap<String, HashFields>>> {
        self.data
            .read()
            .map_err(|_| SyncError::Cache("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, BTreeMap<String, HashFields>>> {
        self.data
            .write()
            .map_err(|_| SyncError::Cache("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl HashStore for MemoryStore {
    async fn scan_keys(&self, pattern: &str) -> SyncResult<Vec<String>> {
        self.check(None)?;
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| SyncError::Cache(format!("invalid pattern '{pattern}': {e}")))?;
        let data = self.read()?;
        Ok(data
            .keys()
            .filter(|key| matcher.matches(key))
            .cloned()
            .collect())
    }

    async fn hash_get_all(&self, key: &str) -> SyncResult<HashFields> {
        self.check(Some(key))?;
        if let Some(delay) = self.delay_for(key) {
            tokio::time::sleep(delay).await;
        }
        Ok(self.read()?.get(key).cloned().unwrap_or_default())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> SyncResult<()> {
        self.check(Some(key))?;
        if let Some(delay) = self.delay_for(key) {
            tokio::time::sleep(delay).await;
        }
        if fields.is_empty() {
            return Ok(());
        }
        let mut data = self.write()?;
        let hash = data.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> SyncResult<()> {
        self.check(Some(key))?;
        let mut data = self.write()?;
        let now_empty = match data.get_mut(key) {
            Some(hash) => {
                for field in fields {
                    hash.remove(*field);
                }
                hash.is_empty()
            }
            None => false,
        };
        // Redis drops a hash once its last field is gone.
        if now_empty {
            data.remove(key);
        }
        Ok(())
    }
}
