//! Key-value cache access.
//!
//! The job only needs four hash-style operations, so the cache is modelled as
//! a [`HashStore`]. [`RedisStore`] talks to the real server; [`MemoryStore`]
//! keeps everything in process and backs the test suite.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::SyncResult;

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Field mapping of one hash record.
pub type HashFields = HashMap<String, String>;

#[async_trait]
pub trait HashStore: Send + Sync {
    /// All keys matching a glob-style `pattern`, sorted and without duplicates.
    async fn scan_keys(&self, pattern: &str) -> SyncResult<Vec<String>>;

    /// All fields of the hash at `key`. Empty when the key does not exist.
    async fn hash_get_all(&self, key: &str) -> SyncResult<HashFields>;

    /// Set the given fields, leaving every other field untouched.
    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> SyncResult<()>;

    /// Remove the given fields. Missing fields are ignored.
    async fn hash_delete(&self, key: &str, fields: &[&str]) -> SyncResult<()>;
}
