use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::debug;

use super::{HashFields, HashStore};
use crate::config::CacheConfig;
use crate::errors::SyncResult;

/// Redis-backed [`HashStore`].
///
/// The multiplexed connection is opened on first use and shared by every later
/// command issued through this store.
pub struct RedisStore {
    client: redis::Client,
    conn: OnceCell<MultiplexedConnection>,
    scan_count: u32,
}

impl RedisStore {
    pub fn from_config(config: &CacheConfig) -> SyncResult<Self> {
        let client = redis::Client::open(config.url())?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            scan_count: config.scan_count.max(1),
        })
    }

    async fn conn(&self) -> SyncResult<MultiplexedConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                debug!("Opening Redis connection");
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl HashStore for RedisStore {
    async fn scan_keys(&self, pattern: &str) -> SyncResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut keys = BTreeSet::new();
        let mut cursor: u64 = 0;

        // SCAN instead of KEYS so large keyspaces don't block the server.
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys.into_iter().collect())
    }

    async fn hash_get_all(&self, key: &str) -> SyncResult<HashFields> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> =
            redis::cmd("HGETALL").arg(key).query_async(&mut conn).await?;
        Ok(fields)
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> SyncResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> SyncResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}
