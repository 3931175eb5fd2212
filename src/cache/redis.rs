//! Redis-backed [`KeyValueStore`].
//!
//! Keys are used as given; namespacing is the cache layer's job. One
//! multiplexed connection is opened lazily and shared; if connecting fails
//! the next operation tries again.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::debug;

use super::store::{KeyValueStore, Ttl};
use crate::error::StoreResult;

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: usize = 256;

pub struct RedisStore {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisStore {
    /// Parse `url` (`redis://host:port/db`). Does not connect.
    pub fn new(url: impl AsRef<str>) -> StoreResult<Self> {
        Ok(Self {
            client: redis::Client::open(url.as_ref())?,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!("opening redis connection");
                self.client.get_multiplexed_async_connection().await
            })
            .await?;
        Ok(conn.clone())
    }
}

/// `SET EX` takes whole seconds; round up and never send 0.
fn expiry_seconds(ttl: Duration) -> u64 {
    (ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn is_available(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, expiry_seconds(ttl)).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        Ok(conn.del(keys).await?)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Ttl> {
        let mut conn = self.connection().await?;
        let seconds: i64 = conn.ttl(key).await?;
        Ok(Ttl::from_redis_seconds(seconds))
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection().await?;
        Ok(conn.exists(key).await?)
    }

    async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let mut found = Vec::new();
        let mut cursor = "0".to_owned();
        loop {
            let (next_cursor, keys): (String, Vec<String>) = redis::cmd("SCAN")
                .arg(&cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            found.extend(keys);
            if next_cursor == "0" {
                break;
            }
            cursor = next_cursor;
        }
        // SCAN may return a key more than once
        found.sort();
        found.dedup();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_rounds_up() {
        assert_eq!(expiry_seconds(Duration::from_secs(300)), 300);
        assert_eq!(expiry_seconds(Duration::from_millis(1_500)), 2);
        assert_eq!(expiry_seconds(Duration::from_millis(10)), 1);
        assert_eq!(expiry_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(RedisStore::new("not a url").is_err());
        assert!(RedisStore::new("redis://127.0.0.1:6379/0").is_ok());
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable() {
        let store = RedisStore::new("redis://127.0.0.1:1/").unwrap();
        assert!(!store.is_available().await);
        assert!(store.get("k").await.is_err());
    }
}
