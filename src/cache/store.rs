//! The key-value store boundary.
//!
//! The cache layer talks to its backing store only through
//! [`KeyValueStore`]. Any operation may fail or the store may be down
//! entirely; implementations report that through [`StoreError`] and the
//! cache layer decides what to do with it.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Remaining lifetime of a key, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key exists and expires after this long.
    Expires(Duration),
    /// The key exists without an expiry (Redis `-1`).
    NoExpiry,
    /// The key does not exist (Redis `-2`).
    Missing,
}

impl Ttl {
    /// Interpret a Redis `TTL` reply.
    pub fn from_redis_seconds(seconds: i64) -> Self {
        match seconds {
            -1 => Self::NoExpiry,
            s if s < 0 => Self::Missing,
            s => Self::Expires(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// The Redis `TTL` encoding of this value.
    pub fn as_redis_seconds(self) -> i64 {
        match self {
            Self::Expires(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            Self::NoExpiry => -1,
            Self::Missing => -2,
        }
    }

    pub fn remaining(self) -> Option<Duration> {
        match self {
            Self::Expires(d) => Some(d),
            _ => None,
        }
    }
}

/// An external key-value store with per-key expiry.
///
/// Values are opaque strings (the cache layer stores JSON). Glob patterns
/// follow Redis `SCAN MATCH` syntax.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Delete `keys`, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    async fn ttl(&self, key: &str) -> StoreResult<Ttl>;

    /// Fetch several keys at once; the result is positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// All keys matching a glob pattern.
    async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>>;
}
