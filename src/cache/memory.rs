//! In-process [`KeyValueStore`] backed by moka.
//!
//! Useful as a single-process cache and as the store in tests. Expiry is
//! tracked per entry on the tokio clock, so paused-time tests can move
//! entries through their fresh and stale windows; moka's own expiry only
//! reclaims memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use moka::Expiry;
use tokio::time::Instant;

use super::pattern::glob_match;
use super::store::{KeyValueStore, Ttl};
use crate::error::{StoreError, StoreResult};

/// Default maximum number of entries.
const DEFAULT_MAX_ENTRIES: u64 = 10_000;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    ttl: Duration,
    expires_at: Instant,
}

impl StoredValue {
    fn remaining(&self) -> Option<Duration> {
        let remaining = self.expires_at.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }
}

struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: StdInstant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: StdInstant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-memory store with Redis-like semantics.
pub struct MemoryStore {
    entries: moka::sync::Cache<String, StoredValue>,
    available: AtomicBool,
}

impl MemoryStore {
    /// Create a store with the default capacity (10,000 entries).
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max: u64) -> Self {
        let entries = moka::sync::Cache::builder()
            .max_capacity(max)
            .expire_after(PerEntryExpiry)
            .build();
        Self {
            entries,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    fn check(&self) -> StoreResult<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store marked unavailable".into()))
        }
    }

    /// Live entry for `key`, dropping it if it has expired.
    fn live(&self, key: &str) -> Option<StoredValue> {
        let entry = self.entries.get(key)?;
        if entry.remaining().is_some() {
            Some(entry)
        } else {
            self.entries.invalidate(key);
            None
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check()?;
        Ok(self.live(key).map(|e| e.value))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        self.check()?;
        if ttl.is_zero() {
            self.entries.invalidate(key);
            return Ok(());
        }
        self.entries.insert(
            key.to_owned(),
            StoredValue {
                value: value.to_owned(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        self.check()?;
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|entry| entry.remaining().is_some())
            .count();
        Ok(removed as u64)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Ttl> {
        self.check()?;
        Ok(self
            .live(key)
            .and_then(|e| e.remaining())
            .map_or(Ttl::Missing, |remaining| {
                // Redis reports whole seconds, rounding up a partial one
                let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
                Ttl::Expires(Duration::from_secs(secs))
            }))
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<String>>> {
        self.check()?;
        Ok(keys
            .iter()
            .map(|key| self.live(key).map(|e| e.value))
            .collect())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.live(key).is_some())
    }

    async fn keys_matching(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check()?;
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(key, entry)| entry.remaining().is_some() && glob_match(pattern, key))
            .map(|(key, _)| String::clone(&key))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_del() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("a", "1", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(store.exists("a").await.unwrap());
        assert_eq!(store.get("b").await.unwrap(), None);

        let removed = store.del(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists("a").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_on_the_tokio_clock() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("k", "v", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            store.ttl("k").await.unwrap(),
            Ttl::Expires(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_millis(3_500)).await;
        assert_eq!(
            store.ttl("k").await.unwrap(),
            Ttl::Expires(Duration::from_secs(7))
        );

        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(store.ttl("k").await.unwrap(), Ttl::Missing);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mget_is_positional() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_expiry("x", "1", ttl).await.unwrap();
        store.set_with_expiry("z", "3", ttl).await.unwrap();
        let values = store
            .mget(&["x".into(), "y".into(), "z".into()])
            .await
            .unwrap();
        assert_eq!(values, vec![Some("1".into()), None, Some("3".into())]);
    }

    #[tokio::test]
    async fn keys_matching_uses_globs() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        for key in ["models:1", "models:2", "rankings:1"] {
            store.set_with_expiry(key, "{}", ttl).await.unwrap();
        }
        assert_eq!(
            store.keys_matching("models:*").await.unwrap(),
            vec!["models:1".to_owned(), "models:2".to_owned()]
        );
        assert_eq!(store.keys_matching("*:1").await.unwrap().len(), 2);
        assert!(store.keys_matching("search:*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_operation() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(!store.is_available().await);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(
            store
                .set_with_expiry("k", "v", Duration::from_secs(1))
                .await
                .is_err()
        );
        assert!(store.keys_matching("*").await.is_err());

        store.set_available(true);
        assert!(store.get("k").await.unwrap().is_none());
    }
}
