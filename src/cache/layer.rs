//! Cache-aside and stale-while-revalidate over a [`KeyValueStore`].
//!
//! The cache is an accelerator, never a dependency: every store failure is
//! logged, counted against the category's `errors` and then treated as a
//! miss (or as the operation's empty result). Only the loader's own error
//! ever reaches the caller.
//!
//! # Freshness
//!
//! [`CacheLayer::stale_while_revalidate`] writes entries with a
//! `fresh + stale` expiry. On read, a remaining TTL above `stale` means the
//! entry is still inside its fresh window. Anything else that still has a
//! value (including a key with no expiry at all) is stale: it is returned
//! immediately and a background task reloads it.
//!
//! # Concurrency
//!
//! There is no single-flight: concurrent misses on the same key each run
//! their loader, and the last write wins.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::metrics::{CacheMetrics, CacheMetricsRegistry, DEFAULT_CATEGORY};
use super::pattern::{escape, star_only};
use super::store::{KeyValueStore, Ttl};
use crate::config::CacheSettings;
use crate::telemetry;

/// Instrumented cache front for one store.
///
/// Cheap to clone; clones share the store and the metrics registry.
#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn KeyValueStore>,
    metrics: Arc<CacheMetricsRegistry>,
    key_prefix: String,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn KeyValueStore>, metrics: Arc<CacheMetricsRegistry>) -> Self {
        Self {
            store,
            metrics,
            key_prefix: String::new(),
        }
    }

    /// Build a layer using the prefix from `settings`.
    pub fn from_settings(
        store: Arc<dyn KeyValueStore>,
        metrics: Arc<CacheMetricsRegistry>,
        settings: &CacheSettings,
    ) -> Self {
        Self::new(store, metrics).key_prefix(&settings.key_prefix)
    }

    /// Namespace every key with `prefix`.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn metrics(&self) -> &Arc<CacheMetricsRegistry> {
        &self.metrics
    }

    /// Current counters for `category`.
    pub fn category_metrics(&self, category: &str) -> CacheMetrics {
        self.metrics.snapshot(category)
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // ========================================================================
    // Read-through policies
    // ========================================================================

    /// Return the cached value for `key`, or load, store and return it.
    ///
    /// - hit: `hits += 1`, loader not called
    /// - miss or unavailable store: `misses += 1`, loader called, result
    ///   stored with `ttl`
    /// - store error or unreadable entry: `errors += 1`, loader called
    ///
    /// A failed write after loading is logged and counted, never returned.
    pub async fn cache_aside<T, E, F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
        category: Option<&str>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let full_key = self.full_key(key);

        let store_up = self.store.is_available().await;
        if store_up {
            if let Some(value) = self.read::<T>(&full_key, category).await {
                debug!(key = %full_key, category, "cache hit");
                self.metrics.record_hit(category);
                return Ok(value);
            }
        } else {
            debug!(key = %full_key, category, store = self.store.name(), "cache store unavailable");
            self.metrics.record_miss(category);
        }

        let value = loader().await?;
        if store_up {
            self.write(&full_key, &value, ttl, category).await;
        }
        Ok(value)
    }

    /// Serve fresh entries directly, stale entries immediately with a
    /// background reload, and load synchronously only when nothing is cached.
    ///
    /// Entries are written with a `fresh_ttl + stale_ttl` expiry. The
    /// background reload never blocks the caller; if it fails the stale
    /// entry is left in place. Must be called from within a tokio runtime.
    pub async fn stale_while_revalidate<T, E, F, Fut>(
        &self,
        key: &str,
        loader: F,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        category: Option<&str>,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let full_key = self.full_key(key);
        let total_ttl = fresh_ttl + stale_ttl;

        let store_up = self.store.is_available().await;
        if store_up {
            if let Some(value) = self.read::<T>(&full_key, category).await {
                let fresh = match self.store.ttl(&full_key).await {
                    Ok(Ttl::Expires(remaining)) => remaining > stale_ttl,
                    Ok(Ttl::NoExpiry | Ttl::Missing) => false,
                    Err(e) => {
                        self.swallow("ttl", &full_key, category, &e);
                        false
                    }
                };
                self.metrics.record_hit(category);
                if fresh {
                    debug!(key = %full_key, category, "cache hit (fresh)");
                } else {
                    debug!(key = %full_key, category, "cache hit (stale), revalidating");
                    self.revalidate(full_key, loader, total_ttl, category);
                }
                return Ok(value);
            }
        } else {
            debug!(key = %full_key, category, store = self.store.name(), "cache store unavailable");
            self.metrics.record_miss(category);
        }

        let value = loader().await?;
        if store_up {
            self.write(&full_key, &value, total_ttl, category).await;
        }
        Ok(value)
    }

    /// Read and decode `full_key`, counting a miss or an error when there
    /// is no usable value.
    async fn read<T: DeserializeOwned>(&self, full_key: &str, category: &str) -> Option<T> {
        match self.store.get(full_key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    self.swallow("decode", full_key, category, &e);
                    None
                }
            },
            Ok(None) => {
                debug!(key = %full_key, category, "cache miss");
                self.metrics.record_miss(category);
                None
            }
            Err(e) => {
                self.swallow("get", full_key, category, &e);
                None
            }
        }
    }

    fn revalidate<T, E, F, Fut>(&self, full_key: String, loader: F, ttl: Duration, category: &str)
    where
        T: Serialize + Send + Sync + 'static,
        E: Display + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let layer = self.clone();
        let category = category.to_owned();
        tokio::spawn(async move {
            match loader().await {
                Ok(value) => {
                    if layer.write(&full_key, &value, ttl, &category).await {
                        info!(key = %full_key, category = %category, "background revalidation completed");
                        metrics::counter!(
                            telemetry::CACHE_REVALIDATIONS_TOTAL,
                            "category" => category,
                            "status" => "ok"
                        )
                        .increment(1);
                        return;
                    }
                }
                Err(e) => {
                    warn!(key = %full_key, category = %category, error = %e, "background revalidation failed; keeping stale entry");
                }
            }
            metrics::counter!(
                telemetry::CACHE_REVALIDATIONS_TOTAL,
                "category" => category,
                "status" => "error"
            )
            .increment(1);
        });
    }

    // ========================================================================
    // Direct primitives
    // ========================================================================

    /// Cached value for `key`; `None` on a miss, an unreadable entry or a
    /// store failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.available().await {
            return None;
        }
        let full_key = self.full_key(key);
        let value = self.read(&full_key, DEFAULT_CATEGORY).await;
        if value.is_some() {
            self.metrics.record_hit(DEFAULT_CATEGORY);
        }
        value
    }

    /// Store `value` under `key`; returns whether the write happened.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.available().await {
            return false;
        }
        self.write(&self.full_key(key), value, ttl, DEFAULT_CATEGORY)
            .await
    }

    /// Delete a single key, or every key matching a `*` pattern.
    ///
    /// `*` is the only wildcard here: `?` and `[` are matched literally, so
    /// keys such as `search?q=a` are removed exactly. A key containing a
    /// literal `*` can be removed with [`invalidate_multiple`](Self::invalidate_multiple).
    ///
    /// Returns the number of keys removed. A pattern with no matches
    /// returns 0 without issuing a delete.
    pub async fn invalidate(&self, key_or_pattern: &str) -> u64 {
        if !self.available().await {
            return 0;
        }
        let keys = if key_or_pattern.contains('*') {
            let pattern = self.full_pattern(&star_only(key_or_pattern));
            match self.store.keys_matching(&pattern).await {
                Ok(keys) => keys,
                Err(e) => {
                    self.swallow("keys", &pattern, DEFAULT_CATEGORY, &e);
                    return 0;
                }
            }
        } else {
            vec![self.full_key(key_or_pattern)]
        };
        self.delete(keys).await
    }

    /// Delete several exact keys in one batch.
    pub async fn invalidate_multiple<S: AsRef<str>>(&self, keys: &[S]) -> u64 {
        if !self.available().await {
            return 0;
        }
        let keys = keys.iter().map(|k| self.full_key(k.as_ref())).collect();
        self.delete(keys).await
    }

    /// Remaining lifetime of `key`; [`Ttl::Missing`] when the store cannot say.
    pub async fn ttl(&self, key: &str) -> Ttl {
        if !self.available().await {
            return Ttl::Missing;
        }
        let full_key = self.full_key(key);
        self.store.ttl(&full_key).await.unwrap_or_else(|e| {
            self.swallow("ttl", &full_key, DEFAULT_CATEGORY, &e);
            Ttl::Missing
        })
    }

    /// Fetch several keys, positionally aligned with `keys`. Entries that
    /// are missing or unreadable are `None`; a store failure yields all `None`.
    pub async fn mget<T: DeserializeOwned, S: AsRef<str>>(&self, keys: &[S]) -> Vec<Option<T>> {
        let empty = || -> Vec<Option<T>> { keys.iter().map(|_| None).collect() };
        if keys.is_empty() || !self.available().await {
            return empty();
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k.as_ref())).collect();
        let raw = match self.store.mget(&full_keys).await {
            Ok(raw) => raw,
            Err(e) => {
                self.swallow("mget", &full_keys.join(","), DEFAULT_CATEGORY, &e);
                return empty();
            }
        };
        full_keys
            .iter()
            .zip(raw)
            .map(|(full_key, raw)| {
                let raw = raw?;
                serde_json::from_str(&raw)
                    .map_err(|e| self.swallow("decode", full_key, DEFAULT_CATEGORY, &e))
                    .ok()
            })
            .collect()
    }

    pub async fn exists(&self, key: &str) -> bool {
        if !self.available().await {
            return false;
        }
        let full_key = self.full_key(key);
        self.store.exists(&full_key).await.unwrap_or_else(|e| {
            self.swallow("exists", &full_key, DEFAULT_CATEGORY, &e);
            false
        })
    }

    /// Keys matching `pattern`, with the layer's prefix stripped.
    pub async fn keys_by_pattern(&self, pattern: &str) -> Vec<String> {
        if !self.available().await {
            return Vec::new();
        }
        let full_pattern = self.full_pattern(pattern);
        match self.store.keys_matching(&full_pattern).await {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.key_prefix).map(str::to_owned))
                .collect(),
            Err(e) => {
                self.swallow("keys", &full_pattern, DEFAULT_CATEGORY, &e);
                Vec::new()
            }
        }
    }

    /// Pre-populate entries; returns how many were written.
    pub async fn warm<K, T, I>(&self, entries: I, ttl: Duration) -> usize
    where
        K: AsRef<str>,
        T: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        if !self.available().await {
            return 0;
        }
        let mut written = 0;
        for (key, value) in entries {
            if self
                .write(&self.full_key(key.as_ref()), &value, ttl, DEFAULT_CATEGORY)
                .await
            {
                written += 1;
            }
        }
        debug!(written, "cache warmed");
        written
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.key_prefix)
    }

    fn full_pattern(&self, pattern: &str) -> String {
        format!("{}{pattern}", escape(&self.key_prefix))
    }

    async fn available(&self) -> bool {
        let up = self.store.is_available().await;
        if !up {
            debug!(store = self.store.name(), "cache store unavailable");
        }
        up
    }

    async fn write<T: Serialize + ?Sized>(
        &self,
        full_key: &str,
        value: &T,
        ttl: Duration,
        category: &str,
    ) -> bool {
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.swallow("encode", full_key, category, &e);
                return false;
            }
        };
        match self.store.set_with_expiry(full_key, &encoded, ttl).await {
            Ok(()) => true,
            Err(e) => {
                self.swallow("set", full_key, category, &e);
                false
            }
        }
    }

    async fn delete(&self, keys: Vec<String>) -> u64 {
        if keys.is_empty() {
            return 0;
        }
        match self.store.del(&keys).await {
            Ok(removed) => {
                debug!(removed, requested = keys.len(), "cache invalidated");
                removed
            }
            Err(e) => {
                self.swallow("del", &keys.join(","), DEFAULT_CATEGORY, &e);
                0
            }
        }
    }

    fn swallow(&self, op: &str, key: &str, category: &str, error: &dyn Display) {
        warn!(
            store = self.store.name(),
            op,
            key,
            category,
            error = %error,
            "cache store error; continuing without cache"
        );
        self.metrics.record_error(category);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn layer() -> (CacheLayer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let layer = CacheLayer::new(store.clone(), Arc::new(CacheMetricsRegistry::new()));
        (layer, store)
    }

    #[tokio::test]
    async fn cache_aside_miss_then_hit() {
        let (layer, _) = layer();
        let ttl = Duration::from_secs(60);

        let first: Result<Vec<String>, String> = layer
            .cache_aside("models", || async { Ok(vec!["gpt".to_owned()]) }, ttl, Some("models"))
            .await;
        assert_eq!(first.unwrap(), vec!["gpt"]);

        let second: Result<Vec<String>, String> = layer
            .cache_aside("models", || async { Err("not called".to_owned()) }, ttl, Some("models"))
            .await;
        assert_eq!(second.unwrap(), vec!["gpt"]);

        let m = layer.category_metrics("models");
        assert_eq!((m.hits, m.misses, m.errors), (1, 1, 0));
    }

    #[tokio::test]
    async fn loader_error_propagates_and_nothing_is_stored() {
        let (layer, _) = layer();
        let out: Result<u32, &str> = layer
            .cache_aside("k", || async { Err("upstream down") }, Duration::from_secs(5), None)
            .await;
        assert_eq!(out, Err("upstream down"));
        assert!(!layer.exists("k").await);
    }

    #[tokio::test]
    async fn malformed_entry_is_an_error_not_a_hit() {
        let (layer, store) = layer();
        store
            .set_with_expiry("k", "{not json", Duration::from_secs(60))
            .await
            .unwrap();
        let out: Result<u32, String> = layer
            .cache_aside("k", || async { Ok(7) }, Duration::from_secs(60), None)
            .await;
        assert_eq!(out.unwrap(), 7);

        let m = layer.category_metrics(DEFAULT_CATEGORY);
        assert_eq!((m.hits, m.misses, m.errors), (0, 0, 1));
        assert_eq!(layer.get::<u32>("k").await, Some(7));
    }

    #[tokio::test]
    async fn unavailable_store_counts_a_miss_and_skips_the_write() {
        let (layer, store) = layer();
        store.set_available(false);
        let out: Result<String, String> = layer
            .cache_aside("k", || async { Ok("fresh".to_owned()) }, Duration::from_secs(60), None)
            .await;
        assert_eq!(out.unwrap(), "fresh");
        assert_eq!(layer.category_metrics(DEFAULT_CATEGORY).misses, 1);

        store.set_available(true);
        assert!(!layer.exists("k").await);
    }

    #[tokio::test]
    async fn prefix_namespaces_keys() {
        let (layer, store) = layer();
        let layer = layer.key_prefix("gw:");
        assert!(layer.set("models:1", &1, Duration::from_secs(60)).await);
        assert!(store.exists("gw:models:1").await.unwrap());
        assert_eq!(layer.keys_by_pattern("models:*").await, vec!["models:1"]);
        assert_eq!(layer.invalidate("models:*").await, 1);
    }

    #[tokio::test]
    async fn direct_primitives_degrade_when_unavailable() {
        let (layer, store) = layer();
        layer.set("a", &1, Duration::from_secs(60)).await;
        store.set_available(false);

        assert_eq!(layer.get::<u32>("a").await, None);
        assert!(!layer.set("a", &2, Duration::from_secs(60)).await);
        assert_eq!(layer.invalidate("a").await, 0);
        assert_eq!(layer.invalidate_multiple(&["a"]).await, 0);
        assert_eq!(layer.ttl("a").await, Ttl::Missing);
        assert_eq!(layer.mget::<u32, _>(&["a", "b"]).await, vec![None, None]);
        assert!(!layer.exists("a").await);
        assert!(layer.keys_by_pattern("*").await.is_empty());
        assert_eq!(layer.warm([("b", 2)], Duration::from_secs(60)).await, 0);
    }

    #[tokio::test]
    async fn warm_then_mget() {
        let (layer, _) = layer();
        let written = layer
            .warm([("a", 1), ("c", 3)], Duration::from_secs(60))
            .await;
        assert_eq!(written, 2);
        assert_eq!(
            layer.mget::<u32, _>(&["a", "b", "c"]).await,
            vec![Some(1), None, Some(3)]
        );
        assert_eq!(layer.invalidate_multiple(&["a", "b", "c"]).await, 2);
    }
}
