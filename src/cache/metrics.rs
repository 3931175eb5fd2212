//! Per-category cache hit/miss/error counters.
//!
//! A [`CacheMetricsRegistry`] is shared by every clone of a cache layer and
//! is safe to update from any number of concurrent requests: counters are
//! atomics, and the category map is only write-locked when a new category
//! appears. Every update is also mirrored to the `metrics` facade.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;

use crate::telemetry;

/// Category used when the caller does not name one.
pub const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics::new(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.errors.load(Ordering::Relaxed),
        )
    }

    fn clear(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of one category's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// `hits / (hits + misses)`, or `0.0` before any lookup.
    pub hit_rate: f64,
}

impl CacheMetrics {
    fn new(hits: u64, misses: u64, errors: u64) -> Self {
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };
        Self {
            hits,
            misses,
            errors,
            hit_rate,
        }
    }
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

/// Registry of per-category counters.
#[derive(Debug, Default)]
pub struct CacheMetricsRegistry {
    categories: RwLock<HashMap<String, Arc<Counters>>>,
}

impl CacheMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, category: &str) {
        self.counters(category).hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL, "category" => category.to_owned())
            .increment(1);
    }

    pub fn record_miss(&self, category: &str) {
        self.counters(category).misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL, "category" => category.to_owned())
            .increment(1);
    }

    pub fn record_error(&self, category: &str) {
        self.counters(category).errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_ERRORS_TOTAL, "category" => category.to_owned())
            .increment(1);
    }

    /// Counters for one category; all zero if it has never been touched.
    pub fn snapshot(&self, category: &str) -> CacheMetrics {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
            .map(|c| c.snapshot())
            .unwrap_or_default()
    }

    /// Counters for every known category, ordered by name.
    pub fn report(&self) -> BTreeMap<String, CacheMetrics> {
        self.categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, c)| (name.clone(), c.snapshot()))
            .collect()
    }

    pub fn categories(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Zero one category's counters, or every category's with `None`.
    ///
    /// Categories stay registered, so they keep appearing in [`report`](Self::report).
    pub fn reset(&self, category: Option<&str>) {
        let categories = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match category {
            Some(name) => {
                if let Some(counters) = categories.get(name) {
                    counters.clear();
                }
            }
            None => categories.values().for_each(|c| c.clear()),
        }
    }

    fn counters(&self, category: &str) -> Arc<Counters> {
        // Fast path: category already registered
        if let Some(counters) = self
            .categories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(category)
        {
            return Arc::clone(counters);
        }

        let mut categories = self
            .categories
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(categories.entry(category.to_owned()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate() {
        let registry = CacheMetricsRegistry::new();
        assert_eq!(registry.snapshot("models").hit_rate, 0.0);

        registry.record_hit("models");
        registry.record_hit("models");
        registry.record_hit("models");
        registry.record_miss("models");
        registry.record_error("models");

        let m = registry.snapshot("models");
        assert_eq!((m.hits, m.misses, m.errors), (3, 1, 1));
        assert!((m.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn errors_do_not_affect_hit_rate() {
        let registry = CacheMetricsRegistry::new();
        registry.record_error("search");
        let m = registry.snapshot("search");
        assert_eq!(m.errors, 1);
        assert_eq!(m.hit_rate, 0.0);
    }

    #[test]
    fn reset_one_category() {
        let registry = CacheMetricsRegistry::new();
        registry.record_hit("models");
        registry.record_miss("rankings");

        registry.reset(Some("models"));
        assert_eq!(registry.snapshot("models"), CacheMetrics::default());
        assert_eq!(registry.snapshot("rankings").misses, 1);

        registry.reset(Some("unknown"));
        assert_eq!(registry.snapshot("rankings").misses, 1);
    }

    #[test]
    fn reset_all() {
        let registry = CacheMetricsRegistry::new();
        registry.record_hit("models");
        registry.record_miss("rankings");
        registry.reset(None);

        let report = registry.report();
        assert_eq!(report.len(), 2);
        assert!(report.values().all(|m| *m == CacheMetrics::default()));
    }

    #[test]
    fn report_is_sorted() {
        let registry = CacheMetricsRegistry::new();
        registry.record_miss("search");
        registry.record_hit(DEFAULT_CATEGORY);
        registry.record_hit("models");
        let names: Vec<_> = registry.report().into_keys().collect();
        assert_eq!(names, vec!["default", "models", "search"]);
        assert_eq!(registry.categories(), names);
    }

    #[test]
    fn serializes_camel_case() {
        let registry = CacheMetricsRegistry::new();
        registry.record_hit("models");
        let json = serde_json::to_value(registry.snapshot("models")).unwrap();
        assert_eq!(json["hitRate"], 1.0);
        assert_eq!(json["hits"], 1);
    }
}
