//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus,
//! statsd); without a recorder installed, all metric calls are no-ops.
//! The per-category cache counters kept in
//! [`CacheMetricsRegistry`](crate::cache::CacheMetricsRegistry) are
//! independent of these and always available in-process.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `tollgate_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `operation`: label given to a [`RetryExecutor`](crate::retry::RetryExecutor)
//! - `category`: cache category (e.g. "models", "rankings", "default")
//! - `status`: outcome: "ok" or "error"

/// Retry attempts (not counting the initial request).
///
/// Labels: `operation`.
pub const RETRIES_TOTAL: &str = "tollgate_retries_total";

/// Operations that ran out of retries.
///
/// Labels: `operation`.
pub const RETRIES_EXHAUSTED_TOTAL: &str = "tollgate_retries_exhausted_total";

/// Cache hits.
///
/// Labels: `category`.
pub const CACHE_HITS_TOTAL: &str = "tollgate_cache_hits_total";

/// Cache misses.
///
/// Labels: `category`.
pub const CACHE_MISSES_TOTAL: &str = "tollgate_cache_misses_total";

/// Store errors swallowed by the cache layer.
///
/// Labels: `category`.
pub const CACHE_ERRORS_TOTAL: &str = "tollgate_cache_errors_total";

/// Background stale-while-revalidate refreshes.
///
/// Labels: `category`, `status` ("ok" | "error").
pub const CACHE_REVALIDATIONS_TOTAL: &str = "tollgate_cache_revalidations_total";

/// Errors recorded by stream reassemblers.
pub const STREAM_ERRORS_TOTAL: &str = "tollgate_stream_errors_total";
