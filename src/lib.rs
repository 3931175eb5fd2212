//! Tollgate - resilience and normalization core for LLM gateways
//!
//! A gateway sitting in front of several LLM providers has to absorb three
//! kinds of upstream misbehavior. This crate provides one independent
//! component for each:
//!
//! - [`retry`]: [`RetryExecutor`] retries transient HTTP failures (429,
//!   502, 503, 504 and network errors) with exponential backoff, jitter and
//!   `Retry-After` support.
//! - [`stream`]: [`StreamReassembler`] splits a live token stream into
//!   visible content and model reasoning, whatever inline markers the
//!   provider uses, and keeps partial output when the stream fails.
//! - [`cache`]: [`CacheLayer`] offers cache-aside and
//!   stale-while-revalidate over a pluggable key-value store, with
//!   per-category hit/miss/error metrics.
//!
//! The components never call each other; calling code composes them.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate::{CacheLayer, CacheMetricsRegistry, MemoryStore, RetryExecutor, RetryPolicy};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let cache = CacheLayer::new(Arc::new(MemoryStore::new()), Arc::new(CacheMetricsRegistry::new()));
//! let retry = RetryExecutor::new(RetryPolicy::default()).named("openrouter_models");
//! let client = reqwest::Client::new();
//!
//! let models: serde_json::Value = cache
//!     .cache_aside(
//!         "models:openrouter",
//!         || async {
//!             let response = retry
//!                 .execute(|| client.get("https://openrouter.ai/api/v1/models").send())
//!                 .await?;
//!             response.json().await
//!         },
//!         Duration::from_secs(300),
//!         Some("models"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod retry;
pub mod stream;
pub mod telemetry;
pub mod version;

// Re-export main types at crate root
pub use cache::{
    CacheLayer, CacheMetrics, CacheMetricsRegistry, KeyValueStore, MemoryStore, Ttl, hashed_key,
};
#[cfg(feature = "redis")]
pub use cache::RedisStore;
pub use config::{CacheSettings, Config, RetrySettings, StreamSettings};
pub use error::{Result, StoreError, StoreResult, TollgateError};
pub use retry::{AttemptOutcome, RetryExecutor, RetryPolicy, UpstreamResponse};
pub use stream::{Reassembled, ReassemblingStream, StreamChunk, StreamReassembler};
