//! Caching subsystem.
//!
//! - [`CacheLayer`]: cache-aside and stale-while-revalidate policies plus
//!   direct get/set/invalidate primitives, instrumented per category. See
//!   the [`layer`] module docs for freshness and failure semantics.
//!
//! - [`KeyValueStore`]: the boundary to the backing store, with two
//!   implementations: [`MemoryStore`] (in-process, moka) and `RedisStore`
//!   (feature `redis`).
//!
//! - [`CacheMetricsRegistry`]: per-category hit/miss/error counters, shared
//!   across clones of a layer and injectable for tests.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use tollgate::cache::{CacheLayer, CacheMetricsRegistry, MemoryStore};
//! # async fn demo() -> Result<(), String> {
//! let cache = CacheLayer::new(Arc::new(MemoryStore::new()), Arc::new(CacheMetricsRegistry::new()))
//!     .key_prefix("gateway:");
//!
//! let models: Vec<String> = cache
//!     .cache_aside(
//!         "models:openrouter",
//!         || async { Ok::<_, String>(vec!["gpt-4o".to_owned()]) },
//!         Duration::from_secs(300),
//!         Some("models"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod keys;
pub mod layer;
pub mod memory;
pub mod metrics;
pub mod pattern;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

pub use keys::hashed_key;
pub use layer::CacheLayer;
pub use memory::MemoryStore;
pub use self::metrics::{CacheMetrics, CacheMetricsRegistry, DEFAULT_CATEGORY};
pub use pattern::{glob_match, is_glob};
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use store::{KeyValueStore, Ttl};
