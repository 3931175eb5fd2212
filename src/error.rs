//! Tollgate error types

/// Errors raised by tollgate itself.
///
/// Errors produced by caller-supplied operations and loaders are never
/// wrapped in this type; they flow back to the caller unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TollgateError {
    // Configuration errors
    #[error("invalid retry policy: {0}")]
    InvalidPolicy(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    // Store errors
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Streaming errors
    /// The reassembler was finished or cleaned up and has not been reset.
    #[error("stream reassembler is not active; call reset() before feeding")]
    StreamInactive,
}

/// Errors surfaced by a [`KeyValueStore`](crate::cache::KeyValueStore).
///
/// The cache layer swallows every one of these; they only reach callers
/// that talk to a store directly.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type alias for tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
