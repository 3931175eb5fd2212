//! Retrying upstream requests with exponential backoff.
//!
//! [`RetryPolicy`] holds the numbers (attempt bound, delays, jitter,
//! retryable statuses), [`RetryExecutor`] runs an operation under a
//! policy. Server-supplied `Retry-After` hints on 429 responses are
//! honoured up to the policy's delay cap.

pub mod executor;
pub mod policy;
pub mod retry_after;

pub use executor::{
    AttemptOutcome, Failure, RetryExecutor, UpstreamResponse, classify_response, execute,
    execute_async,
};
pub use policy::{DEFAULT_RETRYABLE_STATUSES, RetryPolicy};
pub use retry_after::{parse_retry_after, parse_retry_after_at};
