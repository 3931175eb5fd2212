//! Retry loop for upstream operations.
//!
//! Two flavours share one loop:
//!
//! - [`RetryExecutor::execute`] for HTTP-shaped operations. Responses are
//!   classified by status; exhausting retries on a retryable status hands
//!   back the last response as `Ok`, so callers can tell "got a bad
//!   response" apart from "the operation itself failed".
//! - [`RetryExecutor::execute_async`] / [`RetryExecutor::execute_async_with`]
//!   for arbitrary fallible operations, optionally guarded by a
//!   `should_retry(error, attempt)` predicate.
//!
//! Sleeping uses `tokio::time::sleep`, so only the calling task is
//! suspended. Dropping the returned future cancels any pending sleep.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::RetryPolicy;
use super::retry_after::{RETRY_AFTER, parse_retry_after};
use crate::telemetry;

/// Status and header access for responses handled by [`RetryExecutor::execute`].
pub trait UpstreamResponse {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Header value by name. Lookups must be case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;
}

impl UpstreamResponse for reqwest::Response {
    fn status(&self) -> u16 {
        reqwest::Response::status(self).as_u16()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }
}

/// What a failed attempt produced.
#[derive(Debug)]
pub enum Failure<R, E> {
    /// The operation returned a response with a failing status.
    Response(R),
    /// The operation itself failed (network error, timeout, ...).
    Error(E),
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome<R, E> {
    /// Done; hand the response back.
    Success(R),
    /// Worth another attempt, optionally after a server-supplied delay.
    RetryableFailure {
        failure: Failure<R, E>,
        retry_after: Option<Duration>,
    },
    /// Not worth retrying.
    TerminalFailure(Failure<R, E>),
}

impl<R, E> AttemptOutcome<R, E> {
    /// Whether the loop should try again (retries permitting).
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptOutcome::RetryableFailure { .. })
    }
}

/// Classify a response under `policy`.
///
/// Only 429 responses have their `Retry-After` header consulted.
pub fn classify_response<R: UpstreamResponse, E>(
    response: R,
    policy: &RetryPolicy,
) -> AttemptOutcome<R, E> {
    let status = response.status();
    if (200..300).contains(&status) {
        return AttemptOutcome::Success(response);
    }
    if !policy.is_retryable_status(status) {
        return AttemptOutcome::TerminalFailure(Failure::Response(response));
    }
    let retry_after = if status == 429 {
        response.header(RETRY_AFTER).and_then(parse_retry_after)
    } else {
        None
    };
    AttemptOutcome::RetryableFailure {
        failure: Failure::Response(response),
        retry_after,
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// Holds no mutable state, so one executor can serve any number of
/// concurrent calls.
///
/// ```rust,no_run
/// # use tollgate::{RetryExecutor, RetryPolicy};
/// # async fn demo(client: reqwest::Client) -> Result<(), reqwest::Error> {
/// let executor = RetryExecutor::new(RetryPolicy::default()).named("openrouter.models");
/// let response = executor
///     .execute(|| client.get("https://openrouter.ai/api/v1/models").send())
///     .await?;
/// println!("status {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    name: String,
}

impl RetryExecutor {
    /// Create an executor for `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            name: "upstream".to_owned(),
        }
    }

    /// Label used in log fields and metric labels.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run an HTTP-shaped operation.
    ///
    /// Successful and non-retryable responses return immediately. Once
    /// retries are exhausted, the last retryable response is returned as
    /// `Ok` while the last operation error is returned as `Err`.
    pub async fn execute<F, Fut, R, E>(&self, mut operation: F) -> Result<R, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        R: UpstreamResponse,
        E: Display,
    {
        let policy = &self.policy;
        self.run(
            &mut operation,
            |result| match result {
                Ok(response) => classify_response(response, policy),
                Err(e) => AttemptOutcome::RetryableFailure {
                    failure: Failure::Error(e),
                    retry_after: None,
                },
            },
            |response: &R| response.status().to_string(),
        )
        .await
    }

    /// Run a fallible operation, retrying every error until exhaustion.
    pub async fn execute_async<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute_async_with(operation, |_, _| true).await
    }

    /// Run a fallible operation, consulting `should_retry(error, attempt)`
    /// (0-indexed attempt) before each retry.
    pub async fn execute_async_with<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E, u32) -> bool,
    {
        let mut attempt = 0u32;
        self.run(
            &mut operation,
            |result| {
                let current = attempt;
                attempt += 1;
                match result {
                    Ok(value) => AttemptOutcome::Success(value),
                    Err(e) if should_retry(&e, current) => AttemptOutcome::RetryableFailure {
                        failure: Failure::Error(e),
                        retry_after: None,
                    },
                    Err(e) => AttemptOutcome::TerminalFailure(Failure::Error(e)),
                }
            },
            |_| "failed response".to_owned(),
        )
        .await
    }

    async fn run<F, Fut, T, E, C, D>(
        &self,
        operation: &mut F,
        mut classify: C,
        describe: D,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        C: FnMut(Result<T, E>) -> AttemptOutcome<T, E>,
        D: Fn(&T) -> String,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0u32;
        loop {
            let outcome = classify(operation().await);
            let (failure, retry_after) = match outcome {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::TerminalFailure(failure) => {
                    debug!(operation = %self.name, attempt = attempt + 1, "not retrying");
                    return into_result(failure);
                }
                AttemptOutcome::RetryableFailure {
                    failure,
                    retry_after,
                } => (failure, retry_after),
            };

            let reason = match &failure {
                Failure::Response(r) => describe(r),
                Failure::Error(e) => e.to_string(),
            };

            if attempt + 1 >= max_attempts {
                metrics::counter!(telemetry::RETRIES_EXHAUSTED_TOTAL,
                    "operation" => self.name.clone(),
                )
                .increment(1);
                error!(
                    operation = %self.name,
                    attempts = attempt + 1,
                    reason = %reason,
                    "retries exhausted"
                );
                return into_result(failure);
            }

            let delay = self.policy.next_delay(attempt, retry_after);
            metrics::counter!(telemetry::RETRIES_TOTAL,
                "operation" => self.name.clone(),
            )
            .increment(1);
            warn!(
                operation = %self.name,
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                reason = %reason,
                "retrying after transient failure"
            );
            drop(failure);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn into_result<T, E>(failure: Failure<T, E>) -> Result<T, E> {
    match failure {
        Failure::Response(response) => Ok(response),
        Failure::Error(e) => Err(e),
    }
}

/// Run an HTTP-shaped operation under `policy`.
pub async fn execute<F, Fut, R, E>(policy: &RetryPolicy, operation: F) -> Result<R, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<R, E>>,
    R: UpstreamResponse,
    E: Display,
{
    RetryExecutor::new(policy.clone()).execute(operation).await
}

/// Run a fallible operation under `policy`, retrying every error.
pub async fn execute_async<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    RetryExecutor::new(policy.clone()).execute_async(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Reply {
        status: u16,
        retry_after: Option<&'static str>,
    }

    impl UpstreamResponse for Reply {
        fn status(&self) -> u16 {
            self.status
        }

        fn header(&self, name: &str) -> Option<&str> {
            if name.eq_ignore_ascii_case(RETRY_AFTER) {
                self.retry_after
            } else {
                None
            }
        }
    }

    fn reply(status: u16) -> Reply {
        Reply {
            status,
            retry_after: None,
        }
    }

    #[test]
    fn success_is_classified_as_success() {
        let outcome = classify_response::<_, ()>(reply(200), &RetryPolicy::default());
        assert!(matches!(outcome, AttemptOutcome::Success(_)));
    }

    #[test]
    fn not_found_is_terminal() {
        let outcome = classify_response::<_, ()>(reply(404), &RetryPolicy::default());
        assert!(matches!(
            outcome,
            AttemptOutcome::TerminalFailure(Failure::Response(_))
        ));
    }

    #[test]
    fn gateway_errors_are_retryable() {
        for status in [429, 502, 503, 504] {
            let outcome = classify_response::<_, ()>(reply(status), &RetryPolicy::default());
            assert!(outcome.is_retryable(), "{status} should be retryable");
        }
    }

    #[test]
    fn retry_after_read_only_on_429() {
        let limited = Reply {
            status: 429,
            retry_after: Some("2"),
        };
        match classify_response::<_, ()>(limited, &RetryPolicy::default()) {
            AttemptOutcome::RetryableFailure { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let unavailable = Reply {
            status: 503,
            retry_after: Some("2"),
        };
        match classify_response::<_, ()>(unavailable, &RetryPolicy::default()) {
            AttemptOutcome::RetryableFailure { retry_after, .. } => {
                assert_eq!(retry_after, None);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn custom_status_set() {
        let policy = RetryPolicy::default().retryable_statuses([500]);
        assert!(classify_response::<_, ()>(reply(500), &policy).is_retryable());
        assert!(!classify_response::<_, ()>(reply(503), &policy).is_retryable());
    }
}
