//! Retry policy and backoff arithmetic.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;

use crate::{Result, TollgateError};

/// HTTP statuses retried by default: rate limiting and gateway failures.
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 4] = [429, 502, 503, 504];

/// Configuration for retrying upstream requests.
///
/// Uses exponential backoff with symmetric jitter. Built once per call
/// site and never mutated afterwards:
///
/// ```rust
/// # use tollgate::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter_factor(0.2);
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt. 0 = single attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Cap for computed and server-supplied delays. Default: 10s.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Fraction of the delay randomly added or removed. Default: 0.1.
    pub jitter_factor: f64,
    /// HTTP statuses that trigger a retry.
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the exponential growth factor.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (0 disables jitter).
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Replace the set of retryable statuses.
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Check the numeric constraints of the policy.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(TollgateError::InvalidPolicy(
                "initial_delay must be greater than zero".into(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(TollgateError::InvalidPolicy(format!(
                "max_delay ({:?}) must be at least initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(TollgateError::InvalidPolicy(format!(
                "backoff_multiplier must be a finite number greater than 1, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(TollgateError::InvalidPolicy(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    /// Total invocations allowed, including the initial one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether `status` should be retried under this policy.
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Backoff delay for a 0-indexed attempt, before jitter.
    ///
    /// `min(initial_delay * backoff_multiplier^attempt, max_delay)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    }

    /// Backoff delay raised to a server-supplied hint.
    ///
    /// The hint is capped at `max_delay` before being compared, so the
    /// result never exceeds `max_delay`.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = self.backoff_delay(attempt);
        match retry_after {
            Some(hint) => computed.max(hint.min(self.max_delay)),
            None => computed,
        }
    }

    /// Apply symmetric jitter: `delay + delay * jitter_factor * u`, `u` in [-1, 1].
    ///
    /// The result is clamped to `[0, max_delay]`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 {
            return delay.min(self.max_delay);
        }
        let unit = rand::thread_rng().gen_range(-1.0..=1.0);
        self.jittered_with(delay, unit)
    }

    /// Jitter with a caller-chosen `unit` in [-1, 1].
    pub fn jittered_with(&self, delay: Duration, unit: f64) -> Duration {
        let base = delay.as_nanos() as f64;
        let offset = base * self.jitter_factor * unit.clamp(-1.0, 1.0);
        let nanos = (base + offset).max(0.0).round();
        if nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
    }

    /// Delay to sleep before retrying after a failed `attempt`.
    ///
    /// Jitter only spreads the computed backoff; a server hint acts as a
    /// floor so a `Retry-After` is never undercut. The hint is left
    /// un-jittered on purpose, since jittering `max(backoff, hint)` could
    /// retry before the server asked.
    pub fn next_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jittered = self.jittered(self.backoff_delay(attempt));
        match retry_after {
            Some(hint) => jittered.max(hint.min(self.max_delay)),
            None => jittered,
        }
    }
}
