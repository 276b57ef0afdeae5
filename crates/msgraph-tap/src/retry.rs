//! Retry with exponential backoff.
//!
//! [`retry`] is a plain higher-order function: it takes a policy, a decision
//! function and the operation, and holds no global state. Tests use
//! [`RetryPolicy::immediate`] to get deterministic, sleep-free retries.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Give up and return the error.
    Stop,
    /// Try again; `not_before` is a server-suggested minimum delay.
    Retry { not_before: Option<Duration> },
}

/// Retry schedule: `initial_delay * factor^attempt`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: u32,
    /// Upper bound for any single delay, server hints included.
    pub max_delay: Duration,
    /// Randomise each delay within `[0, delay]` (full jitter).
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            factor: 2,
            max_delay: Duration::from_secs(300),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget as the default, without sleeping.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            factor: 2,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay after the failed attempt with 0-based index `attempt`, before jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt.min(16));
        self.initial_delay
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }

    fn next_delay(&self, attempt: u32, not_before: Option<Duration>) -> Duration {
        let mut delay = self.delay_for(attempt);
        if self.jitter && !delay.is_zero() {
            let upper = millis(delay);
            delay = Duration::from_millis(rand::thread_rng().gen_range(0..=upper));
        }
        match not_before {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}

/// Runs `operation` until it succeeds, `decide` says stop, or the attempt
/// budget is exhausted. The last error is returned unchanged.
pub async fn retry<T, E, F, Fut, D>(policy: &RetryPolicy, decide: D, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: Fn(&E) -> RetryDecision,
    E: std::fmt::Display,
{
    retry_counted(policy, decide, operation)
        .await
        .map_err(|(err, _)| err)
}

/// Like [`retry`], but a failure also reports how many attempts were made.
pub async fn retry_counted<T, E, F, Fut, D>(
    policy: &RetryPolicy,
    decide: D,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: Fn(&E) -> RetryDecision,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;

        let not_before = match decide(&err) {
            RetryDecision::Stop => return Err((err, attempt)),
            RetryDecision::Retry { not_before } => not_before,
        };

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "Giving up after exhausting retries");
            return Err((err, attempt));
        }

        let delay = policy.next_delay(attempt - 1, not_before);
        debug!(
            attempt,
            max_attempts,
            delay_ms = millis(delay),
            error = %err,
            "Retrying after transient error"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
