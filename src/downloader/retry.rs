//! Bounded exponential backoff for transient remote failures

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::servicenow::SnowError;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, error: &SnowError) -> RetryDecision {
        if attempt >= self.max_attempts || !is_transient(error) {
            return RetryDecision::NoRetry;
        }

        // base * 2^(attempt-1), capped.
        let exp = 1u32 << attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

/// Transport failures, throttling and server errors are worth another attempt.
pub fn is_transient(error: &SnowError) -> bool {
    match error {
        SnowError::Transport(e) => !e.is_builder() && !e.is_redirect() && !e.is_decode(),
        SnowError::Status { status, .. } => *status == 429 || (500..=599).contains(status),
        SnowError::IdleTimeout { .. } => true,
        SnowError::Malformed { .. } | SnowError::Filesystem { .. } | SnowError::Cancelled => false,
    }
}

/// Run `op` until it succeeds, fails permanently or the policy gives up.
///
/// Backoff sleeps end early with `SnowError::Cancelled` once `cancel` fires.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, SnowError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SnowError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => match policy.decide(attempt, &e) {
                RetryDecision::NoRetry => return Err(e),
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what, attempt, policy.max_attempts, delay, e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SnowError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            },
        }
    }
}
