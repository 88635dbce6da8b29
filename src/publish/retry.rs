//! Bounded retry for record store calls.

use std::{thread, time::Duration};

use serde::Deserialize;

use super::{PublishError, StoreError};

/// How often, and how patiently, store calls are retried.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: usize,

    /// Backoff unit; attempt `n` waits `n` units.
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 1000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt number `attempt`.
    ///
    /// A server-provided `Retry-After` wins when it asks for longer.
    pub fn delay_for(&self, attempt: usize, error: &StoreError) -> Duration {
        let backoff = Duration::from_millis(
            self.base_backoff_ms
                .saturating_mul(u64::try_from(attempt).unwrap_or(u64::MAX)),
        );
        match error {
            StoreError::RateLimited {
                retry_after: Some(after),
            } => backoff.max(*after),
            _ => backoff,
        }
    }
}

/// Run `op`, retrying transient store failures per `policy`.
///
/// Permanent failures (validation, auth) return on the first attempt.
pub fn with_retry<T>(
    policy: &RetryPolicy,
    what: &str,
    op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, PublishError> {
    with_retry_if(policy, what, StoreError::is_transient, op)
}

/// Run `op`, retrying only the failures `retryable` accepts.
pub fn with_retry_if<T>(
    policy: &RetryPolicy,
    what: &str,
    retryable: impl Fn(&StoreError) -> bool,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, PublishError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if !retryable(&error) => return Err(PublishError::Rejected(error)),
            Err(error) if attempt >= max_attempts => {
                return Err(PublishError::RetriesExhausted {
                    attempts: attempt,
                    source: error,
                });
            }
            Err(error) => {
                let delay = policy.delay_for(attempt, &error);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "transient store failure, retrying"
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
