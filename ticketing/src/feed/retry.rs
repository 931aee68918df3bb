//! Bounded retry with linear backoff

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{EventQuery, FeedError, FeedResult, PlateEvent, SensorFeed};
use crate::config::FeedConfig;

/// Retry budget for one feed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Wait before retry `n` is `n × backoff_step`.
    pub backoff_step: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_step: config.backoff_step(),
        }
    }

    /// Delay after the `attempt`-th failure (1-indexed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    /// Default: 3 attempts, 500ms step.
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

/// Outcome of a retried query, with the number of attempts made.
#[derive(Debug)]
pub struct Fetched {
    pub attempts: u32,
    pub result: FeedResult<Vec<PlateEvent>>,
}

/// Run `query` against `feed`, retrying transport failures.
///
/// Non-retryable errors return immediately. Cancellation is observed both
/// during a request and during a backoff sleep.
pub async fn fetch_with_retry(
    feed: &dyn SensorFeed,
    query: &EventQuery,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Fetched {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FeedError::Cancelled),
            result = feed.entry_events(query) => result,
        };

        let err = match result {
            Ok(events) => {
                if attempt > 1 {
                    tracing::debug!(attempt, plate = %query.plate, "Feed query succeeded after retry");
                }
                return Fetched {
                    attempts: attempt,
                    result: Ok(events),
                };
            }
            Err(e) => e,
        };

        if !err.is_retryable() || !policy.should_retry(attempt) {
            return Fetched {
                attempts: attempt,
                result: Err(err),
            };
        }

        let delay = policy.backoff(attempt);
        tracing::debug!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Feed query failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Fetched {
                    attempts: attempt,
                    result: Err(FeedError::Cancelled),
                };
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
