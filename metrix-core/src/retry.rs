//! Fixed-schedule retry with backoff.
//!
//! One policy is shared by storage calls, SQL connection setup and agent delivery:
//! attempt, wait 1s, attempt, wait 3s, attempt, wait 5s, then one final attempt whose
//! outcome is returned as-is. Only errors the caller's classifier accepts are
//! retried; anything else is returned immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Waits between consecutive attempts.
pub const RETRY_INTERVALS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(3), Duration::from_secs(5)];

/// Retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    intervals: Vec<Duration>,
}

impl Backoff {
    /// Schedule with custom waits; `intervals.len() + 1` attempts in total.
    pub fn new(intervals: impl Into<Vec<Duration>>) -> Self {
        Self { intervals: intervals.into() }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self { intervals: Vec::new() }
    }

    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    pub fn max_attempts(&self) -> usize {
        self.intervals.len() + 1
    }

    /// Run `op` until it succeeds, fails with a non-retriable error, or the schedule
    /// is exhausted.
    pub async fn retry<T, E, F, Fut, C>(
        &self,
        operation: &str,
        mut op: F,
        is_retriable: C,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        for (attempt, wait) in self.intervals.iter().enumerate() {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_retriable(&err) => return Err(err),
                Err(err) => {
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        error = %err,
                        retry_in = ?wait,
                        "Operation failed, retrying"
                    );
                    metrics::counter!("metrix_retries_total", "operation" => operation.to_string())
                        .increment(1);
                    tokio::time::sleep(*wait).await;
                }
            }
        }

        let result = op().await;
        if let Err(err) = &result {
            if is_retriable(err) && !self.intervals.is_empty() {
                error!(operation, error = %err, "Giving up after final attempt");
            }
        }
        result
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RETRY_INTERVALS)
    }
}
