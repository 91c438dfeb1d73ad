//! Bounded retry with a fixed delay between attempts.

use crate::error::{KnbError, Result};
use crate::observability::metrics;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy for a fallible per-node operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of invocations, including the first one.
    pub max_attempts: u32,
    /// Pause between two consecutive attempts. Never grows.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay }
    }

    /// A policy that invokes the operation exactly once.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// On exhaustion the last error is wrapped in [`KnbError::RetryExhausted`]
    /// together with the attempt count and the operation/node identity.
    /// Cancelling `token` aborts both a running attempt and a pending delay.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        node: &str,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            metrics::record_retry_attempt(operation);
            debug!(
                "calling {} on {} (remaining retries: {})",
                operation,
                node,
                self.max_attempts.saturating_sub(attempt)
            );

            let outcome = tokio::select! {
                _ = token.cancelled() => return Err(KnbError::Cancelled),
                outcome = op() => outcome,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(KnbError::Cancelled) => return Err(KnbError::Cancelled),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(KnbError::RetryExhausted {
                    operation: operation.to_string(),
                    node: node.to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            warn!(
                "{} on {} failed (attempt {}/{}): {}",
                operation, node, attempt, self.max_attempts, err
            );

            tokio::select! {
                _ = token.cancelled() => return Err(KnbError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
    }
}
