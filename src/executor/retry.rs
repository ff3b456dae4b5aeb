use std::future::Future;
use std::time::Duration;

use crate::error::GateError;

/// Outcome of one attempt that did not succeed.
#[derive(Debug)]
pub enum AttemptError {
    /// Busy or locked store, pool timeout, I/O. Worth another attempt.
    Transient(anyhow::Error),
    /// Retrying cannot change the answer.
    Fatal(GateError),
}

impl AttemptError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }
}

/// Bounded retry with doubling backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    base_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff_ms: u64) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff_ms: base_backoff_ms.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs `op` until it succeeds, fails fatally, or the budget is spent.
    /// A spent budget surfaces as `StorageUnavailable`.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, GateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut backoff_ms = self.base_backoff_ms;
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(label, attempt, "store recovered after retries");
                    }
                    return Ok(value);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(err)) => {
                    last_error = format!("{err:#}");
                    if attempt < self.attempts {
                        tracing::warn!(
                            label,
                            attempt,
                            max_attempts = self.attempts,
                            error = %last_error,
                            "store attempt failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        backoff_ms = backoff_ms.saturating_mul(2).min(5_000);
                    }
                }
            }
        }

        tracing::error!(label, attempts = self.attempts, error = %last_error, "store unavailable");
        Err(GateError::StorageUnavailable {
            attempts: self.attempts,
            message: last_error,
        })
    }
}
