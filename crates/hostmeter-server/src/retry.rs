//! Exponential-backoff retry for recoverable processing failures.

use std::future::Future;
use std::time::Duration;

use crate::error::ProcessingError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }

    /// Runs `op` until it succeeds, fails unrecoverably, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Unrecoverable errors are returned as-is on the attempt that raised
    /// them. A recoverable error on the last attempt is wrapped in
    /// `ProcessingError::RetriesExhausted`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ProcessingError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProcessingError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(ProcessingError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "recoverable processing failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
