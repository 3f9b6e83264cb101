//! Bounded linear backoff for fan-out retries.

use log::*;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_UNIT: Duration = Duration::from_secs(1);

/// Linear backoff retry policy.
///
/// Retry `n` (zero based) waits `(n + 1)` units, so the defaults wait 1s, 2s
/// and 3s before giving up after four attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, unit: Duration) -> Self {
        Self { max_retries, unit }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Attempts made before giving up, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `n_past_retries`.
    pub fn linear_delay(&self, n_past_retries: u32) -> Duration {
        self.unit.saturating_mul(n_past_retries.saturating_add(1))
    }

    /// Run `operation` until it succeeds or the retry budget is spent, sleeping
    /// between attempts. The closure receives the zero-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, context: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut n_past_retries = 0;
        loop {
            match operation(n_past_retries).await {
                Ok(value) => return Ok(value),
                Err(e) if n_past_retries < self.max_retries => {
                    let delay = self.linear_delay(n_past_retries);
                    warn!(
                        "{}: attempt {} failed ({}), retry {} of {} in {:?}",
                        context,
                        n_past_retries + 1,
                        e,
                        n_past_retries + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    n_past_retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_UNIT)
    }
}
