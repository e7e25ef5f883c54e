//! Bounded linear backoff for connection routines.
//!
//! Broker, search, and cache connections all share one policy shape: wait
//! `min(attempt × step, cap)` between attempts and give up after
//! `max_retries` retries. Giving up yields [`Error::RetriesExhausted`], which
//! callers treat as fatal.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Retry schedule for a connection routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay added per attempt.
    pub step: Duration,
    /// Upper bound on a single delay.
    pub cap: Duration,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Policy used for the cache backend: 50 ms steps, 2 s cap, 10 retries.
    pub const CACHE: RetryPolicy = RetryPolicy::new(
        Duration::from_millis(50),
        Duration::from_secs(2),
        10,
    );

    /// Policy used for broker and search connections: 300 ms steps, 30 s cap,
    /// 5 retries.
    pub const BROKER: RetryPolicy = RetryPolicy::new(
        Duration::from_millis(300),
        Duration::from_secs(30),
        5,
    );

    /// Create a policy.
    pub const fn new(step: Duration, cap: Duration, max_retries: u32) -> Self {
        Self {
            step,
            cap,
            max_retries,
        }
    }

    /// Same schedule with a different retry budget.
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt).min(self.cap)
    }

    /// Run `op` until it succeeds or the retry budget is spent.
    ///
    /// `op` receives the 1-based attempt number. Every failure is logged; the
    /// last one is carried in the returned [`Error::RetriesExhausted`].
    pub async fn run<T, E, F, Fut>(&self, what: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(what, attempt, "connected after retrying");
                    }
                    return Ok(value);
                }
                Err(e) if attempt > self.max_retries => {
                    tracing::error!(what, attempt, error = %e, "retry budget exhausted");
                    return Err(Error::RetriesExhausted {
                        what,
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::BROKER
    }
}
