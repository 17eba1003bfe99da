//! Bounded retry with exponential backoff, and the inter-call pacer.
//!
//! ## Retry schedule
//!
//! Attempt 1 runs immediately. Before retry `n` (n ≥ 1) we sleep
//! `min(base * 2^(n-1), max)`: with 1 s base and 3 retries the waits are
//! 1 s → 2 s → 4 s. Every failure is logged with its cause.
//!
//! ## Pacing
//!
//! [`Pacer`] enforces a minimum gap between the *starts* of any two external
//! calls, retries included. Backoff and pacing overlap: a 2 s backoff already
//! satisfies a 1 s pacing interval.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::warn;

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the `retry`-th retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Enforces a minimum interval between consecutive external calls.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    last_call: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: None,
        }
    }

    /// Sleep until a call is allowed, then mark the call as started.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last_call {
            let next = last + self.interval;
            if Instant::now() < next {
                sleep_until(next).await;
            }
        }
        self.last_call = Some(Instant::now());
    }
}

/// Every attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or the policy's attempts are spent.
///
/// `op` receives the 1-based attempt number. On success returns the value and
/// the number of attempts it took.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    pacer: &mut Pacer,
    label: &str,
    mut op: F,
) -> Result<(T, u32), RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        pacer.wait().await;
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt >= max_attempts => {
                warn!(
                    "{}: attempt {}/{} failed, giving up: {}",
                    label, attempt, max_attempts, e
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{}: attempt {}/{} failed, retrying in {}ms: {}",
                    label,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
