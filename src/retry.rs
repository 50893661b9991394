//! Bounded retry with linear backoff.
//!
//! Both the station fetch and every backend call go through [`retry`]. The
//! wait schedule lives in [`RetryPolicy::delay_after`] so it can be checked
//! without driving any I/O.

use std::{fmt, future::Future, time::Duration};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_STEP_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is one more.
    pub max_retries: u32,
    pub step: Duration,
    /// Multiplier applied to `step` after the first failure. The fetcher
    /// starts at 0 (immediate first retry), backend calls start at 1.
    pub start_multiplier: u32,
}

impl RetryPolicy {
    /// Station fetch: waits 0s, 10s, 20s between four attempts.
    pub const fn fetch() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            step: Duration::from_secs(DEFAULT_STEP_SECS),
            start_multiplier: 0,
        }
    }

    /// Backend calls: waits 10s, 20s, 30s between four attempts.
    pub const fn backend() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            step: Duration::from_secs(DEFAULT_STEP_SECS),
            start_multiplier: 1,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based).
    /// `None` once the retry budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        Some(self.step * (self.start_multiplier + attempt - 1))
    }
}

/// Returned when every attempt failed; carries the last failure.
#[derive(Debug, thiserror::Error)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryError<E: fmt::Display + fmt::Debug> {
    pub operation: String,
    pub attempts: u32,
    pub last: E,
}

/// Runs `op` until it succeeds or `policy` is exhausted. The closure receives
/// the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display + fmt::Debug,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    log_info!("{operation} succeeded on attempt {attempt}/{}", policy.max_attempts());
                }
                return Ok(value);
            }
            Err(err) => match policy.delay_after(attempt) {
                Some(wait) => {
                    log_warn!(
                        "{operation} attempt {attempt}/{} failed: {err}; retrying after {}s wait",
                        policy.max_attempts(),
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                None => {
                    log_error!("{operation} failed after {attempt} attempts: {err}");
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: err,
                    });
                }
            },
        }
    }
}
