// SPDX-License-Identifier: MIT
//! Exponential backoff retry for transient store calls.
//!
//! Used only by [`crate::intake`] to retry `PutTask` against a flaky store —
//! never for the publish step, whose failure must propagate to the caller
//! immediately and never be swallowed.

use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// Calls `f()` up to `config.max_attempts` times. On each failure, waits for
/// the computed backoff delay before trying again, doubling the delay (up
/// to `config.max_delay`) after every attempt.
///
/// # Panics
/// Panics if `config.max_attempts` is 0.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    assert!(config.max_attempts > 0, "RetryConfig.max_attempts must be at least 1");

    let mut delay = config.initial_delay;
    let mut last_err: Option<E> = None;

    for attempt in 1..=config.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt < config.max_attempts {
                    warn!(attempt, max = config.max_attempts, delay_ms = delay.as_millis(), err = ?e, "attempt failed — retrying");
                    tokio::time::sleep(delay).await;
                    let next_ms = (delay.as_millis() as f64 * config.multiplier) as u128;
                    delay = Duration::from_millis(next_ms.min(config.max_delay.as_millis()) as u64);
                } else {
                    warn!(attempt, max = config.max_attempts, err = ?e, "all retry attempts exhausted");
                    last_err = Some(e);
                }
            }
        }
    }

    Err(last_err.expect("retry loop ended without setting last_err"))
}
