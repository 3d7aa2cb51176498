// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff.
//!
//! Bulk requests to the cluster are wrapped in [`retry`] when the configured
//! retry count is positive.
//!
//! # Example
//!
//! ```
//! use search_sync::resilience::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig::from_backoff(50, 8).unwrap();
//! assert_eq!(config.initial_delay, Duration::from_millis(50));
//! assert_eq!(config.max_retries, Some(8));
//!
//! // zero or negative retry counts disable backoff entirely
//! assert!(RetryConfig::from_backoff(50, 0).is_none());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff policy for a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Retries after the first attempt; `None` retries forever
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Quick retry for individual requests.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Policy from the bulk backoff settings; `None` when retries are disabled.
    #[must_use]
    pub fn from_backoff(initial_delay_ms: u64, max_num_retries: i32) -> Option<Self> {
        let retries = usize::try_from(max_num_retries).ok().filter(|n| *n > 0)?;
        let initial_delay = Duration::from_millis(initial_delay_ms);
        Some(Self {
            max_retries: Some(retries),
            initial_delay,
            // the cap only matters for long retry chains
            max_delay: initial_delay.saturating_mul(1 << retries.min(10)).max(initial_delay),
            factor: 2.0,
        })
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = delay.mul_f64(self.factor).min(self.max_delay);
        }
        delay
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

/// Run `operation` until it succeeds or the retry budget is spent.
pub async fn retry<F, Fut, T, E>(operation_name: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut retries = 0usize;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!(operation = operation_name, retries, "Operation succeeded after retries");
                }
                return Ok(val);
            }
            Err(err) => {
                retries += 1;
                if config.max_retries.is_some_and(|max| retries > max) {
                    return Err(err);
                }
                warn!(
                    operation = operation_name,
                    attempt = retries,
                    max_retries = ?config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}
