//! Retry policies.
//!
//! The executor consults the policy only for failures that are transient
//! (see [`TableError::is_retryable`]); everything else surfaces after a
//! single attempt. A policy decides how long to wait and where to send the
//! next attempt.

use std::time::Duration;

use crate::config::LocationMode;
use crate::continuation::StorageLocation;
use crate::error::TableError;

/// State of the operation when an attempt failed.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    /// Retries already performed; 0 after the first attempt fails.
    pub current_retry_count: u32,
    /// HTTP status of the failed attempt, if one was received.
    pub last_status: Option<u16>,
    /// Location the failed attempt was sent to.
    pub last_location: StorageLocation,
    pub location_mode: LocationMode,
    /// Whether the command may be served by a secondary endpoint.
    pub read_only: bool,
}

impl RetryContext {
    /// Location for the next attempt: the other endpoint when the mode
    /// alternates and the command is read-only, otherwise the same one.
    pub fn next_location(&self) -> StorageLocation {
        if self.read_only && self.location_mode.alternates() {
            self.last_location.other()
        } else {
            self.last_location
        }
    }
}

/// Decision to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    pub delay: Duration,
    pub target_location: StorageLocation,
}

/// Decides whether and when a failed attempt is retried.
pub trait RetryPolicy: Send + Sync {
    /// Returns `None` to stop retrying.
    fn evaluate(&self, context: &RetryContext, error: &TableError) -> Option<RetryInfo>;
}

/// Exponential backoff: `min_backoff + (2^n - 1) * delta_backoff`, capped at
/// `max_backoff`, where `n` is the number of retries already performed.
#[derive(Debug, Clone)]
pub struct ExponentialRetry {
    delta_backoff: Duration,
    min_backoff: Duration,
    max_backoff: Duration,
    max_attempts: u32,
}

impl ExponentialRetry {
    pub fn new(
        delta_backoff: Duration,
        min_backoff: Duration,
        max_backoff: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            delta_backoff,
            min_backoff,
            max_backoff,
            max_attempts,
        }
    }

    /// Delay before retry number `retry_count + 1`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count).saturating_sub(1);
        self.min_backoff
            .saturating_add(self.delta_backoff.saturating_mul(factor))
            .min(self.max_backoff)
    }
}

impl RetryPolicy for ExponentialRetry {
    fn evaluate(&self, context: &RetryContext, error: &TableError) -> Option<RetryInfo> {
        if !error.is_retryable() || context.current_retry_count >= self.max_attempts {
            return None;
        }
        Some(RetryInfo {
            delay: self.backoff(context.current_retry_count),
            target_location: context.next_location(),
        })
    }
}

/// Fixed delay between attempts.
#[derive(Debug, Clone)]
pub struct LinearRetry {
    delta_backoff: Duration,
    max_attempts: u32,
}

impl LinearRetry {
    pub fn new(delta_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            delta_backoff,
            max_attempts,
        }
    }
}

impl RetryPolicy for LinearRetry {
    fn evaluate(&self, context: &RetryContext, error: &TableError) -> Option<RetryInfo> {
        if !error.is_retryable() || context.current_retry_count >= self.max_attempts {
            return None;
        }
        Some(RetryInfo {
            delay: self.delta_backoff,
            target_location: context.next_location(),
        })
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn evaluate(&self, _context: &RetryContext, _error: &TableError) -> Option<RetryInfo> {
        None
    }
}
