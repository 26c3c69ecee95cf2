//! Exponential-backoff retry policy.
//!
//! The policy resends a request when the response status indicates a
//! transient condition or when the attempt failed with a retryable error:
//!
//! - 408 Request Timeout and 429 Too Many Requests
//! - any 5xx except 501 Not Implemented and 505 HTTP Version Not Supported
//! - connection-level transport failures
//! - errors that embed one of the statuses above (for example a credential
//!   failure reported by an identity provider)
//!
//! Once attempts are exhausted, or a non-retryable outcome is observed, the
//! most recent response or error is returned unchanged.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::http::{Context, Request, Response};
use crate::pipeline::{Next, Policy};

/// Environment variable consulted by [`RetryOptions::from_env`].
pub const RETRY_COUNT_ENV: &str = "AZURE_REQUEST_RETRY_COUNT";

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(800);

/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Determines if an HTTP status code represents a retriable condition.
#[inline]
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (status >= 500 && status != 501 && status != 505)
}

/// Determines if an error should be retried.
///
/// Transport failures are always eligible. Errors exposing an embedded status
/// code follow [`is_retriable_status`]. Everything else is surfaced at once.
pub fn is_retriable_error(error: &Error) -> bool {
    match error {
        Error::Transport { .. } => true,
        other => other.status_code().is_some_and(is_retriable_status),
    }
}

/// Configuration for automatic retry behavior on transient errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Maximum number of retry attempts (not counting the initial request).
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further attempt.
    pub base_delay: Duration,
    /// Cap applied to every computed or server-requested delay.
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryOptions {
    /// Defaults, with `max_retries` taken from `AZURE_REQUEST_RETRY_COUNT`
    /// when it is set to a valid number.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(count) = std::env::var(RETRY_COUNT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
        {
            options.max_retries = count;
        }
        options
    }

    /// Set the maximum number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-based), with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay_with_jitter(attempt, fastrand::f64())
    }

    /// Delay before retry number `attempt` for a jitter sample in `[0, 1)`.
    ///
    /// `base_delay * 2^attempt * (0.8 + 0.4 * sample)`, capped at `max_delay`.
    pub fn delay_with_jitter(&self, attempt: u32, sample: f64) -> Duration {
        let jitter = 0.8 + 0.4 * sample.clamp(0.0, 1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exponent) * jitter;
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

/// Delay requested by the server through `retry-after-ms`,
/// `x-ms-retry-after-ms` or `Retry-After` (seconds).
pub fn retry_after(response: &Response) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = response.header(name).and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_millis(ms));
        }
    }
    response
        .header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// The zero-based attempt number of the current call, recorded in the
/// [`Context`] by [`RetryPolicy`] before each attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt(pub u32);

/// Policy that resends transient failures with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    fn delay_after(&self, attempt: u32, outcome: &Result<Response>) -> Option<Duration> {
        match outcome {
            Ok(response) if is_retriable_status(response.status().as_u16()) => Some(
                retry_after(response)
                    .map(|d| d.min(self.options.max_delay))
                    .unwrap_or_else(|| self.options.delay_for(attempt)),
            ),
            Err(e) if is_retriable_error(e) => Some(self.options.delay_for(attempt)),
            _ => None,
        }
    }
}

#[async_trait]
impl Policy for RetryPolicy {
    async fn send(
        &self,
        ctx: &mut Context,
        request: &mut Request,
        next: Next<'_>,
    ) -> Result<Response> {
        let mut attempt = 0;

        loop {
            ctx.insert(RetryAttempt(attempt));

            // Each attempt starts from the request as it entered this policy.
            let mut attempt_request = request.clone();
            let outcome = next.clone().run(ctx, &mut attempt_request).await;

            let Some(delay) = self.delay_after(attempt, &outcome) else {
                return outcome;
            };

            if attempt >= self.options.max_retries {
                tracing::warn!(
                    attempts = attempt + 1,
                    "retry attempts exhausted, returning last outcome"
                );
                return outcome;
            }

            match &outcome {
                Ok(response) => tracing::debug!(
                    attempt,
                    status = response.status().as_u16(),
                    delay_ms = delay.as_millis() as u64,
                    "retrying after retriable status"
                ),
                Err(e) => tracing::debug!(
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after retriable error"
                ),
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
