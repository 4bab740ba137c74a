//! Bounded retry with exponential backoff for unreliable dependencies

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 250,
            max_backoff_ms: 8000,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as u32;
        let ms = self
            .base_backoff_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Terminal,
}

const TRANSIENT_PATTERNS: [&str; 6] = [
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "too many connections",
    "temporarily unavailable",
];

/// Classify a failure by its message
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Terminal
    }
}

/// Classify an HTTP status returned by a dependency
pub fn classify_status(status: u16) -> ErrorClass {
    match status {
        429 | 502 | 503 | 504 => ErrorClass::Transient,
        _ => ErrorClass::Terminal,
    }
}

/// Run `op` until it succeeds, fails terminally, or the policy is exhausted.
///
/// Exhausted transient failures surface as `ExternalUnavailable`, terminal
/// ones as `ExternalService`.
pub async fn retry_with_classifier<T, E, F, Fut, C>(
    policy: &RetryPolicy,
    operation: &str,
    classify: C,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> ErrorClass,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match classify(&err) {
                ErrorClass::Terminal => {
                    tracing::warn!(operation, attempt, error = %err, "terminal failure");
                    return Err(AppError::ExternalService(format!("{}: {}", operation, err)));
                }
                ErrorClass::Transient if attempt >= max_attempts => {
                    tracing::warn!(operation, attempt, error = %err, "retries exhausted");
                    return Err(AppError::ExternalUnavailable {
                        source_name: operation.to_string(),
                        message: err.to_string(),
                    });
                }
                ErrorClass::Transient => {
                    let delay = policy.backoff_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }
}
