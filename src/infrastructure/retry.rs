//! Exponential-backoff retry for transient failures.
//!
//! Only errors that classify themselves as transient are retried; anything
//! else is handed back after the first attempt. An optional deadline is
//! checked between attempts only, so an attempt that has started always runs
//! to completion.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::domain::{ErrorKind, WithdrawalError};

/// Backoff schedule: the delay before retry `n` (1-based) is
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Tighter schedule used by the core for optimistic-write conflicts.
    pub fn for_conflicts() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            multiplier: 1.2,
            max_delay: Duration::from_secs(1),
        }
    }

    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_nanos((secs.max(0.0) * 1e9).round() as u64)
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

pub trait TransientError {
    fn is_transient(&self) -> bool;
}

impl TransientError for WithdrawalError {
    fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum RetryError<E> {
    #[error("{0}")]
    Permanent(E),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { last: E, attempts: u32 },
    #[error("deadline reached after {attempts} attempts: {last}")]
    DeadlineExceeded { last: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(err) => err,
            RetryError::Exhausted { last, .. } => last,
            RetryError::DeadlineExceeded { last, .. } => last,
        }
    }
}

/// Retries `operation` while it fails with a transient error. No new attempt
/// or backoff sleep begins once it would reach `deadline`.
pub async fn retry_until<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    deadline: Instant,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: TransientError + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(
        config,
        operation_name,
        Some(deadline),
        |err: &E| err.is_transient(),
        operation,
    )
    .await
}

/// Retries `operation` while `should_retry` accepts its error.
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run(config, operation_name, None, should_retry, operation).await
}

async fn run<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    deadline: Option<Instant>,
    should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.attempts();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !should_retry(&err) => return Err(RetryError::Permanent(err)),
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    last: err,
                    attempts: attempt,
                });
            }
            Err(err) => {
                let delay = config.delay_for_retry(attempt);
                if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "Deadline reached, not retrying"
                    );
                    return Err(RetryError::DeadlineExceeded {
                        last: err,
                        attempts: attempt,
                    });
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
