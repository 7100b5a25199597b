//! Policy decorator around a fallible async operation.
//!
//! Composition, outermost first: rate limiter -> circuit breaker -> retry
//! with backoff under an overall deadline -> operation. The deadline is only
//! checked between attempts; a running attempt is never cancelled, so a write
//! that committed is always reported as committed. Errors that are not
//! transient pass straight through as [`ResilienceError::Failed`] and are
//! never counted against the circuit.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::infrastructure::circuit_breaker::{
    CallOutcome, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics,
};
use crate::infrastructure::rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterMetrics};
use crate::infrastructure::retry::{retry_until, RetryConfig, RetryError, TransientError};

#[derive(Debug, Clone, PartialEq)]
pub struct ResilienceConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    /// No retry starts once this much time has passed since the call began.
    pub timeout: Duration,
    /// Hint returned to callers when no better estimate exists.
    pub retry_after: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            retry_after: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ResilienceError<E> {
    #[error("Rate limit exceeded for '{operation}'")]
    RateLimited { operation: String },
    #[error("Circuit breaker '{operation}' is open")]
    CircuitOpen {
        operation: String,
        retry_after: Duration,
    },
    #[error("'{operation}' timed out after {timeout:?}")]
    TimedOut { operation: String, timeout: Duration },
    #[error("'{operation}' failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        last: E,
        attempts: u32,
    },
    /// A non-transient error; propagated untouched.
    #[error("{0}")]
    Failed(E),
}

impl<E> ResilienceError<E> {
    /// True when the fallback should answer instead of the caller seeing the error.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, ResilienceError::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct PolicyMetrics {
    pub circuit_breaker: CircuitBreakerMetrics,
    pub rate_limiter: RateLimiterMetrics,
}

/// Shared, process-wide protections for one named operation.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    operation: String,
    rate_limiter: Arc<RateLimiter>,
    circuit_breaker: Arc<CircuitBreaker>,
    retry: RetryConfig,
    timeout: Duration,
    retry_after: Duration,
}

impl ResiliencePolicy {
    pub fn new(operation: impl Into<String>, config: ResilienceConfig) -> Self {
        let operation = operation.into();
        Self {
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            circuit_breaker: Arc::new(CircuitBreaker::new(
                operation.clone(),
                config.circuit_breaker,
            )),
            operation,
            retry: config.retry,
            timeout: config.timeout,
            retry_after: config.retry_after,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn default_retry_after(&self) -> Duration {
        self.retry_after
    }

    pub async fn metrics(&self) -> PolicyMetrics {
        PolicyMetrics {
            circuit_breaker: self.circuit_breaker.metrics().await,
            rate_limiter: self.rate_limiter.metrics(&self.operation),
        }
    }

    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        E: TransientError + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.rate_limiter.try_acquire(&self.operation) {
            return Err(ResilienceError::RateLimited {
                operation: self.operation.clone(),
            });
        }

        let permit = self.circuit_breaker.try_acquire().await.map_err(|open| {
            warn!(operation = %self.operation, "Circuit open, short-circuiting call");
            ResilienceError::CircuitOpen {
                operation: self.operation.clone(),
                retry_after: open.retry_after,
            }
        })?;

        let deadline = Instant::now() + self.timeout;
        let result = match retry_until(&self.retry, &self.operation, deadline, operation).await {
            Ok(value) => Ok(value),
            Err(RetryError::Permanent(err)) => Err(ResilienceError::Failed(err)),
            Err(RetryError::Exhausted { last, attempts }) => Err(ResilienceError::Exhausted {
                operation: self.operation.clone(),
                last,
                attempts,
            }),
            Err(RetryError::DeadlineExceeded { last, attempts }) => {
                warn!(
                    operation = %self.operation,
                    timeout = ?self.timeout,
                    attempts,
                    error = %last,
                    "Call timed out"
                );
                Err(ResilienceError::TimedOut {
                    operation: self.operation.clone(),
                    timeout: self.timeout,
                })
            }
        };

        let outcome = match &result {
            Ok(_) => CallOutcome::Success,
            Err(ResilienceError::Failed(_)) => CallOutcome::Ignored,
            Err(_) => CallOutcome::Failure,
        };
        debug!(operation = %self.operation, ?outcome, "Recording call outcome");
        self.circuit_breaker.record(permit, outcome).await;

        result
    }
}
