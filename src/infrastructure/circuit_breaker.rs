//! Count-based circuit breaker.
//!
//! - **Closed**: calls pass; the last `sliding_window_size` outcomes are kept and
//!   the circuit opens once the failure rate reaches the threshold.
//! - **Open**: calls are rejected until `wait_duration_in_open_state` elapses.
//! - **HalfOpen**: a fixed number of trial calls probe recovery; their failure
//!   rate decides between Closed and Open.
//!
//! The state lock is only held to admit a call or to record its outcome,
//! never while the protected operation runs.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Percentage (0-100) of failed calls that opens the circuit.
    pub failure_rate_threshold: f64,
    pub sliding_window_size: usize,
    /// Outcomes that must be buffered before the failure rate is evaluated.
    pub minimum_number_of_calls: usize,
    pub wait_duration_in_open_state: Duration,
    pub permitted_calls_in_half_open: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_number_of_calls: 5,
            wait_duration_in_open_state: Duration::from_secs(30),
            permitted_calls_in_half_open: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
    ForcedOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    /// Not counted either way (business errors).
    Ignored,
}

/// Proof of admission; hand it back to [`CircuitBreaker::record`].
#[derive(Debug)]
#[must_use]
pub struct CallPermit {
    generation: u64,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
#[error("Circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    pub name: String,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_rate: f64,
    pub buffered_calls: usize,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub ignored_calls: u64,
    pub not_permitted_calls: u64,
}

#[derive(Debug)]
enum Phase {
    Closed {
        window: VecDeque<bool>,
    },
    Open {
        since: Instant,
    },
    HalfOpen {
        since: Instant,
        admitted: usize,
        outcomes: Vec<bool>,
    },
    ForcedOpen,
}

#[derive(Debug)]
struct Inner {
    phase: Phase,
    // Bumped on every transition so late outcomes from a previous phase are dropped.
    generation: u64,
}

impl Inner {
    fn transition(&mut self, phase: Phase) {
        self.phase = phase;
        self.generation += 1;
    }
}

fn failure_rate(outcomes: impl Iterator<Item = bool>) -> (f64, usize) {
    let (failures, total) = outcomes.fold((0usize, 0usize), |(f, t), failed| {
        (f + usize::from(failed), t + 1)
    });
    if total == 0 {
        (0.0, 0)
    } else {
        (failures as f64 * 100.0 / total as f64, total)
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    ignored_calls: AtomicU64,
    not_permitted_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                phase: Phase::Closed {
                    window: VecDeque::new(),
                },
                generation: 0,
            }),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            ignored_calls: AtomicU64::new(0),
            not_permitted_calls: AtomicU64::new(0),
        }
    }

    pub async fn try_acquire(&self) -> Result<CallPermit, CircuitOpenError> {
        let wait = self.config.wait_duration_in_open_state;
        let permitted = self.config.permitted_calls_in_half_open.max(1);
        let mut inner = self.inner.lock().await;
        let generation = inner.generation;

        let rejection = match &mut inner.phase {
            Phase::Closed { .. } => None,
            Phase::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= wait {
                    None
                } else {
                    Some(wait - elapsed)
                }
            }
            Phase::HalfOpen {
                since, admitted, ..
            } => {
                if *admitted < permitted {
                    *admitted += 1;
                    return Ok(CallPermit { generation });
                }
                let elapsed = since.elapsed();
                if elapsed >= wait {
                    // Trials never reported back (caller dropped); start over.
                    None
                } else {
                    Some(wait - elapsed)
                }
            }
            Phase::ForcedOpen => Some(wait),
        };

        if let Some(retry_after) = rejection {
            self.not_permitted_calls.fetch_add(1, Ordering::Relaxed);
            debug!(circuit = %self.name, ?retry_after, "Call not permitted");
            return Err(CircuitOpenError {
                name: self.name.clone(),
                retry_after,
            });
        }

        if !matches!(inner.phase, Phase::Closed { .. }) {
            info!(circuit = %self.name, "Circuit breaker transitioning to HALF_OPEN");
            inner.transition(Phase::HalfOpen {
                since: Instant::now(),
                admitted: 1,
                outcomes: Vec::with_capacity(permitted),
            });
        }

        Ok(CallPermit {
            generation: inner.generation,
        })
    }

    pub async fn record(&self, permit: CallPermit, outcome: CallOutcome) {
        match outcome {
            CallOutcome::Success => self.successful_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Failure => self.failed_calls.fetch_add(1, Ordering::Relaxed),
            CallOutcome::Ignored => self.ignored_calls.fetch_add(1, Ordering::Relaxed),
        };

        let threshold = self.config.failure_rate_threshold;
        let mut inner = self.inner.lock().await;
        if permit.generation != inner.generation {
            debug!(circuit = %self.name, ?outcome, "Discarding outcome from a previous state");
            return;
        }

        let next = match &mut inner.phase {
            Phase::Closed { window } => {
                if outcome == CallOutcome::Ignored {
                    return;
                }
                window.push_back(outcome == CallOutcome::Failure);
                let size = self.config.sliding_window_size.max(1);
                while window.len() > size {
                    window.pop_front();
                }

                let minimum = self.config.minimum_number_of_calls.clamp(1, size);
                let (rate, total) = failure_rate(window.iter().copied());
                if total >= minimum && rate >= threshold {
                    warn!(
                        circuit = %self.name,
                        failure_rate = rate,
                        threshold,
                        "Circuit breaker transitioning CLOSED -> OPEN"
                    );
                    Some(Phase::Open {
                        since: Instant::now(),
                    })
                } else {
                    None
                }
            }
            Phase::HalfOpen {
                admitted, outcomes, ..
            } => {
                if outcome == CallOutcome::Ignored {
                    *admitted = admitted.saturating_sub(1);
                    return;
                }
                outcomes.push(outcome == CallOutcome::Failure);
                if outcomes.len() < self.config.permitted_calls_in_half_open.max(1) {
                    None
                } else {
                    let (rate, _) = failure_rate(outcomes.iter().copied());
                    if rate >= threshold {
                        warn!(circuit = %self.name, failure_rate = rate, "Circuit breaker transitioning HALF_OPEN -> OPEN");
                        Some(Phase::Open {
                            since: Instant::now(),
                        })
                    } else {
                        info!(circuit = %self.name, failure_rate = rate, "Circuit breaker transitioning HALF_OPEN -> CLOSED");
                        Some(Phase::Closed {
                            window: VecDeque::new(),
                        })
                    }
                }
            }
            Phase::Open { .. } | Phase::ForcedOpen => None,
        };

        if let Some(phase) = next {
            inner.transition(phase);
        }
    }

    pub async fn state(&self) -> CircuitState {
        match self.inner.lock().await.phase {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
            Phase::ForcedOpen => CircuitState::ForcedOpen,
        }
    }

    /// Rejects every call until [`CircuitBreaker::reset`].
    pub async fn force_open(&self) {
        warn!(circuit = %self.name, "Circuit breaker forced open");
        self.inner.lock().await.transition(Phase::ForcedOpen);
    }

    pub async fn reset(&self) {
        info!(circuit = %self.name, "Circuit breaker reset to CLOSED");
        self.inner.lock().await.transition(Phase::Closed {
            window: VecDeque::new(),
        });
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().await;
        let (state, (failure_rate, buffered_calls)) = match &inner.phase {
            Phase::Closed { window } => (CircuitState::Closed, failure_rate(window.iter().copied())),
            Phase::Open { .. } => (CircuitState::Open, (0.0, 0)),
            Phase::HalfOpen { outcomes, .. } => {
                (CircuitState::HalfOpen, failure_rate(outcomes.iter().copied()))
            }
            Phase::ForcedOpen => (CircuitState::ForcedOpen, (0.0, 0)),
        };

        CircuitBreakerMetrics {
            state,
            failure_rate,
            buffered_calls,
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            ignored_calls: self.ignored_calls.load(Ordering::Relaxed),
            not_permitted_calls: self.not_permitted_calls.load(Ordering::Relaxed),
        }
    }
}
