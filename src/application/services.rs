use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::application::withdrawal_core::WithdrawalProcessor;
use crate::domain::{EventStatus, WithdrawalError, WithdrawalRequest, WithdrawalResult, WithdrawalStatus};
use crate::infrastructure::notification::{NotifierMetrics, WithdrawalNotifier};
use crate::infrastructure::resilience::{PolicyMetrics, ResilienceError, ResiliencePolicy};

/// Substitute answer produced when the protections tripped.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackResponse {
    pub result: WithdrawalResult,
    pub retry_after: Duration,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawalOutcome {
    Completed(WithdrawalResult),
    Degraded(FallbackResponse),
}

#[derive(Debug, Clone)]
pub struct ServiceHealth {
    pub policy: PolicyMetrics,
    pub notifications: NotifierMetrics,
}

/// Entry point used by the boundary: the core wrapped in the resilience
/// policy, with every terminal outcome handed to the notifier.
pub struct WithdrawalService {
    processor: Arc<WithdrawalProcessor>,
    policy: ResiliencePolicy,
    notifier: WithdrawalNotifier,
}

impl WithdrawalService {
    pub fn new(processor: Arc<WithdrawalProcessor>, policy: ResiliencePolicy, notifier: WithdrawalNotifier) -> Self {
        Self {
            processor,
            policy,
            notifier,
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// Business and validation errors come back as `Err` untouched. Every
    /// other failure is answered by the fallback.
    #[instrument(skip(self, request), fields(account_number = %request.account_number, amount = %request.amount))]
    pub async fn withdraw(&self, request: WithdrawalRequest) -> Result<WithdrawalOutcome, WithdrawalError> {
        let processor = &self.processor;
        let result = self
            .policy
            .execute(|| processor.process_withdrawal(&request))
            .await;

        match result {
            Ok(result) => {
                self.notifier
                    .notify(&result.account_number, result.amount_withdrawn, EventStatus::Success);
                Ok(WithdrawalOutcome::Completed(result))
            }
            Err(ResilienceError::Failed(err)) => {
                self.notifier
                    .notify(&request.account_number, request.amount, EventStatus::Declined);
                Err(err)
            }
            Err(err) => {
                let fallback = self.fallback(&request, &err);
                self.notifier
                    .notify(&request.account_number, request.amount, EventStatus::Failed);
                Ok(WithdrawalOutcome::Degraded(fallback))
            }
        }
    }

    fn fallback(&self, request: &WithdrawalRequest, err: &ResilienceError<WithdrawalError>) -> FallbackResponse {
        let status = match err {
            ResilienceError::Exhausted { last, .. } if last.is_conflict() => {
                WithdrawalStatus::ConcurrentUpdateDetected
            }
            _ => WithdrawalStatus::TemporarilyUnavailable,
        };
        let retry_after = match err {
            ResilienceError::CircuitOpen { retry_after, .. } => *retry_after,
            _ => self.policy.default_retry_after(),
        };

        warn!(
            account_number = %request.account_number,
            amount = %request.amount,
            %status,
            reason = %err,
            "Withdrawal fallback engaged"
        );

        FallbackResponse {
            result: WithdrawalResult::degraded(request.account_number.clone(), status),
            retry_after,
            reason: err.to_string(),
        }
    }

    pub async fn health(&self) -> ServiceHealth {
        let health = ServiceHealth {
            policy: self.policy.metrics().await,
            notifications: self.notifier.metrics(),
        };
        info!(
            circuit_state = ?health.policy.circuit_breaker.state,
            dropped_notifications = health.notifications.dropped,
            "Health snapshot"
        );
        health
    }
}
