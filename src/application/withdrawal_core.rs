use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{Account, WithdrawalError, WithdrawalRequest, WithdrawalResult};
use crate::infrastructure::account_store::{AccountStore, StoreError};
use crate::infrastructure::retry::{retry_with_backoff_if, RetryConfig};

impl From<StoreError> for WithdrawalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(account_number) => WithdrawalError::AccountNotFound { account_number },
            StoreError::Conflict {
                account_number,
                expected,
                actual,
            } => WithdrawalError::Conflict {
                account_number,
                expected,
                actual,
            },
            other => WithdrawalError::Infrastructure(other.to_string()),
        }
    }
}

/// Applies one withdrawal to one account under optimistic concurrency.
///
/// Each attempt reads the account afresh, validates against that read, and
/// writes back conditionally on the version it saw. A lost race restarts the
/// whole attempt; nothing computed in a failed attempt is reused.
pub struct WithdrawalProcessor {
    store: Arc<dyn AccountStore>,
    conflict_retry: RetryConfig,
}

impl WithdrawalProcessor {
    pub fn new(store: Arc<dyn AccountStore>, conflict_retry: RetryConfig) -> Self {
        Self {
            store,
            conflict_retry,
        }
    }

    pub async fn process_withdrawal(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<WithdrawalResult, WithdrawalError> {
        info!(
            account_number = %request.account_number,
            amount = %request.amount,
            "Processing withdrawal"
        );

        let result = retry_with_backoff_if(
            &self.conflict_retry,
            "optimistic-withdrawal",
            WithdrawalError::is_conflict,
            || self.attempt(request),
        )
        .await
        .map_err(|err| err.into_inner());

        match &result {
            Ok(result) => info!(
                account_number = %result.account_number,
                new_balance = %result.current_balance,
                "Withdrawal successful"
            ),
            Err(err) if err.is_business() => warn!(
                account_number = %request.account_number,
                error = %err,
                "Withdrawal rejected by business rule"
            ),
            Err(err) => warn!(
                account_number = %request.account_number,
                error = %err,
                "Withdrawal attempt failed"
            ),
        }

        result
    }

    async fn attempt(&self, request: &WithdrawalRequest) -> Result<WithdrawalResult, WithdrawalError> {
        let account: Account = self
            .store
            .find_by_account_number(&request.account_number)
            .await?
            .ok_or_else(|| WithdrawalError::AccountNotFound {
                account_number: request.account_number.clone(),
            })?;

        let debited = account.debit(request.amount)?;
        let saved = self.store.conditional_save(&debited).await.map_err(|err| {
            if let StoreError::Conflict { expected, actual, .. } = &err {
                debug!(
                    account_number = %request.account_number,
                    expected,
                    actual,
                    "Lost optimistic race, re-reading account"
                );
            }
            WithdrawalError::from(err)
        })?;

        Ok(WithdrawalResult::success(
            saved.account_number,
            request.amount,
            saved.balance,
        ))
    }
}
