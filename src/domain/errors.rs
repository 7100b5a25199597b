use rust_decimal::Decimal;

use crate::domain::account::AccountNumber;

/// Coarse classification consulted by the retry policy and by the HTTP
/// boundary when choosing a status code. `Unavailable` is never produced by
/// the core itself; it marks fallback responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    BusinessRule,
    Transient,
    Unavailable,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum WithdrawalError {
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Account not found: {account_number}")]
    AccountNotFound { account_number: AccountNumber },
    #[error(
        "Insufficient funds in account: {account_number}. Current balance: {available}, Requested amount: {requested}"
    )]
    InsufficientFunds {
        account_number: AccountNumber,
        available: Decimal,
        requested: Decimal,
    },
    #[error("Withdrawal amount must be greater than zero with at most 2 decimal places for account {account_number}, got {amount}")]
    InvalidAmount {
        account_number: AccountNumber,
        amount: Decimal,
    },
    #[error("Concurrent update on account {account_number}: expected version {expected}, found {actual}")]
    Conflict {
        account_number: AccountNumber,
        expected: i64,
        actual: i64,
    },
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),
}

impl WithdrawalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WithdrawalError::Validation(_) => ErrorKind::Validation,
            WithdrawalError::AccountNotFound { .. } => ErrorKind::NotFound,
            WithdrawalError::InsufficientFunds { .. } | WithdrawalError::InvalidAmount { .. } => {
                ErrorKind::BusinessRule
            }
            WithdrawalError::Conflict { .. } | WithdrawalError::Infrastructure(_) => {
                ErrorKind::Transient
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, WithdrawalError::Conflict { .. })
    }

    /// Business and validation errors are facts about the request; they are
    /// never retried and never routed to the fallback.
    pub fn is_business(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::BusinessRule
        )
    }
}
