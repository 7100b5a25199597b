use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::domain::account::{to_money, AccountNumber};

/// Status token carried in the `message` field of a withdrawal result.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Success,
    /// Optimistic-write conflicts kept winning until retries ran out.
    ConcurrentUpdateDetected,
    /// Open circuit, rate limit, timeout or a failing store.
    TemporarilyUnavailable,
}

impl WithdrawalStatus {
    pub fn client_hint(&self) -> &'static str {
        match self {
            WithdrawalStatus::Success => "Withdrawal completed",
            WithdrawalStatus::ConcurrentUpdateDetected => "Please try again",
            WithdrawalStatus::TemporarilyUnavailable => "Please try again later",
        }
    }
}

/// A single withdrawal as seen by the core. Audit metadata is carried
/// through for logging only and never checked against stored state.
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawalRequest {
    pub account_number: AccountNumber,
    pub amount: Decimal,
    pub account_name: Option<String>,
    pub account_type: Option<String>,
    pub customer_id: Option<String>,
}

impl WithdrawalRequest {
    pub fn new(account_number: AccountNumber, amount: Decimal) -> Self {
        Self {
            account_number,
            amount,
            account_name: None,
            account_type: None,
            customer_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithdrawalResult {
    pub account_number: AccountNumber,
    pub amount_withdrawn: Decimal,
    pub current_balance: Decimal,
    pub message: WithdrawalStatus,
}

impl WithdrawalResult {
    pub fn success(account_number: AccountNumber, amount: Decimal, new_balance: Decimal) -> Self {
        Self {
            account_number,
            amount_withdrawn: to_money(amount),
            current_balance: to_money(new_balance),
            message: WithdrawalStatus::Success,
        }
    }

    /// Zeroed monetary fields; the status token tells the caller why.
    pub fn degraded(account_number: AccountNumber, status: WithdrawalStatus) -> Self {
        Self {
            account_number,
            amount_withdrawn: to_money(Decimal::ZERO),
            current_balance: to_money(Decimal::ZERO),
            message: status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.message == WithdrawalStatus::Success
    }
}
