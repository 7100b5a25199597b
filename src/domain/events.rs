use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::domain::account::AccountNumber;

/// Terminal outcome reported to the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Success,
    /// Rejected by a business rule (unknown account, insufficient funds, ...).
    Declined,
    /// The resilience fallback answered instead of the core.
    Failed,
}

/// Immutable record of one withdrawal outcome. Created, published, dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalEvent {
    pub amount: Decimal,
    pub account_number: AccountNumber,
    pub status: EventStatus,
    #[serde(skip_serializing)]
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl WithdrawalEvent {
    pub fn new(account_number: AccountNumber, amount: Decimal, status: EventStatus) -> Self {
        Self {
            amount,
            account_number,
            status,
            occurred_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"amount\":\"{}\",\"accountNumber\":\"{}\",\"status\":\"{}\"}}",
                self.amount, self.account_number, self.status
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_event_json_shape() {
        let event = WithdrawalEvent::new(
            AccountNumber::parse("123456789").unwrap(),
            dec!(100.00),
            EventStatus::Success,
        );

        assert_eq!(
            event.to_json(),
            r#"{"amount":"100.00","accountNumber":"123456789","status":"SUCCESS"}"#
        );
    }

    #[test]
    fn test_event_status_tokens() {
        assert_eq!(EventStatus::Declined.to_string(), "DECLINED");
        assert_eq!(EventStatus::Failed.as_ref(), "FAILED");
    }
}
