use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::WithdrawalError;

/// Scale used for every monetary value handled by the service.
pub const MONEY_SCALE: u32 = 2;

const ACCOUNT_NUMBER_LEN: usize = 9;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum AccountError {
    #[error("Account number must be exactly 9 digits, got '{0}'")]
    InvalidAccountNumber(String),
    #[error("Balance cannot be negative: {0}")]
    NegativeBalance(Decimal),
}

/// Nine ASCII digits identifying an account. Leading zeros are significant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn parse(value: &str) -> Result<Self, AccountError> {
        if value.len() == ACCOUNT_NUMBER_LEN && value.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(value.to_string()))
        } else {
            Err(AccountError::InvalidAccountNumber(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `****` followed by the last four digits, for customer-facing text.
    pub fn masked(&self) -> String {
        format!("****{}", &self.0[ACCOUNT_NUMBER_LEN - 4..])
    }
}

impl FromStr for AccountNumber {
    type Err = AccountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = AccountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a monetary amount to two decimal places.
pub fn to_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp(MONEY_SCALE);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Persisted account state.
///
/// `version` is the optimistic-concurrency token: a store only accepts a
/// write whose version matches the one it holds, and bumps it by one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub account_number: AccountNumber,
    pub balance: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn open(account_number: AccountNumber, initial_balance: Decimal) -> Result<Self, AccountError> {
        if initial_balance.is_sign_negative() && !initial_balance.is_zero() {
            return Err(AccountError::NegativeBalance(initial_balance));
        }

        let now = Utc::now();
        Ok(Account {
            account_number,
            balance: to_money(initial_balance),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns a copy carrying the debited balance and the *same* version,
    /// ready to be handed to a conditional save. Amounts finer than a cent are
    /// rejected, so the new balance is always exact.
    pub fn debit(&self, amount: Decimal) -> Result<Account, WithdrawalError> {
        if amount <= Decimal::ZERO || amount.normalize().scale() > MONEY_SCALE {
            return Err(WithdrawalError::InvalidAmount {
                account_number: self.account_number.clone(),
                amount,
            });
        }
        if self.balance < amount {
            return Err(WithdrawalError::InsufficientFunds {
                account_number: self.account_number.clone(),
                available: self.balance,
                requested: amount,
            });
        }

        Ok(Account {
            balance: to_money(self.balance - amount),
            ..self.clone()
        })
    }
}
