use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::domain::{Account, AccountNumber};

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    NotFound(AccountNumber),
    #[error("Account already exists: {0}")]
    AlreadyExists(AccountNumber),
    #[error("Version conflict on account {account_number}: expected {expected}, found {actual}")]
    Conflict {
        account_number: AccountNumber,
        expected: i64,
        actual: i64,
    },
    #[error("Refusing to persist invalid state: {0}")]
    InvalidState(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Durable map from account number to balance and version.
///
/// `conditional_save` is the only mutation path for existing accounts: it
/// succeeds only when the stored version equals `account.version`, and on
/// success atomically bumps the version by one and stamps `updated_at`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    async fn find_by_account_number(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError>;

    async fn conditional_save(&self, account: &Account) -> Result<Account, StoreError>;

    /// Provisioning path; fails with `AlreadyExists` for a known number.
    async fn insert(&self, account: Account) -> Result<Account, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub(crate) fn ensure_persistable(account: &Account) -> Result<(), StoreError> {
    if account.balance < Decimal::ZERO {
        return Err(StoreError::InvalidState(format!(
            "negative balance {} for account {}",
            account.balance, account.account_number
        )));
    }
    Ok(())
}

/// Reference store. A `DashMap` entry holds its shard lock for the whole
/// compare-and-swap, so two writers can never both match the same version.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<AccountNumber, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_account_number(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(account_number).map(|entry| entry.value().clone()))
    }

    async fn conditional_save(&self, account: &Account) -> Result<Account, StoreError> {
        ensure_persistable(account)?;

        let mut stored = self
            .accounts
            .get_mut(&account.account_number)
            .ok_or_else(|| StoreError::NotFound(account.account_number.clone()))?;

        if stored.version != account.version {
            return Err(StoreError::Conflict {
                account_number: account.account_number.clone(),
                expected: account.version,
                actual: stored.version,
            });
        }

        stored.balance = account.balance;
        stored.version += 1;
        stored.updated_at = Utc::now();
        debug!(
            account_number = %stored.account_number,
            version = stored.version,
            "Conditional save applied"
        );

        Ok(stored.clone())
    }

    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        ensure_persistable(&account)?;

        match self.accounts.entry(account.account_number.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(account.account_number)),
            Entry::Vacant(slot) => {
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.accounts.len())
    }
}
