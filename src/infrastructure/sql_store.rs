use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::{Account, AccountNumber};
use crate::infrastructure::account_store::{ensure_persistable, AccountStore, StoreError};

const CREATE_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    account_number TEXT PRIMARY KEY NOT NULL CHECK (length(account_number) = 9),
    balance TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQLite-backed store. The version check and the write happen in one
/// `UPDATE ... WHERE version = ?`, so no row lock is held between the read
/// and the write.
#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        // Every connection to `sqlite::memory:` opens a fresh database, so the
        // pool must keep exactly one connection alive forever.
        let in_memory = database_url.contains(":memory:");
        let max_connections = if in_memory { 1 } else { max_connections };

        let mut options = SqlitePoolOptions::new().max_connections(max_connections);
        if in_memory {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let pool = options
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to account database {database_url}"))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, max_connections, "SQLite account store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_ACCOUNTS_TABLE)
            .execute(&self.pool)
            .await
            .context("Failed to create accounts table")?;
        Ok(())
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account, StoreError> {
        let number: String = row.try_get("account_number").map_err(backend)?;
        let balance: String = row.try_get("balance").map_err(backend)?;
        let version: i64 = row.try_get("version").map_err(backend)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(backend)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(backend)?;

        Ok(Account {
            account_number: AccountNumber::parse(&number)
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            balance: Decimal::from_str(&balance)
                .map_err(|e| StoreError::Backend(format!("corrupt balance '{balance}': {e}")))?,
            version,
            created_at,
            updated_at,
        })
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn find_by_account_number(
        &self,
        account_number: &AccountNumber,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(
            "SELECT account_number, balance, version, created_at, updated_at \
             FROM accounts WHERE account_number = ?",
        )
        .bind(account_number.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    async fn conditional_save(&self, account: &Account) -> Result<Account, StoreError> {
        ensure_persistable(account)?;
        let updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE accounts SET balance = ?, version = version + 1, updated_at = ? \
             WHERE account_number = ? AND version = ?",
        )
        .bind(account.balance.to_string())
        .bind(updated_at)
        .bind(account.account_number.as_str())
        .bind(account.version)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            // Lost the race or the row is gone; tell the caller which.
            return match self.find_by_account_number(&account.account_number).await? {
                Some(current) => Err(StoreError::Conflict {
                    account_number: account.account_number.clone(),
                    expected: account.version,
                    actual: current.version,
                }),
                None => Err(StoreError::NotFound(account.account_number.clone())),
            };
        }

        debug!(
            account_number = %account.account_number,
            version = account.version + 1,
            "Conditional update committed"
        );

        Ok(Account {
            version: account.version + 1,
            updated_at,
            ..account.clone()
        })
    }

    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        ensure_persistable(&account)?;

        let result = sqlx::query(
            "INSERT INTO accounts (account_number, balance, version, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(account_number) DO NOTHING",
        )
        .bind(account.account_number.as_str())
        .bind(account.balance.to_string())
        .bind(account.version)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(account.account_number));
        }
        Ok(account)
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }
}
