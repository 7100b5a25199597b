use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::domain::{Account, AccountNumber};
use crate::infrastructure::account_store::AccountStore;

pub fn demo_accounts() -> [(&'static str, Decimal); 4] {
    [
        ("123456789", dec!(7670.00)),
        ("987654321", dec!(20000.00)),
        ("012345678", dec!(1.00)),
        ("087654321", dec!(9000000.00)),
    ]
}

/// Inserts the demo accounts into an empty store. Returns how many were created.
pub async fn seed_demo_accounts(store: &dyn AccountStore) -> Result<usize> {
    let existing = store.count().await.context("Failed to count accounts")?;
    if existing > 0 {
        info!(existing, "Account store already populated, skipping demo seed");
        return Ok(0);
    }

    let accounts = demo_accounts();
    for (number, balance) in accounts {
        let account_number = AccountNumber::parse(number)?;
        let account = Account::open(account_number, balance)?;
        store
            .insert(account)
            .await
            .with_context(|| format!("Failed to seed account {number}"))?;
    }

    info!(seeded = accounts.len(), "Seeded demo accounts");
    Ok(accounts.len())
}
