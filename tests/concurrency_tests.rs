use anyhow::Result;
use banking_withdrawals::domain::{Account, AccountNumber, WithdrawalRequest};
use banking_withdrawals::infrastructure::account_store::{AccountStore, InMemoryAccountStore};
use banking_withdrawals::infrastructure::retry::RetryConfig;
use banking_withdrawals::infrastructure::sql_store::SqliteAccountStore;
use banking_withdrawals::WithdrawalProcessor;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const ACCOUNT: &str = "123456789";

fn patient_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 100,
        initial_delay: Duration::from_millis(1),
        multiplier: 1.2,
        max_delay: Duration::from_millis(5),
    }
}

async fn seed(store: &dyn AccountStore, balance: Decimal) -> Result<AccountNumber> {
    let number = AccountNumber::parse(ACCOUNT)?;
    store.insert(Account::open(number.clone(), balance)?).await?;
    Ok(number)
}

/// Runs `amounts` concurrently and returns the sum of the successful ones.
async fn run_concurrently(store: Arc<dyn AccountStore>, number: &AccountNumber, amounts: &[Decimal]) -> (Decimal, usize) {
    let processor = Arc::new(WithdrawalProcessor::new(store, patient_retry()));

    let tasks = amounts.iter().map(|amount| {
        let processor = processor.clone();
        let request = WithdrawalRequest::new(number.clone(), *amount);
        tokio::spawn(async move { processor.process_withdrawal(&request).await })
    });

    let mut withdrawn = Decimal::ZERO;
    let mut successes = 0;
    for joined in join_all(tasks).await {
        if let Ok(Ok(result)) = joined {
            withdrawn += result.amount_withdrawn;
            successes += 1;
        }
    }
    (withdrawn, successes)
}

async fn assert_funds_invariant(store: Arc<dyn AccountStore>) -> Result<()> {
    let initial = dec!(1000.00);
    let number = seed(store.as_ref(), initial).await?;
    let amounts: Vec<Decimal> = (0..40).map(|i| dec!(5.00) + Decimal::from(i % 4)).collect();

    let (withdrawn, successes) = run_concurrently(store.clone(), &number, &amounts).await;

    let account = store.find_by_account_number(&number).await?.expect("account exists");
    assert!(successes > 0);
    assert_eq!(account.balance, initial - withdrawn);
    assert_eq!(account.version, successes as i64);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_funds_invariant_in_memory() -> Result<()> {
    assert_funds_invariant(Arc::new(InMemoryAccountStore::new())).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_funds_invariant_sqlite() -> Result<()> {
    let store = SqliteAccountStore::connect("sqlite::memory:", 1).await?;
    assert_funds_invariant(Arc::new(store)).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contention_never_overdraws() -> Result<()> {
    let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
    let number = seed(store.as_ref(), dec!(100.00)).await?;
    let amounts = vec![dec!(30.00); 10];

    let (withdrawn, successes) = run_concurrently(store.clone(), &number, &amounts).await;

    let account = store.find_by_account_number(&number).await?.expect("account exists");
    assert_eq!(successes, 3);
    assert_eq!(withdrawn, dec!(90.00));
    assert_eq!(account.balance, dec!(10.00));
    assert_eq!(account.version, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_withdrawals_both_apply() -> Result<()> {
    let store: Arc<dyn AccountStore> = Arc::new(InMemoryAccountStore::new());
    let number = seed(store.as_ref(), dec!(500.00)).await?;

    let (withdrawn, successes) = run_concurrently(store.clone(), &number, &[dec!(120.00), dec!(80.50)]).await;

    let account = store.find_by_account_number(&number).await?.expect("account exists");
    assert_eq!(successes, 2);
    assert_eq!(withdrawn, dec!(200.50));
    assert_eq!(account.balance, dec!(299.50));
    Ok(())
}

#[tokio::test]
async fn test_reads_are_idempotent() -> Result<()> {
    let store = InMemoryAccountStore::new();
    let number = seed(&store, dec!(7670.00)).await?;

    let first = store.find_by_account_number(&number).await?;
    let second = store.find_by_account_number(&number).await?;

    assert_eq!(first, second);
    Ok(())
}
