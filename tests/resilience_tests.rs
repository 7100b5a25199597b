use anyhow::Result;
use async_trait::async_trait;
use banking_withdrawals::application::{WithdrawalOutcome, WithdrawalProcessor, WithdrawalService};
use banking_withdrawals::domain::{Account, AccountNumber, WithdrawalError, WithdrawalRequest, WithdrawalStatus};
use banking_withdrawals::infrastructure::account_store::{AccountStore, InMemoryAccountStore, StoreError};
use banking_withdrawals::infrastructure::circuit_breaker::CircuitState;
use banking_withdrawals::infrastructure::notification::{LoggingEventPublisher, NotificationConfig, WithdrawalNotifier};
use banking_withdrawals::infrastructure::rate_limiter::RateLimitConfig;
use banking_withdrawals::infrastructure::resilience::{ResilienceConfig, ResiliencePolicy};
use banking_withdrawals::infrastructure::retry::RetryConfig;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const ACCOUNT: &str = "123456789";

/// Counts every store call and can fail the first `failing_saves` writes.
/// `ack_delay` holds back the reply of a write that has already committed.
struct CountingStore {
    inner: InMemoryAccountStore,
    reads: AtomicUsize,
    saves: AtomicUsize,
    failing_saves: usize,
    ack_delay: Duration,
}

impl CountingStore {
    fn new(failing_saves: usize) -> Self {
        Self {
            inner: InMemoryAccountStore::new(),
            reads: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            failing_saves,
            ack_delay: Duration::ZERO,
        }
    }

    fn with_ack_delay(ack_delay: Duration) -> Self {
        Self {
            ack_delay,
            ..Self::new(0)
        }
    }

    fn calls(&self) -> usize {
        self.reads.load(Ordering::SeqCst) + self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountStore for CountingStore {
    async fn find_by_account_number(&self, account_number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_account_number(account_number).await
    }

    async fn conditional_save(&self, account: &Account) -> Result<Account, StoreError> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst);
        if n < self.failing_saves {
            return Err(StoreError::Backend("connection reset by peer".into()));
        }
        let saved = self.inner.conditional_save(account).await;
        if !self.ack_delay.is_zero() {
            tokio::time::sleep(self.ack_delay).await;
        }
        saved
    }

    async fn insert(&self, account: Account) -> Result<Account, StoreError> {
        self.inner.insert(account).await
    }

    async fn count(&self) -> Result<usize, StoreError> {
        self.inner.count().await
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    }
}

async fn service_with(store: Arc<CountingStore>, config: ResilienceConfig) -> Result<WithdrawalService> {
    store
        .insert(Account::open(AccountNumber::parse(ACCOUNT)?, dec!(7670.00))?)
        .await?;

    let processor = Arc::new(WithdrawalProcessor::new(store, fast_retry()));
    let policy = ResiliencePolicy::new("withdrawal", config);
    let (notifier, _worker) = WithdrawalNotifier::spawn(
        Arc::new(LoggingEventPublisher::default()),
        NotificationConfig::default(),
        CancellationToken::new(),
    );
    Ok(WithdrawalService::new(processor, policy, notifier))
}

fn request(amount: rust_decimal::Decimal) -> Result<WithdrawalRequest> {
    Ok(WithdrawalRequest::new(AccountNumber::parse(ACCOUNT)?, amount))
}

fn fast_config() -> ResilienceConfig {
    ResilienceConfig {
        retry: fast_retry(),
        ..ResilienceConfig::default()
    }
}

#[tokio::test]
async fn test_forced_open_circuit_never_touches_store() -> Result<()> {
    let store = Arc::new(CountingStore::new(0));
    let service = service_with(store.clone(), fast_config()).await?;
    service.policy().circuit_breaker().force_open().await;

    let started = Instant::now();
    for _ in 0..20 {
        match service.withdraw(request(dec!(10.00))?).await? {
            WithdrawalOutcome::Degraded(fallback) => {
                assert_eq!(fallback.result.message, WithdrawalStatus::TemporarilyUnavailable);
                assert_eq!(fallback.result.current_balance, dec!(0.00));
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.calls(), 0);
    assert_eq!(service.policy().circuit_breaker().state().await, CircuitState::ForcedOpen);
    Ok(())
}

#[tokio::test]
async fn test_business_error_is_single_attempt_without_backoff() -> Result<()> {
    let store = Arc::new(CountingStore::new(0));
    let config = ResilienceConfig {
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
        },
        ..ResilienceConfig::default()
    };
    let service = service_with(store.clone(), config).await?;

    let started = Instant::now();
    let err = service.withdraw(request(dec!(999999.00))?).await.unwrap_err();

    assert!(matches!(err, WithdrawalError::InsufficientFunds { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);

    let account = store
        .find_by_account_number(&AccountNumber::parse(ACCOUNT)?)
        .await?
        .expect("seeded");
    assert_eq!(account.balance, dec!(7670.00));
    Ok(())
}

#[tokio::test]
async fn test_unknown_account_is_not_found_and_not_counted_as_failure() -> Result<()> {
    let store = Arc::new(CountingStore::new(0));
    let service = service_with(store.clone(), fast_config()).await?;
    let unknown = WithdrawalRequest::new(AccountNumber::parse("000000000")?, dec!(10.00));

    for _ in 0..10 {
        let err = service.withdraw(unknown.clone()).await.unwrap_err();
        assert!(matches!(err, WithdrawalError::AccountNotFound { .. }));
    }

    assert_eq!(service.policy().circuit_breaker().state().await, CircuitState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_transient_write_failures_are_retried_and_applied_once() -> Result<()> {
    let store = Arc::new(CountingStore::new(2));
    let service = service_with(store.clone(), fast_config()).await?;

    let outcome = service.withdraw(request(dec!(100.00))?).await?;

    match outcome {
        WithdrawalOutcome::Completed(result) => assert_eq!(result.current_balance, dec!(7570.00)),
        other => panic!("expected success, got {other:?}"),
    }
    let account = store
        .find_by_account_number(&AccountNumber::parse(ACCOUNT)?)
        .await?
        .expect("seeded");
    assert_eq!(account.balance, dec!(7570.00));
    assert_eq!(account.version, 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_commit_acknowledged_after_timeout_is_reported_as_success() -> Result<()> {
    let store = Arc::new(CountingStore::with_ack_delay(Duration::from_millis(200)));
    let config = ResilienceConfig {
        timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let service = service_with(store.clone(), config).await?;

    let outcome = service.withdraw(request(dec!(100.00))?).await?;

    match outcome {
        WithdrawalOutcome::Completed(result) => {
            assert_eq!(result.message, WithdrawalStatus::Success);
            assert_eq!(result.current_balance, dec!(7570.00));
        }
        other => panic!("committed withdrawal reported as {other:?}"),
    }
    let account = store
        .find_by_account_number(&AccountNumber::parse(ACCOUNT)?)
        .await?
        .expect("seeded");
    assert_eq!(account.balance, dec!(7570.00));
    assert_eq!(account.version, 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_persistent_failures_open_the_circuit() -> Result<()> {
    let store = Arc::new(CountingStore::new(usize::MAX));
    let config = ResilienceConfig {
        retry: RetryConfig {
            max_attempts: 1,
            ..fast_retry()
        },
        ..fast_config()
    };
    let service = service_with(store.clone(), config).await?;

    for _ in 0..5 {
        let outcome = service.withdraw(request(dec!(1.00))?).await?;
        assert!(matches!(outcome, WithdrawalOutcome::Degraded(_)));
    }
    assert_eq!(service.policy().circuit_breaker().state().await, CircuitState::Open);

    let calls_before = store.calls();
    let outcome = service.withdraw(request(dec!(1.00))?).await?;
    match outcome {
        WithdrawalOutcome::Degraded(fallback) => {
            assert!(fallback.retry_after <= Duration::from_secs(30));
            assert!(fallback.retry_after > Duration::from_secs(25));
        }
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(store.calls(), calls_before);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_rejections_use_fallback() -> Result<()> {
    let store = Arc::new(CountingStore::new(0));
    let config = ResilienceConfig {
        rate_limit: RateLimitConfig {
            limit_for_period: 2,
            limit_refresh_period: Duration::from_secs(60),
        },
        ..fast_config()
    };
    let service = service_with(store.clone(), config).await?;

    let mut completed = 0;
    let mut degraded = 0;
    for _ in 0..5 {
        match service.withdraw(request(dec!(1.00))?).await? {
            WithdrawalOutcome::Completed(_) => completed += 1,
            WithdrawalOutcome::Degraded(fallback) => {
                assert_eq!(fallback.result.message, WithdrawalStatus::TemporarilyUnavailable);
                degraded += 1;
            }
        }
    }

    assert_eq!(completed, 2);
    assert_eq!(degraded, 3);
    Ok(())
}
