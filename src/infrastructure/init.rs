use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::services::WithdrawalService;
use crate::application::withdrawal_core::WithdrawalProcessor;
use crate::infrastructure::account_store::{AccountStore, InMemoryAccountStore};
use crate::infrastructure::config::{AppConfig, StoreBackend};
use crate::infrastructure::notification::{LoggingEventPublisher, WithdrawalNotifier};
use crate::infrastructure::resilience::ResiliencePolicy;
use crate::infrastructure::seed::seed_demo_accounts;
use crate::infrastructure::sql_store::SqliteAccountStore;

pub const WITHDRAWAL_OPERATION: &str = "withdrawal";

const SQLITE_MAX_CONNECTIONS: u32 = 10;

/// The wired service graph plus the background work it owns.
pub struct ServiceContext {
    pub store: Arc<dyn AccountStore>,
    pub withdrawal_service: Arc<WithdrawalService>,
    shutdown: CancellationToken,
    notifier_handle: JoinHandle<()>,
}

impl ServiceContext {
    pub async fn shutdown(self) {
        info!("Starting graceful shutdown of services...");

        self.shutdown.cancel();
        if let Err(e) = self.notifier_handle.await {
            error!("Notification worker ended abnormally: {}", e);
        }

        info!("Service shutdown complete");
    }
}

pub async fn build_store(backend: &StoreBackend) -> Result<Arc<dyn AccountStore>> {
    let store: Arc<dyn AccountStore> = match backend {
        StoreBackend::InMemory => {
            info!("Using in-memory account store");
            Arc::new(InMemoryAccountStore::new())
        }
        StoreBackend::Sqlite { url } => Arc::new(SqliteAccountStore::connect(url, SQLITE_MAX_CONNECTIONS).await?),
    };
    Ok(store)
}

/// Store, then core, then the policy around it, then the notifier.
pub async fn init_all_services(config: &AppConfig) -> Result<ServiceContext> {
    let store = build_store(&config.store).await?;
    init_with_store(config, store).await
}

pub async fn init_with_store(config: &AppConfig, store: Arc<dyn AccountStore>) -> Result<ServiceContext> {
    if config.seed_demo_accounts {
        seed_demo_accounts(store.as_ref()).await?;
    }

    let processor = Arc::new(WithdrawalProcessor::new(store.clone(), config.conflict_retry.clone()));
    let policy = ResiliencePolicy::new(WITHDRAWAL_OPERATION, config.resilience.clone());

    let shutdown = CancellationToken::new();
    let publisher = Arc::new(LoggingEventPublisher::new(
        config.notification.simulate_delay,
        config.notification.failure_rate,
    ));
    let (notifier, notifier_handle) =
        WithdrawalNotifier::spawn(publisher, config.notification.clone(), shutdown.clone());

    let withdrawal_service = Arc::new(WithdrawalService::new(processor, policy, notifier));
    info!(operation = WITHDRAWAL_OPERATION, "Withdrawal service initialized");

    Ok(ServiceContext {
        store,
        withdrawal_service,
        shutdown,
        notifier_handle,
    })
}
