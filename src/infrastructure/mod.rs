pub mod account_store;
pub mod circuit_breaker;
pub mod config;
pub mod init;
pub mod logging;
pub mod notification;
pub mod rate_limiter;
pub mod resilience;
pub mod retry;
pub mod seed;
pub mod sql_store;

pub use account_store::{AccountStore, InMemoryAccountStore, StoreError};
pub use config::{AppConfig, StoreBackend};
pub use init::{init_all_services, ServiceContext};
pub use notification::{EventPublisher, LoggingEventPublisher, WithdrawalNotifier};
pub use resilience::{ResilienceConfig, ResilienceError, ResiliencePolicy};
pub use sql_store::SqliteAccountStore;
