pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod web;

// Re-export commonly used types
pub use application::{WithdrawalOutcome, WithdrawalProcessor, WithdrawalService};
pub use domain::{Account, AccountNumber, WithdrawalError, WithdrawalRequest, WithdrawalResult, WithdrawalStatus};
pub use infrastructure::{AccountStore, AppConfig, InMemoryAccountStore, ServiceContext, SqliteAccountStore};
pub use web::{create_router, AppState};
