pub mod services;
pub mod withdrawal_core;

pub use services::{FallbackResponse, WithdrawalOutcome, WithdrawalService};
pub use withdrawal_core::WithdrawalProcessor;
