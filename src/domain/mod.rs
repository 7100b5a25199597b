pub mod account;
pub mod errors;
pub mod events;
pub mod withdrawal;

pub use account::*;
pub use errors::*;
pub use events::*;
pub use withdrawal::*;
