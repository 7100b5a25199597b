pub mod dto;
pub mod handlers;
pub mod problem;
pub mod routes;
pub mod trace;

pub use handlers::AppState;
pub use problem::{ApiError, Problem};
pub use routes::create_router;
pub use trace::TraceId;
