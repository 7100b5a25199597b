use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::web::handlers::{health_check, withdraw, AppState};

pub fn create_router(state: AppState) -> Router {
    let banks = Router::new().route("/withdrawals", post(withdraw));

    Router::new()
        .route("/withdrawals", post(withdraw))
        .nest("/api/v1/banks", banks)
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
