use axum::extract::rejection::JsonRejection;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::application::services::{ServiceHealth, WithdrawalOutcome, WithdrawalService};
use crate::domain::{ErrorKind, WithdrawalRequest};
use crate::infrastructure::circuit_breaker::{CircuitBreakerMetrics, CircuitState};
use crate::infrastructure::notification::NotifierMetrics;
use crate::infrastructure::rate_limiter::RateLimiterMetrics;
use crate::web::dto::{WithdrawalRequestDto, WithdrawalResponseDto};
use crate::web::problem::ApiError;
use crate::web::trace::{TraceId, TRACE_ID_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub withdrawal_service: Arc<WithdrawalService>,
}

fn with_trace_id(mut response: Response, trace_id: &TraceId) -> Response {
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
    }
    response
}

pub async fn withdraw(
    State(state): State<AppState>,
    trace_id: TraceId,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<WithdrawalRequestDto>, JsonRejection>,
) -> Result<Response, ApiError> {
    let instance = uri.path().to_string();
    let reject = |kind: ErrorKind, detail: String| ApiError::new(kind, detail, instance.clone(), trace_id.clone());

    let Json(dto) = payload.map_err(|e| reject(ErrorKind::Validation, e.body_text()))?;
    let request = WithdrawalRequest::try_from(dto).map_err(|e| reject(e.kind(), e.to_string()))?;

    info!(
        %trace_id,
        account_number = %request.account_number,
        amount = %request.amount,
        account_name = request.account_name.as_deref().unwrap_or(""),
        account_type = request.account_type.as_deref().unwrap_or(""),
        customer_id = request.customer_id.as_deref().unwrap_or(""),
        "Withdrawal request received"
    );

    match state.withdrawal_service.withdraw(request).await {
        Ok(WithdrawalOutcome::Completed(result)) => {
            let response = (StatusCode::OK, Json(WithdrawalResponseDto::from(result))).into_response();
            Ok(with_trace_id(response, &trace_id))
        }
        Ok(WithdrawalOutcome::Degraded(fallback)) => {
            let status = fallback.result.message;
            Err(reject(
                ErrorKind::Unavailable,
                format!("{} - {}", status, status.client_hint()),
            )
            .with_retry_after(fallback.retry_after))
        }
        Err(e) => Err(reject(e.kind(), e.to_string())),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub circuit_breaker: CircuitBreakerMetrics,
    pub rate_limiter: RateLimiterMetrics,
    pub notifications: NotifierMetrics,
}

impl From<ServiceHealth> for HealthResponse {
    fn from(health: ServiceHealth) -> Self {
        let status = match health.policy.circuit_breaker.state {
            CircuitState::Closed => "UP",
            CircuitState::HalfOpen | CircuitState::Open | CircuitState::ForcedOpen => "DEGRADED",
        };
        Self {
            status,
            circuit_breaker: health.policy.circuit_breaker,
            rate_limiter: health.policy.rate_limiter,
            notifications: health.notifications,
        }
    }
}

pub async fn health_check(State(state): State<AppState>, trace_id: TraceId) -> Response {
    let health = HealthResponse::from(state.withdrawal_service.health().await);
    with_trace_id((StatusCode::OK, Json(health)).into_response(), &trace_id)
}
