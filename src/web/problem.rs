//! Problem payloads and the single error-kind to HTTP-status table.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

use crate::domain::ErrorKind;
use crate::web::trace::{TraceId, TRACE_ID_HEADER};

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemMapping {
    pub status: StatusCode,
    pub problem_type: &'static str,
    pub title: &'static str,
}

const PROBLEM_TABLE: [(ErrorKind, ProblemMapping); 5] = [
    (
        ErrorKind::Validation,
        ProblemMapping {
            status: StatusCode::BAD_REQUEST,
            problem_type: "ValidationError",
            title: "Request Validation Failed",
        },
    ),
    (
        ErrorKind::NotFound,
        ProblemMapping {
            status: StatusCode::NOT_FOUND,
            problem_type: "EntityNotFound",
            title: "Resource Not Found",
        },
    ),
    (
        ErrorKind::BusinessRule,
        ProblemMapping {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            problem_type: "BusinessValidationError",
            title: "Business Validation Failed",
        },
    ),
    // The service answers transient failures with a fallback; this row only
    // matters if one reaches the boundary directly.
    (
        ErrorKind::Transient,
        ProblemMapping {
            status: StatusCode::SERVICE_UNAVAILABLE,
            problem_type: "ServiceTemporarilyUnavailable",
            title: "Service Temporarily Unavailable",
        },
    ),
    (
        ErrorKind::Unavailable,
        ProblemMapping {
            status: StatusCode::SERVICE_UNAVAILABLE,
            problem_type: "ServiceTemporarilyUnavailable",
            title: "Service Temporarily Unavailable",
        },
    ),
];

pub fn problem_mapping(kind: ErrorKind) -> ProblemMapping {
    PROBLEM_TABLE
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, mapping)| *mapping)
        .unwrap_or(ProblemMapping {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            problem_type: "InternalError",
            title: "Internal Server Error",
        })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    pub trace_id: String,
}

/// An error on its way out of a handler.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub detail: String,
    pub instance: String,
    pub trace_id: TraceId,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>, instance: impl Into<String>, trace_id: TraceId) -> Self {
        Self {
            kind,
            detail: detail.into(),
            instance: instance.into(),
            trace_id,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn problem(&self) -> Problem {
        let mapping = problem_mapping(self.kind);
        Problem {
            problem_type: mapping.problem_type.to_string(),
            title: mapping.title.to_string(),
            status: mapping.status.as_u16(),
            detail: self.detail.clone(),
            instance: self.instance.clone(),
            trace_id: self.trace_id.to_string(),
        }
    }
}

/// Whole seconds, rounded up, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = self.problem();
        let status = StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(trace_id = %self.trace_id, status = problem.status, detail = %problem.detail, "Request failed");
        } else {
            warn!(trace_id = %self.trace_id, status = problem.status, detail = %problem.detail, "Request rejected");
        }

        let mut response = (status, Json(problem)).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));
        if let Ok(value) = HeaderValue::from_str(self.trace_id.as_str()) {
            headers.insert(HeaderName::from_static(TRACE_ID_HEADER), value);
        }
        if let Some(retry_after) = self.retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
        }
        response
    }
}
