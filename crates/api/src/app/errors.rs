use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use booking_core::DomainError;
use booking_infra::{EngineError, IngestError, StoreError};

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Domain(e) => domain_error_to_response(e),
        EngineError::Store(e) => store_error_to_response(e),
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        DomainError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DomainError::QuotaExceeded { .. } => {
            json_error(StatusCode::BAD_REQUEST, "quota_exceeded", message)
        }
        DomainError::OutOfStock => json_error(StatusCode::BAD_REQUEST, "out_of_stock", message),
        DomainError::Expired => json_error(StatusCode::BAD_REQUEST, "expired", message),
        DomainError::InvalidInput(_) => json_error(StatusCode::BAD_REQUEST, "invalid_input", message),
        DomainError::InvariantViolation(_) => {
            tracing::error!(error = %message, "domain invariant violated");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "invariant_violation",
                message,
            )
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Conflict(msg) => json_error(
            StatusCode::CONFLICT,
            "conflict",
            format!("storage is busy, try again: {msg}"),
        ),
        other => {
            tracing::error!(error = %other, "store operation failed");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "internal storage error",
            )
        }
    }
}

pub fn ingest_error_to_response(err: IngestError) -> axum::response::Response {
    match err {
        IngestError::UnsupportedColumns { .. } => json_error(
            StatusCode::BAD_REQUEST,
            "unsupported_columns",
            err.to_string(),
        ),
        IngestError::Malformed(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        IngestError::Store(e) => store_error_to_response(e),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
