use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use newsdesk_auth::AuthError;
use newsdesk_core::DomainError;
use newsdesk_infra::jobs::JobStoreError;

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "success": false,
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 400 with per-field messages.
pub fn validation_error(errors: BTreeMap<&'static str, String>) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({
            "success": false,
            "error": "validation_error",
            "message": "validation failed",
            "errors": errors,
        })),
    )
        .into_response()
}

pub fn unauthorized(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn internal(message: impl std::fmt::Display) -> axum::response::Response {
    tracing::error!(error = %message, "request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal_error",
        "Something went wrong. Please try again later.",
    )
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        DomainError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DomainError::Conflict(msg) => json_error(StatusCode::BAD_REQUEST, "conflict", msg),
        DomainError::NotOwner(msg) => json_error(StatusCode::BAD_REQUEST, "not_owner", msg),
        DomainError::Unavailable(msg) => {
            tracing::error!(error = %msg, "record store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "service temporarily unavailable")
        }
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err {
        AuthError::Unauthenticated => unauthorized("Unauthorized request"),
        AuthError::InvalidCredential(reason) => {
            tracing::debug!(reason = %reason, "credential rejected");
            unauthorized("Unauthorized request")
        }
        AuthError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        AuthError::Store(e) => domain_error_to_response(e.into()),
        AuthError::Token(e) => internal(e),
    }
}

pub fn job_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(id) => json_error(StatusCode::NOT_FOUND, "not_found", format!("job {id} not found")),
        JobStoreError::InvalidState { .. } => json_error(StatusCode::CONFLICT, "invalid_state", err.to_string()),
        JobStoreError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", err.to_string()),
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "unavailable", "job queue temporarily unavailable")
        }
    }
}
