use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use bilee_core::DomainError;
use bilee_infra::pipeline::WebhookRejection;
use bilee_infra::{ErrorKind, PipelineError, StoreError};

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation | ErrorKind::Reconciliation => StatusCode::BAD_REQUEST,
        ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Persistence => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn code_for(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Validation => "validation_error",
        ErrorKind::NotFound => "not_found",
        ErrorKind::Authentication => "unauthorized",
        ErrorKind::Reconciliation => "reconciliation_error",
        ErrorKind::Conflict => "conflict",
        ErrorKind::Persistence => "store_unavailable",
    }
}

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    let kind = err.kind();
    if kind == ErrorKind::Persistence {
        tracing::error!(error = %err, "request failed on the store");
    }
    json_error(status_for(kind), code_for(kind), err.to_string())
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    pipeline_error_to_response(err.into())
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    pipeline_error_to_response(err.into())
}

pub fn webhook_rejection_to_response(rejection: WebhookRejection) -> axum::response::Response {
    json_error(status_for(rejection.kind()), rejection.code(), rejection.to_string())
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
