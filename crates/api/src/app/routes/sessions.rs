use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use bilee_infra::StoreError;
use bilee_sessions::{BillingSession, confirmation_patch};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_session))
        .route("/:id", get(get_session))
        .route("/:id/payment", post(confirm_payment))
}

pub async fn create_session(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateSessionRequest>,
) -> axum::response::Response {
    let now = Utc::now();
    let session = match body.into_new_session(now).and_then(|new| BillingSession::open(new, now)) {
        Ok(s) => s,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.sessions.create(session).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_session(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_session_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.sessions.get(&id).await {
        Ok(Some(session)) => (StatusCode::OK, Json(session)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("session {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Client-side payment confirmation; settlement follows asynchronously.
pub async fn confirm_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ConfirmPaymentRequest>,
) -> axum::response::Response {
    let id = match dto::parse_session_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let session = match services.sessions.get(&id).await {
        Ok(Some(s)) => s,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("session {id} not found")),
        Err(e) => return errors::store_error_to_response(e),
    };

    let patch = match confirmation_patch(&session, &body.payment_method, body.transaction_id.as_deref(), Utc::now()) {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.sessions.update(&id, &patch).await {
        Ok(change) => (StatusCode::OK, Json(change.after)).into_response(),
        Err(StoreError::NotFound(what)) => errors::json_error(StatusCode::NOT_FOUND, "not_found", what),
        Err(e) => errors::store_error_to_response(e),
    }
}
