use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use bilee_core::ReceiptId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", get(find_by_session))
        .route("/:id", get(get_receipt))
}

pub async fn get_receipt(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match ReceiptId::new(id) {
        Ok(id) => id,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()),
    };

    match services.receipts.get(&id).await {
        Ok(Some(receipt)) => (StatusCode::OK, Json(receipt)).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("receipt {id} not found")),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn find_by_session(
    Extension(services): Extension<Arc<AppServices>>,
    Query(q): Query<dto::ReceiptLookup>,
) -> axum::response::Response {
    let session_id = match dto::parse_session_id(q.session_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.receipts.find_by_session(&session_id).await {
        Ok(Some(receipt)) => (StatusCode::OK, Json(receipt)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no receipt for session {session_id}"),
        ),
        Err(e) => errors::store_error_to_response(e),
    }
}
