use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:merchant_id/:date", get(get_aggregate))
        .route("/:merchant_id/:date/recompute", post(recompute_aggregate))
}

pub async fn recompute_aggregate(
    Extension(services): Extension<Arc<AppServices>>,
    Path((merchant_id, date)): Path<(String, String)>,
) -> axum::response::Response {
    let merchant_id = match dto::parse_merchant_id(merchant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match dto::parse_date(&date) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.aggregation.recompute(&merchant_id, date).await {
        Ok(aggregate) => (StatusCode::OK, Json(aggregate)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn get_aggregate(
    Extension(services): Extension<Arc<AppServices>>,
    Path((merchant_id, date)): Path<(String, String)>,
) -> axum::response::Response {
    let merchant_id = match dto::parse_merchant_id(merchant_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let date = match dto::parse_date(&date) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.aggregation.get(&merchant_id, date).await {
        Ok(Some(aggregate)) => (StatusCode::OK, Json(aggregate)).into_response(),
        Ok(None) => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no aggregate for {merchant_id} on {date}"),
        ),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
