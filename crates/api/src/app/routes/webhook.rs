use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use bilee_infra::pipeline::SIGNATURE_HEADER;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// PSP payment callback. The raw body is verified before it is parsed.
pub async fn upi_webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match services.webhook.verify(signature, &body).await {
        Ok(payment) => (StatusCode::OK, Json(dto::WebhookAccepted::from(payment))).into_response(),
        Err(rejection) => errors::webhook_rejection_to_response(rejection),
    }
}
