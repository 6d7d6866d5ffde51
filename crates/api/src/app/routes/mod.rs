use axum::{Router, routing::post};

pub mod aggregates;
pub mod maintenance;
pub mod receipts;
pub mod sessions;
pub mod system;
pub mod webhook;

/// Router for every endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .route("/webhooks/upi", post(webhook::upi_webhook))
        .nest("/sessions", sessions::router())
        .nest("/receipts", receipts::router())
        .nest("/aggregates", aggregates::router())
        .nest("/maintenance", maintenance::router())
}
