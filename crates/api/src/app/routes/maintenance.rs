//! Manual triggers for the scheduled sweeps and the receipt repairs.
//!
//! Sweeps run on the scheduler's own tasks: a trigger is acknowledged with
//! `202 Accepted` and the result shows up in the logs. Repairs run inline.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use bilee_infra::workers::{SweepJob, TriggerOutcome};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/expire", post(expire_sessions))
        .route("/archive", post(archive_sessions))
        .route("/repair-receipts", post(repair_receipts))
        .route("/complete-settled", post(complete_settled))
        .route("/backfill-customers", post(backfill_customers))
}

fn count_response(result: Result<usize, bilee_infra::PipelineError>) -> axum::response::Response {
    match result {
        Ok(count) => (StatusCode::OK, Json(dto::SweepResult { count })).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

fn trigger_response(services: &AppServices, job: SweepJob) -> axum::response::Response {
    let outcome = services.trigger_sweep(job);
    let status = match outcome {
        TriggerOutcome::Queued => "queued",
        TriggerOutcome::Coalesced => "coalesced",
        TriggerOutcome::Stopped => {
            return errors::json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "scheduler_stopped",
                format!("{} is not running", job.name()),
            );
        }
    };
    (
        StatusCode::ACCEPTED,
        Json(dto::SweepTriggered {
            job: job.name(),
            status,
        }),
    )
        .into_response()
}

pub async fn expire_sessions(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    trigger_response(&services, SweepJob::Expire)
}

pub async fn archive_sessions(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    trigger_response(&services, SweepJob::Archive)
}

pub async fn repair_receipts(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::BatchParams>,
) -> axum::response::Response {
    let limit = params.limit.unwrap_or(services.config.sweep_batch_limit);
    count_response(services.recovery.repair_unlinked_sessions(limit).await)
}

pub async fn complete_settled(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::BatchParams>,
) -> axum::response::Response {
    let limit = params.limit.unwrap_or(services.config.sweep_batch_limit);
    count_response(services.recovery.complete_settled_sessions(limit).await)
}

pub async fn backfill_customers(
    Extension(services): Extension<Arc<AppServices>>,
    Query(params): Query<dto::BatchParams>,
) -> axum::response::Response {
    let limit = params.limit.unwrap_or(services.config.sweep_batch_limit);
    match services.recovery.backfill_customer_ids(limit).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
