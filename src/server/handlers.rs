//! Route handlers: the thin shell between HTTP and the scrape core.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;

use crate::core::app_state::AppState;
use crate::core::types::{
    ErrorResponse, FieldError, JobStatusResponse, ScrapeRequest, ValidationErrorBody,
};
use crate::jobs::{self, JobProjection};
use crate::scraping;

/// Extra allowance on top of the engine bound for slot queueing and job
/// bookkeeping.
const OUTER_TIMEOUT_GRACE_MS: u64 = 10_000;

fn validation_failure(details: Vec<FieldError>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ValidationErrorBody {
            error: "Invalid request".into(),
            details,
        }),
    )
        .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Job not found".into(),
            code: Some("JOB_NOT_FOUND".into()),
        }),
    )
        .into_response()
}

/// `POST /v1/scrape` — synchronous by default, `202 Accepted` with a job id
/// when `instantReturn` is set.
pub async fn scrape(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    let request: ScrapeRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return validation_failure(vec![FieldError {
                path: "body".into(),
                message: e.to_string(),
            }]);
        }
    };
    let problems = request.validate();
    if !problems.is_empty() {
        return validation_failure(problems);
    }

    info!(
        "scrape request: {} (engine: {:?}, instantReturn: {})",
        request.url, request.engine, request.instant_return
    );

    let job = state.jobs.create(request).await;

    if job.request.instant_return {
        let accepted = JobStatusResponse {
            job_id: job.id.to_string(),
            processing: true,
        };
        jobs::start_job_async(state.clone(), job);
        return (StatusCode::ACCEPTED, Json(accepted)).into_response();
    }

    // Run on a task of its own so an outer-timeout response never cancels
    // the scrape mid-cleanup; a late result still lands in the job store.
    let outer_budget = scraping::engine_max_time(&job.request) + OUTER_TIMEOUT_GRACE_MS;
    let exec_state = state.clone();
    let exec_job = job.clone();
    let handle = tokio::spawn(async move { jobs::execute_job(&exec_state, &exec_job).await });

    match tokio::time::timeout(Duration::from_millis(outer_budget), handle).await {
        Ok(Ok(Ok(response))) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Ok(Err(err))) => (StatusCode::INTERNAL_SERVER_ERROR, Json(err)).into_response(),
        Ok(Err(join_err)) => {
            error!("scrape task panicked: {join_err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Internal server error")),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!(
                "scrape exceeded the engine time budget of {outer_budget}ms"
            ))),
        )
            .into_response(),
    }
}

/// `POST /scrape` — legacy path, preserved as a redirect.
pub async fn legacy_scrape_redirect() -> Redirect {
    Redirect::temporary("/v1/scrape")
}

/// `GET /v1/scrape/:job_id` — poll a deferred job.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&job_id) else {
        return not_found();
    };
    match state.jobs.project_status(id).await {
        None => not_found(),
        Some(JobProjection::InFlight(status)) => {
            (StatusCode::ACCEPTED, Json(status)).into_response()
        }
        Some(JobProjection::Succeeded(response)) => {
            (StatusCode::OK, Json(response)).into_response()
        }
        Some(JobProjection::Failed(err)) => (StatusCode::OK, Json(err)).into_response(),
    }
}

/// `DELETE /v1/scrape/:job_id` — idempotent; unknown ids are fine.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<serde_json::Value> {
    if let Ok(id) = Uuid::parse_str(&job_id) {
        state.jobs.delete(id).await;
    }
    Json(serde_json::json!({ "success": true }))
}

/// `GET /healthz` (and aliases) — liveness plus job-store counts.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let counts = state.jobs.counts().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "scrapedock",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now().to_rfc3339(),
        "jobs": counts,
    }))
}
