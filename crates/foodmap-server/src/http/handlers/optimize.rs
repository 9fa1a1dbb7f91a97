//! Poll-mode handlers: submit a job, then query its status.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use foodmap_core::{Job, JobId, OptimizationRequest};
use tracing::{debug, warn};

use crate::gateway::ConsumptionMode;
use crate::http::responses::{ApiError, SubmitResponse};
use crate::state::AppState;

/// POST /api/optimize - Submit an optimization job.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    json_result: Result<Json<OptimizationRequest>, JsonRejection>,
) -> Response {
    let req = match json_result {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid JSON in request body");
            return ApiError::InvalidJson {
                message: rejection.body_text(),
            }
            .into_response();
        }
    };

    let valid = match state.gateway.validate(&req) {
        Ok(valid) => valid,
        Err(e) => {
            warn!(error = %e, "Rejected optimization request");
            return ApiError::from(e).into_response();
        }
    };

    let job = Job::new(valid.domain.clone(), valid.budget);
    let source = state.gateway.source(&valid, ConsumptionMode::Poll);
    let job_id = state.registry.submit(job, source).await;

    (
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job_id.into_inner(),
        }),
    )
        .into_response()
}

/// GET /api/optimize/:job_id - Current status of a job.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let job_id = JobId::new(job_id);
    match state.registry.status(&job_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => {
            debug!(error = %e, "Status requested for unknown job");
            ApiError::JobNotFound.into_response()
        }
    }
}
