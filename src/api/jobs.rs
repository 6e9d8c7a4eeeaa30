use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::db::JobRecord;
use crate::domain::{Job, JobStatus, RawJob};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub pool_name: String,
    pub action: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// Validate a job the same way the dispatcher will, then queue it.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), AppError> {
    let job = Job::try_from(RawJob {
        id: String::new(),
        action: body.action,
        pool_name: body.pool_name,
        details: body.details,
        status: JobStatus::Pending,
    })?;

    let job_id = state.queue.enqueue(&job.pool, &job.action).await?;
    tracing::info!(job_id = %job_id, pool = %job.pool, action = job.action.name(), "Job queued");
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { job_id })))
}

pub async fn get_job(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobRecord>, AppError> {
    state
        .repo
        .get_job(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
}
