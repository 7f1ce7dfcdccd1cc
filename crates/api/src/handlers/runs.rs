use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use db::models::{JobRow, JobStatus, JobStepRow};
use db::repository::jobs as job_repo;
use db::DbError;

use crate::error::ApiError;
use crate::handlers::{load_workflow, parse_id};
use crate::AppState;

#[derive(Serialize)]
pub struct RunResponse {
    pub job_id: Uuid,
    pub message: String,
}

pub async fn submit(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RunResponse>, ApiError> {
    let workflow_id = parse_id(&id, "Workflow")?;
    let job = state.scheduler.submit(workflow_id).await?;

    let message = if job.status == JobStatus::Running.as_str() {
        "Job started"
    } else {
        "Job queued"
    };
    Ok(Json(RunResponse {
        job_id: job.id,
        message: message.to_string(),
    }))
}

#[derive(Serialize)]
pub struct JobDetailResponse {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub steps: Vec<JobStepRow>,
}

pub async fn get_job(
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    let id = parse_id(&job_id, "Job")?;
    let (job, steps) = job_repo::get_job_with_steps(&state.pool, id)
        .await
        .map_err(|e| match e {
            DbError::NotFound => ApiError::NotFound("Job not found".to_string()),
            other => other.into(),
        })?;

    Ok(Json(JobDetailResponse {
        id: job.id,
        workflow_id: job.workflow_id,
        status: job.status,
        started_at: job.started_at,
        finished_at: job.finished_at,
        final_output: job.final_output,
        error_message: job.error_message,
        steps,
    }))
}

#[derive(Serialize)]
pub struct RunsResponse {
    pub runs: Vec<JobRow>,
}

pub async fn list(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RunsResponse>, ApiError> {
    let workflow = load_workflow(&state.pool, &id).await?;
    let runs = job_repo::list_jobs(&state.pool, workflow.id).await?;
    Ok(Json(RunsResponse { runs }))
}
