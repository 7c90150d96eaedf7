//! Job lifecycle endpoints.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use ragmill_core::service::{CreateCronJob, CreateIntervalJob, CreateOneTimeJob, UpdateJobRequest};
use ragmill_core::{Job, JobConfigMap};

use super::ApiResult;
use crate::state::AppState;

/// Wire representation of one scheduled job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub trigger: String,
    pub next_run_time: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub coalesce: bool,
    pub max_instances: u32,
    pub config: JobConfigMap,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            name: job.name,
            job_type: job.trigger.kind().to_string(),
            trigger: job.trigger.to_string(),
            next_run_time: job.next_fire_time,
            last_run_time: job.last_fire_time,
            coalesce: job.coalesce,
            max_instances: job.max_instances,
            config: job.pipeline_config,
        }
    }
}

pub async fn list_jobs(State(state): State<AppState>) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs = state.service.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.service.get_job(&job_id).await?;
    Ok(Json(job.into()))
}

pub async fn create_cron_job(
    State(state): State<AppState>,
    Json(request): Json<CreateCronJob>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.service.create_cron_job(request).await?;
    Ok(Json(job.into()))
}

pub async fn create_interval_job(
    State(state): State<AppState>,
    Json(request): Json<CreateIntervalJob>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.service.create_interval_job(request).await?;
    Ok(Json(job.into()))
}

pub async fn create_one_time_job(
    State(state): State<AppState>,
    Json(request): Json<CreateOneTimeJob>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.service.create_one_time_job(request).await?;
    Ok(Json(job.into()))
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(patch): Json<UpdateJobRequest>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.service.update_job(&job_id, patch).await?;
    Ok(Json(job.into()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.service.delete_job(&job_id).await?;
    Ok(Json(json!({ "message": format!("Job '{}' removed successfully", job_id) })))
}

pub async fn run_job_now(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.service.run_now(&job_id).await?;
    Ok(Json(
        json!({ "message": format!("Job '{}' triggered for immediate execution", job_id) }),
    ))
}

pub async fn list_presets() -> Json<serde_json::Value> {
    Json(serde_json::to_value(ragmill_core::jobs::presets::catalogue()).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
pub struct CreateFromPreset {
    pub job_id: String,
    #[serde(default)]
    pub config: JobConfigMap,
}

pub async fn create_preset_job(
    State(state): State<AppState>,
    Path(preset_name): Path<String>,
    Json(request): Json<CreateFromPreset>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let jobs = state
        .service
        .create_from_preset(&preset_name, &request.job_id, request.config)
        .await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}
