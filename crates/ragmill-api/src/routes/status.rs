//! Status and health endpoints.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ragmill_core::jobs::LastError;
use ragmill_core::HealthReport;

use super::ApiResult;
use crate::state::AppState;

/// Scheduler status payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub jobs_executed: u64,
    pub jobs_failed: u64,
    pub jobs_missed: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub dropped_events: u64,
    pub active_jobs: usize,
    pub scheduler_running: bool,
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatus>> {
    let stats = state.service.get_stats();
    let jobs = state.service.list_jobs().await?;

    Ok(Json(SchedulerStatus {
        jobs_executed: stats.executed,
        jobs_failed: stats.failed,
        jobs_missed: stats.missed,
        last_execution: stats.last_execution,
        last_error: stats.last_error,
        dropped_events: stats.dropped_events,
        active_jobs: jobs.len(),
        scheduler_running: state.service.scheduler_state()
            == ragmill_core::SchedulerState::Running,
    }))
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health_check().await)
}
