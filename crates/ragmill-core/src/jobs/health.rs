//! On-demand scheduler health evaluation.

use serde::{Deserialize, Serialize};

use crate::jobs::scheduler::SchedulerState;
use crate::jobs::stats::SchedulerStats;
use crate::jobs::store::JobStore;

/// Overall verdict, worst check wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthVerdict {
    Healthy,
    Warning,
    Unhealthy,
}

/// Structured health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub scheduler_running: bool,
    pub scheduler_state: String,
    pub total_jobs: u64,
    pub stats: SchedulerStats,
    pub verdict: HealthVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub recommendations: Vec<String>,
}

/// Inspects scheduler state, stats, and the store on demand
pub struct HealthEvaluator {
    artifact_dir: String,
}

impl HealthEvaluator {
    pub fn new(artifact_dir: impl Into<String>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
        }
    }

    pub async fn evaluate(
        &self,
        scheduler_state: SchedulerState,
        store: &dyn JobStore,
        stats: SchedulerStats,
    ) -> HealthReport {
        let mut verdict = HealthVerdict::Healthy;
        let mut warning = None;
        let mut recommendations = Vec::new();

        let store_reachable = store.ping().await.is_ok();
        let total_jobs = if store_reachable {
            store.count().await.unwrap_or(0)
        } else {
            0
        };

        if !store_reachable {
            verdict = HealthVerdict::Unhealthy;
            warning = Some("Job store is unreachable".to_string());
            recommendations
                .push("Check the job store backend and its connection URL".to_string());
        }

        if stats.failure_rate() > 0.5 {
            verdict = HealthVerdict::Unhealthy;
            if warning.is_none() {
                warning = Some("High job failure rate detected".to_string());
            }
            let mut hint = "Inspect recent job reports for the failing pipeline runs".to_string();
            if let Some(last_error) = &stats.last_error {
                hint = format!(
                    "Inspect recent job reports; last failure was job '{}': {}",
                    last_error.job_id, last_error.message
                );
            }
            recommendations.push(hint);
        }

        let scheduler_running = scheduler_state == SchedulerState::Running;
        if !scheduler_running {
            if verdict == HealthVerdict::Healthy {
                verdict = HealthVerdict::Warning;
            }
            recommendations.push(format!(
                "Scheduler is {}; no jobs will fire until it runs",
                scheduler_state
            ));
        }

        if std::fs::create_dir_all(&self.artifact_dir).is_err() {
            if verdict == HealthVerdict::Healthy {
                verdict = HealthVerdict::Warning;
            }
            recommendations.push(format!(
                "Artifact directory '{}' is not writable; job reports will be lost",
                self.artifact_dir
            ));
        }

        if stats.dropped_events > 0 {
            recommendations.push(format!(
                "{} events were dropped by slow subscribers; drain event receivers faster",
                stats.dropped_events
            ));
        }

        HealthReport {
            scheduler_running,
            scheduler_state: scheduler_state.to_string(),
            total_jobs,
            stats,
            verdict,
            warning,
            recommendations,
        }
    }
}
