//! First-start seeding of the default pipeline job.

use serde_json::json;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::BootstrapConfig;
use crate::jobs::job::Job;
use crate::jobs::store::JobStore;
use crate::pipeline::JobConfigMap;
use crate::trigger::{CronSchedule, Trigger};
use crate::Result;

/// Marker dropped in the artifact directory after a successful bootstrap.
/// Informational only; store presence is the authoritative check.
pub const FIRST_RUN_MARKER: &str = ".first_run_complete";

/// Idempotently seed the default cron job.
///
/// Returns `true` when a job was created this call.
pub async fn run_first_time_bootstrap(
    config: &BootstrapConfig,
    timezone: chrono_tz::Tz,
    artifact_dir: &str,
    store: &dyn JobStore,
    clock: &dyn Clock,
) -> Result<bool> {
    if !config.enabled {
        debug!("First-time bootstrap is disabled");
        return Ok(false);
    }

    if store.get(&config.default_job_id).await?.is_some() {
        info!(
            "Default job '{}' already exists, skipping bootstrap",
            config.default_job_id
        );
        return Ok(false);
    }

    let trigger = Trigger::Cron(CronSchedule::from_components(
        Some(config.hour),
        config.minute,
        None,
        timezone,
    )?);

    let pipeline_config: JobConfigMap = json!({
        "incremental_mode": "auto",
        "ci_mode": true,
        "dry_run": false,
        "force_recreate": false,
        "should_save_stats": true,
    })
    .as_object()
    .cloned()
    .unwrap_or_default();

    let job = Job::new(
        config.default_job_id.clone(),
        "Default pipeline job",
        trigger,
        pipeline_config,
        clock.now_utc(),
    )?;
    store.put(&job).await?;

    info!(
        "Created default pipeline job '{}' scheduled for {:02}:{:02}",
        config.default_job_id, config.hour, config.minute
    );

    write_marker(artifact_dir, clock);
    Ok(true)
}

fn write_marker(artifact_dir: &str, clock: &dyn Clock) {
    let dir = std::path::Path::new(artifact_dir);
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Cannot create artifact directory for first-run marker: {}", e);
        return;
    }
    let path = dir.join(FIRST_RUN_MARKER);
    if let Err(e) = std::fs::write(&path, clock.now_utc().to_rfc3339()) {
        warn!("Cannot write first-run marker {}: {}", path.display(), e);
    }
}
