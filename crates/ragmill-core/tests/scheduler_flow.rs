//! End-to-end scheduler flows: service + loop + pool + child process.

use std::sync::Arc;
use std::time::Duration;

use ragmill_core::jobs::{EventBus, JobRunner, MemoryStore};
use ragmill_core::service::{CreateCronJob, CreateIntervalJob, SchedulerService};
use ragmill_core::{Clock, Config, HealthVerdict, JobConfigMap, SystemClock};

#[cfg(unix)]
fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.display().to_string()
}

fn service_with_binary(dir: &tempfile::TempDir, binary: &str) -> SchedulerService {
    let mut config = Config::default();
    config.store.url = "memory:".to_string();
    config.bootstrap.enabled = false;
    config.pipeline.binary = binary.to_string();
    config.pipeline.artifact_dir = dir.path().display().to_string();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(EventBus::new());
    let runner = Arc::new(JobRunner::new(
        config.pipeline.clone(),
        bus.clone(),
        clock.clone(),
        Duration::from_secs(10),
    ));
    SchedulerService::with_components(
        config,
        Arc::new(MemoryStore::new()),
        clock,
        bus,
        runner,
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(500)).await;
}

#[tokio::test]
async fn test_create_and_list_shape() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service_with_binary(&dir, "/bin/true");

    let job = svc
        .create_cron_job(CreateCronJob {
            job_id: "daily".to_string(),
            hour: Some(2),
            minute: 0,
            ..Default::default()
        })
        .await
        .unwrap();

    let listed = svc.list_jobs().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, "daily");
    assert_eq!(listed[0].trigger.kind(), "cron");
    assert_eq!(listed[0].trigger.to_string(), "cron[0 2 * * * UTC]");
    // The stored next fire time is exactly what the trigger derives.
    assert_eq!(
        listed[0].next_fire_time,
        job.trigger.next_fire_after(job.created_at)
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_now_executes_child_and_updates_stats() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "ok.sh", "#!/bin/sh\necho done\nexit 0\n");
    let svc = service_with_binary(&dir, &script);

    svc.create_interval_job(CreateIntervalJob {
        job_id: "manual".to_string(),
        hours: 1,
        ..Default::default()
    })
    .await
    .unwrap();

    svc.start().await.unwrap();
    svc.run_now("manual").await.unwrap();
    settle().await;

    let stats = svc.get_stats();
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.failed, 0);
    assert!(stats.last_execution.is_some());

    // A report artifact landed in the artifact directory.
    let report_count = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("job_report_manual_"))
        .count();
    assert_eq!(report_count, 1);

    let health = svc.health_check().await;
    assert_eq!(health.verdict, HealthVerdict::Healthy);
    assert!(health.scheduler_running);
    assert_eq!(health.total_jobs, 1);

    svc.shutdown(true).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_child_failure_surfaces_in_stats_and_health() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "fail.sh", "#!/bin/sh\necho broken pipeline >&2\nexit 2\n");
    let svc = service_with_binary(&dir, &script);

    svc.create_interval_job(CreateIntervalJob {
        job_id: "broken".to_string(),
        hours: 1,
        ..Default::default()
    })
    .await
    .unwrap();

    svc.start().await.unwrap();
    svc.run_now("broken").await.unwrap();
    settle().await;

    let stats = svc.get_stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.executed, 0);
    let last_error = stats.last_error.unwrap();
    assert_eq!(last_error.job_id, "broken");
    assert!(last_error.message.contains("broken pipeline"));

    // 100% failure rate trips the health rule.
    let health = svc.health_check().await;
    assert_eq!(health.verdict, HealthVerdict::Unhealthy);
    assert_eq!(
        health.warning.as_deref(),
        Some("High job failure rate detected")
    );
    assert!(!health.recommendations.is_empty());

    svc.shutdown(true).await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_bootstrap_seeds_default_job_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "ok.sh", "#!/bin/sh\nexit 0\n");
    let mut config = Config::default();
    config.store.url = "memory:".to_string();
    config.pipeline.binary = script;
    config.pipeline.artifact_dir = dir.path().display().to_string();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = Arc::new(EventBus::new());
    let runner = Arc::new(JobRunner::new(
        config.pipeline.clone(),
        bus.clone(),
        clock.clone(),
        Duration::from_secs(10),
    ));
    let default_job_id = config.bootstrap.default_job_id.clone();
    let svc = SchedulerService::with_components(
        config,
        Arc::new(MemoryStore::new()),
        clock,
        bus,
        runner,
    );

    svc.start().await.unwrap();
    let job = svc.get_job(&default_job_id).await.unwrap();
    assert_eq!(job.trigger.kind(), "cron");
    assert!(job
        .pipeline_config
        .get("ci_mode")
        .and_then(|v| v.as_bool())
        .unwrap_or(false));
    assert!(dir
        .path()
        .join(ragmill_core::jobs::FIRST_RUN_MARKER)
        .exists());

    // Starting again on the same store keeps exactly one default job.
    assert_eq!(svc.list_jobs().await.unwrap().len(), 1);

    svc.shutdown(true).await;
    assert_eq!(svc.scheduler_state(), ragmill_core::SchedulerState::Stopped);
}

#[tokio::test]
async fn test_export_is_importable_into_fresh_service() {
    let dir = tempfile::tempdir().unwrap();
    let svc = service_with_binary(&dir, "/bin/true");

    let mut config = JobConfigMap::new();
    config.insert("dry_run".to_string(), serde_json::Value::Bool(true));
    svc.create_cron_job(CreateCronJob {
        job_id: "nightly".to_string(),
        hour: Some(3),
        minute: 30,
        config,
        ..Default::default()
    })
    .await
    .unwrap();

    let document = svc.export_config().await.unwrap();
    // The document survives a JSON round trip, like a file on disk would.
    let raw = serde_json::to_string_pretty(&document).unwrap();
    let parsed: ragmill_core::ConfigDocument = serde_json::from_str(&raw).unwrap();

    let dir2 = tempfile::tempdir().unwrap();
    let fresh = service_with_binary(&dir2, "/bin/true");
    assert_eq!(fresh.import_config(parsed).await.unwrap(), 1);

    let restored = fresh.get_job("nightly").await.unwrap();
    assert_eq!(restored.trigger.to_string(), "cron[30 3 * * * UTC]");
    assert_eq!(
        restored.pipeline_config.get("dry_run"),
        Some(&serde_json::Value::Bool(true))
    );
}
