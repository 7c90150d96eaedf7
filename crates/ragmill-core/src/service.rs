//! The in-process command surface bundling store, scheduler, pool, events,
//! stats, and health for transports to call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::jobs::{
    open_store, presets, run_first_time_bootstrap, EventBus, EventReceiver, EventSubscriber,
    HealthEvaluator, HealthReport, Job, JobHandler, JobRunner, JobStore, SchedulerCore,
    SchedulerState, SchedulerStats, StatsAggregator, WorkerPool,
};
use crate::jobs::{LoggingSubscriber, PresetSpec};
use crate::pipeline::JobConfigMap;
use crate::trigger::{CronSchedule, DateSchedule, IntervalSchedule, Trigger};
use crate::{Error, Result};

/// Request to create a cron job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateCronJob {
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub hour: Option<u32>,
    #[serde(default)]
    pub minute: u32,
    #[serde(default)]
    pub day_of_week: Option<String>,
    #[serde(default)]
    pub config: JobConfigMap,
}

/// Request to create an interval job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateIntervalJob {
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub config: JobConfigMap,
}

/// Request to create a one-time job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOneTimeJob {
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub run_date: DateTime<Utc>,
    #[serde(default)]
    pub config: JobConfigMap,
}

/// Patch applied by `update_job`; unset fields keep their current value.
/// The write has remove-and-insert semantics and always re-derives the
/// next fire time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub trigger: Option<JobTriggerSpec>,
    #[serde(default)]
    pub config: Option<JobConfigMap>,
    #[serde(default)]
    pub coalesce: Option<bool>,
    #[serde(default)]
    pub max_instances: Option<u32>,
    #[serde(default)]
    pub misfire_grace_secs: Option<u64>,
}

/// Wire form of a trigger, shared by updates and the export document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobTriggerSpec {
    #[serde(rename = "type")]
    pub job_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<DateTime<Utc>>,
}

impl JobTriggerSpec {
    /// Build the trigger this spec describes
    pub fn to_trigger(&self, timezone: chrono_tz::Tz) -> Result<Trigger> {
        match self.job_type.as_str() {
            "cron" => {
                let schedule = match &self.cron_expression {
                    Some(expr) => CronSchedule::from_expression(expr, timezone)?,
                    None => CronSchedule::from_components(
                        self.hour,
                        self.minute.unwrap_or(0),
                        self.day_of_week.as_deref(),
                        timezone,
                    )?,
                };
                Ok(Trigger::Cron(schedule))
            }
            "interval" => {
                let mut schedule = IntervalSchedule::new(
                    self.days.unwrap_or(0),
                    self.hours.unwrap_or(0),
                    self.minutes.unwrap_or(0),
                    self.seconds.unwrap_or(0),
                );
                // An interval document with no components defaults to
                // hourly rather than failing the whole import.
                if schedule.is_err()
                    && self.days.is_none()
                    && self.hours.is_none()
                    && self.minutes.is_none()
                    && self.seconds.is_none()
                {
                    schedule = IntervalSchedule::new(0, 1, 0, 0);
                }
                Ok(Trigger::Interval(schedule?))
            }
            "date" => {
                let run_date = self.run_date.ok_or_else(|| {
                    Error::validation("date trigger requires a run_date")
                })?;
                Ok(Trigger::Date(DateSchedule::new(run_date)))
            }
            other => Err(Error::validation(format!("unknown trigger type: '{}'", other))),
        }
    }

    /// Wire form of an existing trigger
    pub fn from_trigger(trigger: &Trigger) -> Self {
        match trigger {
            Trigger::Cron(c) => Self {
                job_type: "cron".to_string(),
                cron_expression: c.cron_expression.clone(),
                hour: if c.cron_expression.is_some() { None } else { c.hour },
                minute: if c.cron_expression.is_some() {
                    None
                } else {
                    Some(c.minute)
                },
                day_of_week: if c.cron_expression.is_some() {
                    None
                } else {
                    c.day_of_week.clone()
                },
                ..Default::default()
            },
            Trigger::Interval(i) => Self {
                job_type: "interval".to_string(),
                days: (i.days > 0).then_some(i.days),
                hours: (i.hours > 0).then_some(i.hours),
                minutes: (i.minutes > 0).then_some(i.minutes),
                seconds: (i.seconds > 0).then_some(i.seconds),
                ..Default::default()
            },
            Trigger::Date(d) => Self {
                job_type: "date".to_string(),
                run_date: Some(d.run_date),
                ..Default::default()
            },
        }
    }
}

/// One job entry in the export document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDocument {
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub trigger: JobTriggerSpec,
    #[serde(default)]
    pub config: JobConfigMap,
}

/// Export/import document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_stats: Option<SchedulerStats>,
    #[serde(default)]
    pub jobs: Vec<JobDocument>,
}

/// The API facade over the scheduler subsystem.
///
/// Transports hold a handle to this service; there is no process-wide
/// scheduler state.
pub struct SchedulerService {
    config: Config,
    store: Arc<dyn JobStore>,
    core: Arc<SchedulerCore>,
    bus: Arc<EventBus>,
    stats: Arc<StatsAggregator>,
    clock: Arc<dyn Clock>,
    health: HealthEvaluator,
}

impl SchedulerService {
    /// Assemble the production service: system clock, store from the
    /// configured URL, pipeline runner as the pool handler
    pub async fn build(config: Config) -> Result<Self> {
        let store = open_store(&config.store).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let bus = Arc::new(EventBus::new());
        let runner = Arc::new(JobRunner::new(
            config.pipeline.clone(),
            bus.clone(),
            clock.clone(),
            Duration::from_secs(config.scheduler.task_timeout_secs),
        ));
        Ok(Self::with_components(config, store, clock, bus, runner))
    }

    /// Assemble from explicit parts; tests inject a manual clock, an
    /// ephemeral store, and a stub handler here
    pub fn with_components(
        config: Config,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        bus: Arc<EventBus>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let stats = Arc::new(StatsAggregator::new());
        bus.subscribe_inline(stats.clone() as Arc<dyn EventSubscriber>);
        bus.subscribe_inline(Arc::new(LoggingSubscriber));

        let pool = Arc::new(WorkerPool::new(config.scheduler.max_workers, handler));
        let core = Arc::new(SchedulerCore::new(
            store.clone(),
            pool,
            bus.clone(),
            clock.clone(),
            config.scheduler.clone(),
        ));
        let health = HealthEvaluator::new(config.pipeline.artifact_dir.clone());

        Self {
            config,
            store,
            core,
            bus,
            stats,
            clock,
            health,
        }
    }

    /// Run first-time bootstrap and start the scheduler loop
    pub async fn start(&self) -> Result<()> {
        run_first_time_bootstrap(
            &self.config.bootstrap,
            self.config.scheduler.tz(),
            &self.config.pipeline.artifact_dir,
            self.store.as_ref(),
            self.clock.as_ref(),
        )
        .await?;
        self.core.start()?;
        self.core.notify_jobs_changed();
        Ok(())
    }

    pub async fn shutdown(&self, wait: bool) {
        self.core.shutdown(wait).await;
    }

    /// Block until the scheduler reaches its stopped state
    pub async fn wait_until_stopped(&self) {
        self.core.wait_until_stopped().await;
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.core.state()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bounded receiver of lifecycle events
    pub fn subscribe_events(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    pub async fn create_cron_job(&self, req: CreateCronJob) -> Result<Job> {
        let timezone = self.config.scheduler.tz();
        let schedule = match &req.cron_expression {
            Some(expr) => CronSchedule::from_expression(expr, timezone)?,
            None => CronSchedule::from_components(
                req.hour,
                req.minute,
                req.day_of_week.as_deref(),
                timezone,
            )?,
        };
        let name = req
            .name
            .unwrap_or_else(|| format!("Cron Job: {}", req.job_id));
        let job = Job::new(
            req.job_id,
            name,
            Trigger::Cron(schedule),
            req.config,
            self.clock.now_utc(),
        )?
        .with_coalesce(self.config.scheduler.coalesce)
        .with_max_instances(self.config.scheduler.max_instances)
        .with_misfire_grace_secs(self.config.scheduler.misfire_grace_secs);
        self.insert_new(job).await
    }

    pub async fn create_interval_job(&self, req: CreateIntervalJob) -> Result<Job> {
        let schedule = IntervalSchedule::new(req.days, req.hours, req.minutes, req.seconds)?;
        let name = req
            .name
            .unwrap_or_else(|| format!("Interval Job: {}", req.job_id));
        let job = Job::new(
            req.job_id,
            name,
            Trigger::Interval(schedule),
            req.config,
            self.clock.now_utc(),
        )?
        .with_coalesce(self.config.scheduler.coalesce)
        .with_max_instances(self.config.scheduler.max_instances)
        .with_misfire_grace_secs(self.config.scheduler.misfire_grace_secs);
        self.insert_new(job).await
    }

    pub async fn create_one_time_job(&self, req: CreateOneTimeJob) -> Result<Job> {
        let name = req
            .name
            .unwrap_or_else(|| format!("One-time Job: {}", req.job_id));
        let job = Job::new(
            req.job_id,
            name,
            Trigger::Date(DateSchedule::new(req.run_date)),
            req.config,
            self.clock.now_utc(),
        )?
        .with_coalesce(self.config.scheduler.coalesce)
        .with_max_instances(self.config.scheduler.max_instances)
        .with_misfire_grace_secs(self.config.scheduler.misfire_grace_secs);
        self.insert_new(job).await
    }

    /// Create one or more jobs from a named preset; the `twice_daily`
    /// preset derives `<id>_1` and `<id>_2`
    pub async fn create_from_preset(
        &self,
        preset_name: &str,
        job_id: &str,
        config: JobConfigMap,
    ) -> Result<Vec<Job>> {
        let preset = presets::find(preset_name)
            .ok_or_else(|| Error::not_found(format!("preset '{}' not found", preset_name)))?;

        match &preset.spec {
            PresetSpec::Cron {
                hour,
                minute,
                day_of_week,
            } => {
                let job = self
                    .create_cron_job(CreateCronJob {
                        job_id: job_id.to_string(),
                        hour: *hour,
                        minute: *minute,
                        day_of_week: day_of_week.map(|d| d.to_string()),
                        config,
                        ..Default::default()
                    })
                    .await?;
                Ok(vec![job])
            }
            PresetSpec::Interval { hours, minutes } => {
                let job = self
                    .create_interval_job(CreateIntervalJob {
                        job_id: job_id.to_string(),
                        hours: *hours,
                        minutes: *minutes,
                        config,
                        ..Default::default()
                    })
                    .await?;
                Ok(vec![job])
            }
            PresetSpec::Multiple { schedules } => {
                // Refuse before creating anything if any derived id clashes
                for i in 1..=schedules.len() {
                    let derived = format!("{}_{}", job_id, i);
                    if self.store.get(&derived).await?.is_some() {
                        return Err(Error::validation(format!(
                            "job id '{}' already exists",
                            derived
                        )));
                    }
                }
                let mut jobs = Vec::with_capacity(schedules.len());
                for (i, (hour, minute)) in schedules.iter().enumerate() {
                    let job = self
                        .create_cron_job(CreateCronJob {
                            job_id: format!("{}_{}", job_id, i + 1),
                            hour: Some(*hour),
                            minute: *minute,
                            config: config.clone(),
                            ..Default::default()
                        })
                        .await?;
                    jobs.push(job);
                }
                Ok(jobs)
            }
        }
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("job '{}' not found", id)))
    }

    /// Jobs in insertion order
    pub async fn list_jobs(&self) -> Result<Vec<Job>> {
        self.store.list().await
    }

    /// Remove-and-insert update; the next fire time is re-derived with the
    /// write and the display position is kept
    pub async fn update_job(&self, id: &str, patch: UpdateJobRequest) -> Result<Job> {
        let mut job = self.get_job(id).await?;
        let now = self.clock.now_utc();

        if let Some(name) = patch.name {
            job.name = name;
        }
        if let Some(spec) = patch.trigger {
            let mut trigger = spec.to_trigger(self.config.scheduler.tz())?;
            if let Trigger::Interval(ref mut interval) = trigger {
                if interval.anchor.is_none() {
                    interval.anchor = Some(now);
                }
            }
            if let Trigger::Date(ref date) = trigger {
                if date.run_date <= now {
                    return Err(Error::validation(format!(
                        "run date {} is in the past",
                        date.run_date.to_rfc3339()
                    )));
                }
            }
            job.trigger = trigger;
        }
        if let Some(config) = patch.config {
            job.pipeline_config = config;
        }
        if let Some(coalesce) = patch.coalesce {
            job.coalesce = coalesce;
        }
        if let Some(max_instances) = patch.max_instances {
            if max_instances == 0 {
                return Err(Error::validation("max_instances must be positive"));
            }
            job.max_instances = max_instances;
        }
        if let Some(grace) = patch.misfire_grace_secs {
            job.misfire_grace_secs = grace;
        }

        let basis = job.last_fire_time.map_or(now, |last| last.max(now));
        job.next_fire_time = match &job.trigger {
            Trigger::Date(date) if date.run_date > now => Some(date.run_date),
            trigger => trigger.next_fire_after(basis),
        };
        job.updated_at = now;

        self.store.put(&job).await?;
        self.core.notify_jobs_changed();
        info!("Updated job: {}", job.id);
        Ok(job)
    }

    pub async fn delete_job(&self, id: &str) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(Error::not_found(format!("job '{}' not found", id)));
        }
        self.core.notify_jobs_changed();
        info!("Removed job: {}", id);
        Ok(())
    }

    /// Pull a job's next fire time to now; admission still applies
    pub async fn run_now(&self, id: &str) -> Result<()> {
        let mut job = self.get_job(id).await?;
        job.mark_run_now(self.clock.now_utc());
        self.store.put(&job).await?;
        self.core.notify_jobs_changed();
        info!("Triggered immediate execution of job: {}", id);
        Ok(())
    }

    /// Snapshot of current jobs and stats as a portable document
    pub async fn export_config(&self) -> Result<ConfigDocument> {
        let jobs = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|job| JobDocument {
                job_id: job.id.clone(),
                name: Some(job.name.clone()),
                trigger: JobTriggerSpec::from_trigger(&job.trigger),
                config: job.pipeline_config,
            })
            .collect();

        Ok(ConfigDocument {
            exported_at: Some(self.clock.now_utc()),
            scheduler_stats: Some(self.get_stats()),
            jobs,
        })
    }

    /// Import jobs from a document; existing ids and elapsed one-time jobs
    /// are skipped with a warning. Returns the number imported.
    pub async fn import_config(&self, document: ConfigDocument) -> Result<usize> {
        let now = self.clock.now_utc();
        let mut imported = 0;

        for doc in document.jobs {
            if self.store.get(&doc.job_id).await?.is_some() {
                warn!("Job {} already exists, skipping import", doc.job_id);
                continue;
            }
            if doc.trigger.job_type == "date" {
                match doc.trigger.run_date {
                    Some(run_date) if run_date > now => {}
                    _ => {
                        warn!(
                            "One-time job {} has an elapsed or missing run date, skipping import",
                            doc.job_id
                        );
                        continue;
                    }
                }
            }

            let trigger = match doc.trigger.to_trigger(self.config.scheduler.tz()) {
                Ok(trigger) => trigger,
                Err(e) => {
                    warn!("Failed to import job {}: {}", doc.job_id, e);
                    continue;
                }
            };
            let name = doc
                .name
                .unwrap_or_else(|| format!("Imported Job: {}", doc.job_id));

            match Job::new(doc.job_id.clone(), name, trigger, doc.config, now) {
                Ok(job) => {
                    let job = job
                        .with_coalesce(self.config.scheduler.coalesce)
                        .with_max_instances(self.config.scheduler.max_instances)
                        .with_misfire_grace_secs(self.config.scheduler.misfire_grace_secs);
                    self.store.put(&job).await?;
                    imported += 1;
                    info!("Imported job: {}", job.id);
                }
                Err(e) => {
                    warn!("Failed to import job {}: {}", doc.job_id, e);
                }
            }
        }

        if imported > 0 {
            self.core.notify_jobs_changed();
        }
        info!("Imported {} jobs from configuration", imported);
        Ok(imported)
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.stats.snapshot(self.bus.dropped_events())
    }

    pub async fn health_check(&self) -> HealthReport {
        self.health
            .evaluate(self.core.state(), self.store.as_ref(), self.get_stats())
            .await
    }

    async fn insert_new(&self, job: Job) -> Result<Job> {
        if self.store.get(&job.id).await?.is_some() {
            return Err(Error::validation(format!(
                "job id '{}' already exists",
                job.id
            )));
        }
        self.store.put(&job).await?;
        self.core.notify_jobs_changed();
        info!("Added {} '{}' with trigger: {}", job.trigger.kind(), job.id, job.trigger);
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jobs::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tokio_util::sync::CancellationToken;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn handle(&self, _job: Job, _cancel: CancellationToken) {}
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 23, 12, 0, 0).unwrap()
    }

    fn service() -> SchedulerService {
        let mut config = Config::default();
        config.store.url = "memory:".to_string();
        SchedulerService::with_components(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(t0())),
            Arc::new(EventBus::new()),
            Arc::new(NoopHandler),
        )
    }

    fn cron_req(id: &str) -> CreateCronJob {
        CreateCronJob {
            job_id: id.to_string(),
            hour: Some(2),
            minute: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let svc = service();
        svc.create_cron_job(cron_req("daily")).await.unwrap();

        let jobs = svc.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "daily");
        assert_eq!(jobs[0].trigger.kind(), "cron");
        assert_eq!(jobs[0].trigger.to_string(), "cron[0 2 * * * UTC]");
        // Created at noon UTC: the next 02:00 is tomorrow.
        assert_eq!(
            jobs[0].next_fire_time.unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 24, 2, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let svc = service();
        svc.create_cron_job(cron_req("daily")).await.unwrap();
        let err = svc.create_cron_job(cron_req("daily")).await.unwrap_err();
        assert_eq!(err.category(), "validation");
    }

    #[tokio::test]
    async fn test_one_time_in_the_past_rejected() {
        let svc = service();
        let err = svc
            .create_one_time_job(CreateOneTimeJob {
                job_id: "once".to_string(),
                name: None,
                run_date: t0() - ChronoDuration::seconds(10),
                config: JobConfigMap::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.category(), "validation");
        assert!(svc.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let svc = service();
        svc.create_cron_job(cron_req("daily")).await.unwrap();

        assert_eq!(svc.get_job("daily").await.unwrap().id, "daily");
        svc.delete_job("daily").await.unwrap();
        assert_eq!(svc.get_job("daily").await.unwrap_err().category(), "not_found");
        assert_eq!(svc.delete_job("daily").await.unwrap_err().category(), "not_found");
    }

    #[tokio::test]
    async fn test_run_now_pulls_next_fire() {
        let svc = service();
        svc.create_cron_job(cron_req("daily")).await.unwrap();
        svc.run_now("daily").await.unwrap();
        let job = svc.get_job("daily").await.unwrap();
        assert_eq!(job.next_fire_time.unwrap(), t0());
    }

    #[tokio::test]
    async fn test_update_rederives_next_fire() {
        let svc = service();
        svc.create_cron_job(cron_req("job")).await.unwrap();

        let updated = svc
            .update_job(
                "job",
                UpdateJobRequest {
                    trigger: Some(JobTriggerSpec {
                        job_type: "interval".to_string(),
                        minutes: Some(5),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.trigger.kind(), "interval");
        assert_eq!(
            updated.next_fire_time.unwrap(),
            t0() + ChronoDuration::seconds(300)
        );
    }

    #[tokio::test]
    async fn test_update_keeps_display_position() {
        let svc = service();
        svc.create_cron_job(cron_req("first")).await.unwrap();
        svc.create_cron_job(cron_req("second")).await.unwrap();

        svc.update_job(
            "first",
            UpdateJobRequest {
                name: Some("renamed".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let ids: Vec<String> = svc
            .list_jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_preset_expansion() {
        let svc = service();
        let jobs = svc
            .create_from_preset("twice_daily", "refresh", JobConfigMap::new())
            .await
            .unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["refresh_1", "refresh_2"]);

        let single = svc
            .create_from_preset("hourly", "tick", JobConfigMap::new())
            .await
            .unwrap();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].trigger.kind(), "interval");

        let err = svc
            .create_from_preset("no_such_preset", "x", JobConfigMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "not_found");
    }

    #[tokio::test]
    async fn test_export_import_round_trip() {
        let svc = service();
        let mut config = JobConfigMap::new();
        config.insert(
            "chunk_size".to_string(),
            serde_json::Value::Number(2000.into()),
        );
        config.insert(
            "custom_key".to_string(),
            serde_json::Value::String("preserved".to_string()),
        );

        svc.create_cron_job(CreateCronJob {
            config: config.clone(),
            ..cron_req("a-cron")
        })
        .await
        .unwrap();
        svc.create_interval_job(CreateIntervalJob {
            job_id: "b-interval".to_string(),
            hours: 1,
            minutes: 30,
            ..Default::default()
        })
        .await
        .unwrap();
        svc.create_one_time_job(CreateOneTimeJob {
            job_id: "c-date".to_string(),
            name: None,
            run_date: t0() + ChronoDuration::days(1),
            config: JobConfigMap::new(),
        })
        .await
        .unwrap();

        let document = svc.export_config().await.unwrap();
        assert_eq!(document.jobs.len(), 3);

        for id in ["a-cron", "b-interval", "c-date"] {
            svc.delete_job(id).await.unwrap();
        }
        assert!(svc.list_jobs().await.unwrap().is_empty());

        let imported = svc.import_config(document.clone()).await.unwrap();
        assert_eq!(imported, 3);

        let jobs = svc.list_jobs().await.unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a-cron", "b-interval", "c-date"]);

        let restored = svc.get_job("a-cron").await.unwrap();
        assert_eq!(restored.pipeline_config, config);
        assert_eq!(restored.trigger.to_string(), "cron[0 2 * * * UTC]");

        let interval = svc.get_job("b-interval").await.unwrap();
        match &interval.trigger {
            Trigger::Interval(i) => {
                assert_eq!((i.hours, i.minutes), (1, 30));
            }
            other => panic!("unexpected trigger: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_import_skips_existing_and_elapsed() {
        let svc = service();
        svc.create_cron_job(cron_req("existing")).await.unwrap();

        let document = ConfigDocument {
            exported_at: None,
            scheduler_stats: None,
            jobs: vec![
                JobDocument {
                    job_id: "existing".to_string(),
                    name: None,
                    trigger: JobTriggerSpec {
                        job_type: "cron".to_string(),
                        hour: Some(5),
                        ..Default::default()
                    },
                    config: JobConfigMap::new(),
                },
                JobDocument {
                    job_id: "elapsed".to_string(),
                    name: None,
                    trigger: JobTriggerSpec {
                        job_type: "date".to_string(),
                        run_date: Some(t0() - ChronoDuration::days(1)),
                        ..Default::default()
                    },
                    config: JobConfigMap::new(),
                },
                JobDocument {
                    job_id: "fresh".to_string(),
                    name: None,
                    trigger: JobTriggerSpec {
                        job_type: "interval".to_string(),
                        minutes: Some(10),
                        ..Default::default()
                    },
                    config: JobConfigMap::new(),
                },
            ],
        };

        let imported = svc.import_config(document).await.unwrap();
        assert_eq!(imported, 1);

        // The existing job was not replaced
        let existing = svc.get_job("existing").await.unwrap();
        match &existing.trigger {
            Trigger::Cron(c) => assert_eq!(c.hour, Some(2)),
            other => panic!("unexpected trigger: {:?}", other),
        }
        assert!(svc.get_job("fresh").await.is_ok());
        assert!(svc.get_job("elapsed").await.is_err());
    }

    #[tokio::test]
    async fn test_list_is_stable_between_calls() {
        let svc = service();
        for id in ["one", "two", "three"] {
            svc.create_cron_job(cron_req(id)).await.unwrap();
        }
        let first: Vec<String> = svc.list_jobs().await.unwrap().into_iter().map(|j| j.id).collect();
        let second: Vec<String> = svc.list_jobs().await.unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(first, second);
    }
}
