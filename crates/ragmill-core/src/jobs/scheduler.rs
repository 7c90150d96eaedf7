//! The scheduler core: converts time into firings.
//!
//! A single task owns the loop: peek the earliest job, sleep until its fire
//! time or until a jobs-changed signal, acquire everything due, advance and
//! persist each acquired job, then dispatch to the pool. Persistence
//! happens before dispatch; a restart between the two re-fires at most the
//! un-persisted firing (at-least-once, never silent loss).

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::jobs::events::{EventBus, JobEvent};
use crate::jobs::job::Job;
use crate::jobs::pool::WorkerPool;
use crate::jobs::store::JobStore;
use crate::{Error, Result};

/// Pause before rescanning when everything due is still leased
const LEASED_RESCAN_DELAY: StdDuration = StdDuration::from_millis(50);

/// One-way lifecycle of a scheduler instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerState::Created => write!(f, "created"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Single-instance scheduler loop
pub struct SchedulerCore {
    store: Arc<dyn JobStore>,
    pool: Arc<WorkerPool>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    state_tx: watch::Sender<SchedulerState>,
    jobs_changed: Arc<Notify>,
}

impl SchedulerCore {
    pub fn new(
        store: Arc<dyn JobStore>,
        pool: Arc<WorkerPool>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Created);
        Self {
            store,
            pool,
            bus,
            clock,
            config,
            state_tx,
            jobs_changed: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    /// Wake the loop after any job mutation
    pub fn notify_jobs_changed(&self) {
        self.jobs_changed.notify_one();
    }

    /// Transition `Created -> Running` and spawn the loop task
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.state() != SchedulerState::Created {
            return Err(Error::conflict(format!(
                "scheduler cannot start from state '{}'",
                self.state()
            )));
        }
        self.state_tx.send_replace(SchedulerState::Running);

        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.run_loop().await;
        });

        info!("Scheduler started");
        Ok(())
    }

    /// Quiesce the loop and drain (or kill) in-flight firings
    pub async fn shutdown(&self, wait: bool) {
        if matches!(self.state(), SchedulerState::Stopping | SchedulerState::Stopped) {
            return;
        }
        info!("Scheduler shutting down (wait={})", wait);
        self.state_tx.send_replace(SchedulerState::Stopping);
        self.jobs_changed.notify_one();

        self.pool
            .shutdown(wait, StdDuration::from_secs(self.config.shutdown_grace_secs))
            .await;

        self.state_tx.send_replace(SchedulerState::Stopped);
        info!("Scheduler shut down");
    }

    /// Block until the scheduler reaches `Stopped`
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow() == SchedulerState::Stopped {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn run_loop(&self) {
        let mut consecutive_store_failures: u32 = 0;
        let mut backoff_secs: u64 = 1;
        let mut store_gave_up = false;

        while self.is_running() {
            match self.tick().await {
                Ok(()) => {
                    consecutive_store_failures = 0;
                    backoff_secs = 1;
                }
                Err(e) if e.is_retryable() => {
                    consecutive_store_failures += 1;
                    error!(
                        "Scheduler store error ({} consecutive): {}",
                        consecutive_store_failures, e
                    );
                    if consecutive_store_failures >= self.config.store_failure_threshold {
                        error!(
                            "Job store unavailable after {} attempts, stopping scheduler",
                            consecutive_store_failures
                        );
                        store_gave_up = true;
                        self.state_tx.send_replace(SchedulerState::Stopping);
                        break;
                    }
                    tokio::time::sleep(StdDuration::from_secs(backoff_secs)).await;
                    backoff_secs = (backoff_secs * 2).min(60);
                }
                Err(e) => {
                    // Internal errors never crash the loop
                    error!("Scheduler loop error: {}", e);
                }
            }
        }

        if store_gave_up {
            // Nobody else will finish the transition for a self-initiated
            // stop.
            self.state_tx.send_replace(SchedulerState::Stopped);
        }
        info!("Scheduler loop exited");
    }

    async fn tick(&self) -> Result<()> {
        let mut state_rx = self.state_tx.subscribe();

        let Some(peeked) = self.store.peek_earliest().await? else {
            // Nothing schedulable: wait for a mutation or shutdown.
            tokio::select! {
                _ = self.jobs_changed.notified() => {}
                _ = state_rx.changed() => {}
            }
            return Ok(());
        };

        let Some(next_fire) = peeked.next_fire_time else {
            return Ok(());
        };

        let now = self.clock.now_utc();
        if next_fire > now {
            let delay = (next_fire - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = self.jobs_changed.notified() => return Ok(()),
                _ = state_rx.changed() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if !self.is_running() {
            return Ok(());
        }

        let now = self.clock.now_utc();
        let free_slots = self.pool.free_slots().max(1);
        let due = self.store.acquire_due_jobs(now, free_slots).await?;

        if due.is_empty() {
            // Everything due is leased (e.g. a prior iteration died between
            // lease and write-back); avoid spinning until leases expire.
            tokio::time::sleep(LEASED_RESCAN_DELAY).await;
            return Ok(());
        }

        for job in due {
            self.process_due_job(job, now).await?;
        }
        Ok(())
    }

    /// Advance, persist, then dispatch one acquired job
    async fn process_due_job(&self, mut job: Job, now: DateTime<Utc>) -> Result<()> {
        let Some(original_next) = job.next_fire_time else {
            return Ok(());
        };

        let windows = self.trigger_windows(&job, original_next, now);
        let lateness_secs = (now - original_next).num_seconds().max(0) as u64;
        let grace_exceeded = lateness_secs > job.misfire_grace_secs;

        // Persist the advancement before any dispatch; this also releases
        // the acquisition lease.
        job.advance_after_fire(now);
        self.store.put(&job).await?;

        if job.coalesce {
            if windows.len() > 1 || grace_exceeded {
                if grace_exceeded {
                    warn!(
                        "Job {} misfired by {}s (grace {}s), coalescing {} window(s)",
                        job.id,
                        lateness_secs,
                        job.misfire_grace_secs,
                        windows.len()
                    );
                }
                self.bus.publish(JobEvent::Missed {
                    job_id: job.id.clone(),
                    scheduled_at: original_next,
                });
            }
            let latest = *windows.last().unwrap_or(&original_next);
            self.dispatch(&job, latest);
        } else {
            if grace_exceeded {
                warn!(
                    "Job {} misfired by {}s (grace {}s), replaying {} window(s)",
                    job.id,
                    lateness_secs,
                    job.misfire_grace_secs,
                    windows.len()
                );
                self.bus.publish(JobEvent::Missed {
                    job_id: job.id.clone(),
                    scheduled_at: original_next,
                });
            }
            for window in windows {
                self.dispatch(&job, window);
            }
        }

        Ok(())
    }

    /// Boundaries in `[original_next, now]`; the acquired instant is the
    /// first window
    fn trigger_windows(
        &self,
        job: &Job,
        original_next: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let mut windows = vec![original_next];
        let mut cursor = original_next;
        while let Some(next) = job.trigger.next_fire_after(cursor) {
            if next > now {
                break;
            }
            windows.push(next);
            cursor = next;
        }
        windows
    }

    /// Submit one firing; a rejection is a missed window
    fn dispatch(&self, job: &Job, window: DateTime<Utc>) {
        let outcome = self.pool.submit(job.clone());
        if !outcome.is_accepted() {
            warn!(
                "Pool rejected firing of job {} ({:?}), recording as missed",
                job.id, outcome
            );
            self.bus.publish(JobEvent::Missed {
                job_id: job.id.clone(),
                scheduled_at: window,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jobs::events::EventSubscriber;
    use crate::jobs::pool::JobHandler;
    use crate::jobs::stats::StatsAggregator;
    use crate::jobs::store::MemoryStore;
    use crate::pipeline::JobConfigMap;
    use crate::trigger::{IntervalSchedule, Trigger};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    /// Handler that records firings and reports instant success
    struct RecordingHandler {
        bus: Arc<EventBus>,
        clock: Arc<ManualClock>,
        fired: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: Job, _cancel: CancellationToken) {
            self.fired.lock().unwrap().push(job.id.clone());
            let now = self.clock.now_utc();
            self.bus.publish(JobEvent::Executed {
                job_id: job.id,
                firing_id: Uuid::new_v4(),
                fired_at: now,
                finished_at: now,
            });
        }
    }

    struct Fixture {
        core: Arc<SchedulerCore>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        stats: Arc<StatsAggregator>,
        handler: Arc<RecordingHandler>,
        bus: Arc<EventBus>,
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 23, 12, 0, 0).unwrap()
    }

    fn fixture(max_workers: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let bus = Arc::new(EventBus::new());
        let stats = Arc::new(StatsAggregator::new());
        bus.subscribe_inline(stats.clone() as Arc<dyn EventSubscriber>);

        let handler = Arc::new(RecordingHandler {
            bus: bus.clone(),
            clock: clock.clone(),
            fired: Mutex::new(Vec::new()),
        });
        let pool = Arc::new(WorkerPool::new(max_workers, handler.clone()));

        let config = SchedulerConfig {
            max_workers,
            ..Default::default()
        };
        let core = Arc::new(SchedulerCore::new(
            store.clone() as Arc<dyn JobStore>,
            pool,
            bus.clone(),
            clock.clone() as Arc<dyn Clock>,
            config,
        ));
        Fixture {
            core,
            store,
            clock,
            stats,
            handler,
            bus,
        }
    }

    fn interval_job(id: &str, secs: u64, coalesce: bool, max_instances: u32) -> Job {
        let trigger = Trigger::Interval(IntervalSchedule::new(0, 0, 0, secs).unwrap());
        Job::new(id, id, trigger, JobConfigMap::new(), t0())
            .unwrap()
            .with_coalesce(coalesce)
            .with_max_instances(max_instances)
    }

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(150)).await;
    }

    #[tokio::test]
    async fn test_state_machine_is_one_way() {
        let fx = fixture(4);
        assert_eq!(fx.core.state(), SchedulerState::Created);

        fx.core.start().unwrap();
        assert!(fx.core.is_running());
        assert!(fx.core.start().is_err());

        fx.core.shutdown(true).await;
        assert_eq!(fx.core.state(), SchedulerState::Stopped);
        assert!(fx.core.start().is_err());
    }

    #[tokio::test]
    async fn test_interval_firings_under_virtual_clock() {
        let fx = fixture(10);
        fx.store
            .put(&interval_job("tick", 60, false, 20))
            .await
            .unwrap();

        fx.core.start().unwrap();
        settle().await;

        // Advance five minutes in one jump; every 60s window replays.
        fx.clock.advance(Duration::seconds(300));
        fx.core.notify_jobs_changed();
        settle().await;

        let snapshot = fx.stats.snapshot(fx.bus.dropped_events());
        assert_eq!(snapshot.executed, 5);
        assert_eq!(snapshot.missed, 0);
        assert_eq!(fx.handler.fired.lock().unwrap().len(), 5);

        let job = fx.store.get("tick").await.unwrap().unwrap();
        assert_eq!(job.last_fire_time.unwrap(), t0() + Duration::seconds(300));
        assert_eq!(job.next_fire_time.unwrap(), t0() + Duration::seconds(360));

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_misfire_coalesce_collapses_windows() {
        let fx = fixture(10);
        // Created at t0, never fired; the scheduler first looks at t0+125,
        // like a restart would.
        fx.store
            .put(&interval_job("lagged", 10, true, 3))
            .await
            .unwrap();

        fx.clock.set(t0() + Duration::seconds(125));
        fx.core.start().unwrap();
        settle().await;

        let snapshot = fx.stats.snapshot(0);
        assert_eq!(snapshot.executed, 1);
        assert_eq!(snapshot.missed, 1);

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_misfire_without_coalesce_replays_every_window() {
        let fx = fixture(20);
        fx.store
            .put(&interval_job("replay", 10, false, 20))
            .await
            .unwrap();

        fx.clock.set(t0() + Duration::seconds(125));
        fx.core.start().unwrap();
        settle().await;

        // Windows at t0+10..t0+120: twelve firings, no misfire (inside
        // grace), no missed events.
        let snapshot = fx.stats.snapshot(0);
        assert_eq!(snapshot.executed, 12);
        assert_eq!(snapshot.missed, 0);

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_grace_exceeded_publishes_missed() {
        let fx = fixture(10);
        let job = interval_job("late", 10, true, 3).with_misfire_grace_secs(60);
        fx.store.put(&job).await.unwrap();

        fx.clock.set(t0() + Duration::seconds(500));
        fx.core.start().unwrap();
        settle().await;

        let snapshot = fx.stats.snapshot(0);
        // One coalesced firing still runs; one missed event for the batch.
        assert_eq!(snapshot.executed, 1);
        assert_eq!(snapshot.missed, 1);

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_same_instant_jobs_fire_in_id_order() {
        let fx = fixture(10);
        fx.store.put(&interval_job("bbb", 60, true, 3)).await.unwrap();
        fx.store.put(&interval_job("aaa", 60, true, 3)).await.unwrap();

        fx.core.start().unwrap();
        fx.clock.advance(Duration::seconds(61));
        fx.core.notify_jobs_changed();
        settle().await;

        let fired = fx.handler.fired.lock().unwrap().clone();
        assert_eq!(fired, vec!["aaa", "bbb"]);

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_pool_rejection_becomes_missed() {
        let fx = fixture(20);
        // Twelve due windows but only two admitted instances; the handler
        // is instant so admission pressure comes from max_instances within
        // one dispatch burst. Replay of 12 windows against max_instances=2
        // rejects at least the overflow.
        fx.store
            .put(&interval_job("narrow", 10, false, 2))
            .await
            .unwrap();

        fx.clock.set(t0() + Duration::seconds(125));
        fx.core.start().unwrap();
        settle().await;

        let snapshot = fx.stats.snapshot(0);
        assert_eq!(snapshot.executed + snapshot.missed, 12);
        assert!(snapshot.missed >= 1);

        fx.core.shutdown(true).await;
    }

    #[tokio::test]
    async fn test_empty_store_waits_for_changes() {
        let fx = fixture(4);
        fx.core.start().unwrap();
        settle().await;

        // Nothing scheduled; nothing fired.
        assert_eq!(fx.stats.snapshot(0).executed, 0);

        // A job created after start is picked up via the notifier.
        fx.store.put(&interval_job("late-add", 30, true, 3)).await.unwrap();
        fx.core.notify_jobs_changed();
        settle().await;
        fx.clock.advance(Duration::seconds(31));
        fx.core.notify_jobs_changed();
        settle().await;

        assert_eq!(fx.stats.snapshot(0).executed, 1);

        fx.core.shutdown(true).await;
    }
}
