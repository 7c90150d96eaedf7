//! Bounded execution pool for firings.
//!
//! Admission is two-layered: a per-job cap (`max_instances`) and a global
//! capacity with no backlog queue. A rejection is reported to the caller,
//! which turns it into a `Missed` event. Tasks are never preempted;
//! shutdown cancellation propagates cooperatively through the handler's
//! child-process boundary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::jobs::job::Job;

/// The callable the pool invokes for every firing.
///
/// Handlers report outcomes as events, never as return values.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job, cancel: CancellationToken);
}

/// Admission decision for one submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// This job already runs at its `max_instances` cap
    RejectedMaxInstances,
    /// Total in-flight firings reached pool capacity
    RejectedSaturated,
    /// The pool stopped accepting work
    RejectedShuttingDown,
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted)
    }
}

/// Bounded pool of concurrently running firings
pub struct WorkerPool {
    capacity: usize,
    handler: Arc<dyn JobHandler>,
    in_flight: Arc<AtomicUsize>,
    per_job: Arc<DashMap<String, usize>>,
    accepting: AtomicBool,
    cancel: CancellationToken,
    drained: Arc<Notify>,
}

impl WorkerPool {
    pub fn new(capacity: usize, handler: Arc<dyn JobHandler>) -> Self {
        let capacity = capacity.max(1);
        info!("Creating worker pool with capacity {}", capacity);
        Self {
            capacity,
            handler,
            in_flight: Arc::new(AtomicUsize::new(0)),
            per_job: Arc::new(DashMap::new()),
            accepting: AtomicBool::new(true),
            cancel: CancellationToken::new(),
            drained: Arc::new(Notify::new()),
        }
    }

    /// Submit one firing; non-blocking
    pub fn submit(&self, job: Job) -> SubmitOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            return SubmitOutcome::RejectedShuttingDown;
        }

        let running_this_job = self.per_job.get(&job.id).map(|c| *c).unwrap_or(0);
        if running_this_job >= job.max_instances as usize {
            return SubmitOutcome::RejectedMaxInstances;
        }

        if self.in_flight.load(Ordering::SeqCst) >= self.capacity {
            return SubmitOutcome::RejectedSaturated;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        *self.per_job.entry(job.id.clone()).or_insert(0) += 1;

        let handler = Arc::clone(&self.handler);
        let in_flight = Arc::clone(&self.in_flight);
        let per_job = Arc::clone(&self.per_job);
        let drained = Arc::clone(&self.drained);
        let cancel = self.cancel.child_token();
        let job_id = job.id.clone();

        tokio::spawn(async move {
            handler.handle(job, cancel).await;

            if let Some(mut count) = per_job.get_mut(&job_id) {
                if *count <= 1 {
                    drop(count);
                    per_job.remove(&job_id);
                } else {
                    *count -= 1;
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            drained.notify_waiters();
        });

        SubmitOutcome::Accepted
    }

    /// Slots available for new firings right now
    pub fn free_slots(&self) -> usize {
        self.capacity
            .saturating_sub(self.in_flight.load(Ordering::SeqCst))
    }

    /// Currently running firings across all jobs
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Currently running firings of one job
    pub fn running_count(&self, job_id: &str) -> usize {
        self.per_job.get(job_id).map(|c| *c).unwrap_or(0)
    }

    /// Stop admissions; optionally wait for in-flight work.
    ///
    /// With `wait`, in-flight firings get `grace` to finish on their own
    /// before the cancellation token kills their children.
    pub async fn shutdown(&self, wait: bool, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("Worker pool shutting down (wait={})", wait);

        if !wait {
            return;
        }

        if !self.wait_for_drain(grace).await {
            warn!(
                "Worker pool still has {} firing(s) after {}s grace, killing",
                self.in_flight(),
                grace.as_secs()
            );
            self.cancel.cancel();
            // Handlers kill their children promptly once cancelled.
            if !self.wait_for_drain(Duration::from_secs(10)).await {
                warn!("Worker pool tasks failed to drain after cancellation");
            }
        }
    }

    async fn wait_for_drain(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let notified = self.drained.notified();
            if self.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return false;
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }
}
