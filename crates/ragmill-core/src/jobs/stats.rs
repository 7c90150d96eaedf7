//! Live execution counters rebuilt from events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::jobs::events::{EventSubscriber, JobEvent};

/// Snapshot of the most recent failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastError {
    pub job_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub executed: u64,
    pub failed: u64,
    pub missed: u64,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub dropped_events: u64,
}

impl SchedulerStats {
    /// Failed share of finished firings; 0.0 when nothing ran yet
    pub fn failure_rate(&self) -> f64 {
        let finished = self.executed + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }
}

/// Event subscriber maintaining process-lifetime counters.
///
/// Counters are not persisted; a restart starts from zero.
pub struct StatsAggregator {
    executed: AtomicU64,
    failed: AtomicU64,
    missed: AtomicU64,
    last_execution: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<LastError>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            missed: AtomicU64::new(0),
            last_execution: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    /// Current counters; `dropped_events` is filled in by the caller that
    /// owns the bus
    pub fn snapshot(&self, dropped_events: u64) -> SchedulerStats {
        SchedulerStats {
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            last_execution: *self.last_execution.read().expect("stats lock poisoned"),
            last_error: self.last_error.read().expect("stats lock poisoned").clone(),
            dropped_events,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for StatsAggregator {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Executed { finished_at, .. } => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                *self.last_execution.write().expect("stats lock poisoned") = Some(*finished_at);
            }
            JobEvent::Failed {
                job_id,
                finished_at,
                message,
                ..
            } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                *self.last_error.write().expect("stats lock poisoned") = Some(LastError {
                    job_id: job_id.clone(),
                    message: message.clone(),
                    timestamp: *finished_at,
                });
            }
            JobEvent::Missed { .. } => {
                self.missed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}
