//! Lifecycle event fan-out.
//!
//! The pool/runner side is the single producer. Inline subscribers (stats,
//! logging) observe every event synchronously and must not block; external
//! consumers take a bounded broadcast receiver where a lagging reader loses
//! the oldest events and the bus counts what was dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::jobs::job::ExecOutcome;

/// Per-subscriber broadcast buffer size
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A scheduler lifecycle event
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A firing finished with exit code 0
    Executed {
        job_id: String,
        firing_id: Uuid,
        fired_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },

    /// A firing failed: non-zero exit, spawn error, or deadline
    Failed {
        job_id: String,
        firing_id: Uuid,
        fired_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: ExecOutcome,
        message: String,
    },

    /// A scheduled window was skipped (misfire, coalesce, or pool
    /// rejection)
    Missed {
        job_id: String,
        scheduled_at: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Executed { job_id, .. } => job_id,
            JobEvent::Failed { job_id, .. } => job_id,
            JobEvent::Missed { job_id, .. } => job_id,
        }
    }
}

/// Synchronous, non-blocking observer of every published event
pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &JobEvent);
}

/// In-process fan-out of job events
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
    tx: broadcast::Sender<JobEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            subscribers: RwLock::new(Vec::new()),
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a synchronous subscriber
    pub fn subscribe_inline(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .push(subscriber);
    }

    /// Take a bounded receiver; slow consumption drops oldest events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
            dropped: Arc::clone(&self.dropped_events),
        }
    }

    /// Publish one event to every subscriber; never blocks the producer
    pub fn publish(&self, event: JobEvent) {
        for subscriber in self.subscribers.read().expect("subscriber lock poisoned").iter() {
            subscriber.on_event(&event);
        }
        // No receivers is fine; broadcast overflow is handled receiver-side.
        let _ = self.tx.send(event);
    }

    /// Events lost to lagging broadcast receivers
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded event receiver for external consumers
pub struct EventReceiver {
    rx: broadcast::Receiver<JobEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Next event; `None` once the bus is gone. Lag is absorbed here and
    /// recorded on the bus counter.
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Inline subscriber that mirrors events into the log
pub struct LoggingSubscriber;

impl EventSubscriber for LoggingSubscriber {
    fn on_event(&self, event: &JobEvent) {
        match event {
            JobEvent::Executed { job_id, .. } => {
                info!("Job executed successfully: {}", job_id);
            }
            JobEvent::Failed {
                job_id,
                outcome,
                message,
                ..
            } => {
                error!("Job failed: {}, outcome: {}, error: {}", job_id, outcome, message);
            }
            JobEvent::Missed {
                job_id,
                scheduled_at,
            } => {
                warn!("Job missed: {} (scheduled at {})", job_id, scheduled_at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSubscriber {
        seen: AtomicUsize,
    }

    impl EventSubscriber for CountingSubscriber {
        fn on_event(&self, _event: &JobEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn missed(job_id: &str) -> JobEvent {
        JobEvent::Missed {
            job_id: job_id.to_string(),
            scheduled_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inline_subscribers_see_every_event() {
        let bus = EventBus::new();
        let counter = Arc::new(CountingSubscriber {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe_inline(counter.clone());

        for _ in 0..10 {
            bus.publish(missed("j"));
        }
        assert_eq!(counter.seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_publish_without_receivers_does_not_block() {
        let bus = EventBus::new();
        for _ in 0..(EVENT_CHANNEL_CAPACITY * 4) {
            bus.publish(missed("j"));
        }
    }

    #[tokio::test]
    async fn test_slow_receiver_drops_oldest() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let total = EVENT_CHANNEL_CAPACITY as u64 + 44;
        for i in 0..total {
            bus.publish(missed(&format!("job-{}", i)));
        }

        // First recv absorbs the lag: the 44 oldest events are gone.
        let first = rx.recv().await.unwrap();
        assert_eq!(bus.dropped_events(), 44);
        assert_eq!(first.job_id(), "job-44");
    }
}
