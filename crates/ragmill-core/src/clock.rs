//! Wall-clock abstraction so tests can inject virtual time.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Source of the current wall-clock instant.
///
/// The scheduler never calls `Utc::now()` directly; everything time-driven
/// goes through a shared `Clock` handle.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for deterministic tests.
///
/// Tests advance it explicitly and then poke the scheduler's jobs-changed
/// notifier so the loop re-evaluates "now".
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write().expect("clock lock poisoned") = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}
