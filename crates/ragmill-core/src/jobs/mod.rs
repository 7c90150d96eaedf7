//! Background job scheduling system
//!
//! This module provides the scheduler core driving the ingestion pipeline:
//! - Durable job storage (SQLite, PostgreSQL, or in-memory)
//! - Cron, interval, and one-shot triggers
//! - A single scheduler loop converting time into firings
//! - A bounded worker pool with per-job admission
//! - Child-process execution of the pipeline binary
//! - Lifecycle events feeding live statistics and health
//! - Idempotent first-start seeding of the default job
//!
//! ## Architecture
//!
//! The loop peeks the earliest job, sleeps until its fire time or until a
//! mutation signal, acquires everything due under a store lease, persists
//! the advanced fire times, and only then dispatches to the pool. Each
//! firing spawns the pipeline as a child process and reports its outcome
//! as exactly one terminal event; subscribers turn events into counters,
//! logs, and health verdicts.

pub mod bootstrap;
pub mod events;
pub mod health;
pub mod job;
pub mod pool;
pub mod presets;
pub mod runner;
pub mod scheduler;
pub mod stats;
pub mod store;

// Re-export main types
pub use bootstrap::{run_first_time_bootstrap, FIRST_RUN_MARKER};
pub use events::{EventBus, EventReceiver, EventSubscriber, JobEvent, LoggingSubscriber};
pub use health::{HealthEvaluator, HealthReport, HealthVerdict};
pub use job::{ExecOutcome, Job, JobExecutionRecord};
pub use pool::{JobHandler, SubmitOutcome, WorkerPool};
pub use presets::{Preset, PresetSpec};
pub use runner::{ExecError, JobRunner};
pub use scheduler::{SchedulerCore, SchedulerState};
pub use stats::{LastError, SchedulerStats, StatsAggregator};
pub use store::{open_store, JobStore, MemoryStore, PostgresJobStore, SqliteJobStore};
