//! Durable job persistence.
//!
//! The store owns job records exclusively: a primary lookup by id, a stable
//! insertion order for display, an ordering by next fire time for the
//! scheduler, and `acquire_due_jobs`, the scheduler's critical section.
//! Acquired jobs carry a short lease so a second loop iteration cannot
//! re-dispatch them; the lease is released implicitly when the scheduler
//! writes back the advanced fire time (`put`) or deletes the job.
//!
//! Backends are selected by URL scheme: `sqlite:` (embedded single file),
//! `postgres:` (remote server), `memory:` (ephemeral, tests and
//! `--ephemeral` mode).

pub mod memory;
pub mod postgres;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::config::StoreConfig;
use crate::jobs::job::Job;
use crate::{Error, Result};

pub use memory::MemoryStore;
pub use postgres::PostgresJobStore;
pub use sqlite::SqliteJobStore;

/// How long an acquired job stays invisible to the next acquisition scan
pub const ACQUIRE_LEASE_SECS: i64 = 60;

/// Current persistent schema version
pub const SCHEMA_VERSION: i64 = 1;

/// Durable, transactional storage of job records
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace by id; atomic; releases any lease on the record.
    /// Insertion position is assigned on first insert and kept on replace.
    async fn put(&self, job: &Job) -> Result<()>;

    /// Fetch by id
    async fn get(&self, id: &str) -> Result<Option<Job>>;

    /// Delete by id; `Ok(false)` when absent
    async fn delete(&self, id: &str) -> Result<bool>;

    /// All jobs in insertion order
    async fn list(&self) -> Result<Vec<Job>>;

    /// The schedulable job with the smallest next fire time; ties break on
    /// the lexicographically smaller id
    async fn peek_earliest(&self) -> Result<Option<Job>>;

    /// Atomically return and lease all due, unleased jobs, up to `max_n`,
    /// ordered by `(next_fire_time, id)`. The sole source of firings.
    async fn acquire_due_jobs(&self, now: DateTime<Utc>, max_n: usize) -> Result<Vec<Job>>;

    /// Number of stored jobs
    async fn count(&self) -> Result<u64>;

    /// Cheap reachability probe for health checks
    async fn ping(&self) -> Result<()>;
}

/// Open the backend selected by the configured URL scheme
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn JobStore>> {
    let url = config.url.trim();
    if url == "memory:" || url == "memory://" {
        Ok(Arc::new(MemoryStore::new()))
    } else if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteJobStore::connect(config).await?))
    } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
        Ok(Arc::new(PostgresJobStore::connect(config).await?))
    } else {
        Err(Error::config(format!(
            "unrecognized store URL scheme: {}",
            url
        )))
    }
}

pub(crate) fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn ms_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::store_unavailable(format!("corrupt timestamp in job store: {}", ms)))
}

/// Verdict of the schema version check shared by the SQL backends
pub(crate) fn check_schema_version(found: Option<i64>, auto_migrate: bool) -> Result<bool> {
    match found {
        None => {
            if auto_migrate {
                Ok(true) // caller creates the schema
            } else {
                Err(Error::store_unavailable(
                    "job store schema is not initialized and auto-migration is disabled",
                ))
            }
        }
        Some(v) if v == SCHEMA_VERSION => Ok(false),
        Some(v) if v < SCHEMA_VERSION => {
            if auto_migrate {
                Ok(true)
            } else {
                Err(Error::store_unavailable(format!(
                    "job store schema version {} is behind {} and auto-migration is disabled",
                    v, SCHEMA_VERSION
                )))
            }
        }
        Some(v) => Err(Error::store_unavailable(format!(
            "job store schema version {} is newer than supported version {}",
            v, SCHEMA_VERSION
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_memory() {
        let config = StoreConfig {
            url: "memory:".to_string(),
            ..Default::default()
        };
        let store = open_store(&config).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_store_unknown_scheme() {
        let config = StoreConfig {
            url: "redis://localhost".to_string(),
            ..Default::default()
        };
        assert!(open_store(&config).await.is_err());
    }

    #[test]
    fn test_schema_version_check() {
        assert!(check_schema_version(None, true).unwrap());
        assert!(!check_schema_version(Some(SCHEMA_VERSION), false).unwrap());
        assert!(check_schema_version(None, false).is_err());
        assert!(check_schema_version(Some(SCHEMA_VERSION + 1), true).is_err());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let ms = datetime_to_ms(now);
        let back = ms_to_datetime(ms).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }
}
