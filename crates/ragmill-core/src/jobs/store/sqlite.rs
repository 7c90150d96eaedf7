//! Embedded SQLite job store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use tracing::info;

use super::{
    check_schema_version, datetime_to_ms, ms_to_datetime, JobStore, ACQUIRE_LEASE_SECS,
    SCHEMA_VERSION,
};
use crate::config::StoreConfig;
use crate::jobs::job::Job;
use crate::trigger::Trigger;
use crate::{Error, Result};

const SELECT_COLUMNS: &str = "id, name, trigger_spec, pipeline_config, next_fire_ms, \
     last_fire_ms, coalesce_enabled, max_instances, misfire_grace_secs, created_ms, updated_ms";

/// Single-file transactional job store
pub struct SqliteJobStore {
    pool: Pool<Sqlite>,
}

impl SqliteJobStore {
    /// Open (and if needed create) the database at the configured URL
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let path = config
            .url
            .trim_start_matches("sqlite:")
            .trim_start_matches("//");

        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::store_unavailable(format!(
                            "cannot create job store directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        info!("Opening SQLite job store at {}", path);

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| Error::store_unavailable(format!("invalid sqlite URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(options)
            .await
            .map_err(|e| Error::store_unavailable(format!("cannot open job store: {}", e)))?;

        let store = Self { pool };
        store.ensure_schema(config.auto_migrate).await?;

        info!("SQLite job store ready");
        Ok(store)
    }

    async fn ensure_schema(&self, auto_migrate: bool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scheduler_schema_version (version BIGINT PRIMARY KEY)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::store_unavailable(format!("schema probe failed: {}", e)))?;

        let row = sqlx::query("SELECT MAX(version) AS version FROM scheduler_schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::store_unavailable(format!("schema probe failed: {}", e)))?;
        let found: Option<i64> = row.try_get("version")?;

        if check_schema_version(found, auto_migrate)? {
            info!("Initializing job store schema (version {})", SCHEMA_VERSION);
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS scheduler_jobs (
                    id TEXT PRIMARY KEY,
                    seq BIGINT NOT NULL,
                    name TEXT NOT NULL,
                    trigger_spec TEXT NOT NULL,
                    pipeline_config TEXT NOT NULL,
                    next_fire_ms BIGINT,
                    last_fire_ms BIGINT,
                    coalesce_enabled BIGINT NOT NULL,
                    max_instances BIGINT NOT NULL,
                    misfire_grace_secs BIGINT NOT NULL,
                    created_ms BIGINT NOT NULL,
                    updated_ms BIGINT NOT NULL,
                    lease_until_ms BIGINT
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_scheduler_jobs_next_fire \
                 ON scheduler_jobs (next_fire_ms, id) WHERE next_fire_ms IS NOT NULL",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query("INSERT OR IGNORE INTO scheduler_schema_version (version) VALUES (?1)")
                .bind(SCHEMA_VERSION)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let trigger_spec: String = row.try_get("trigger_spec")?;
    let pipeline_config: String = row.try_get("pipeline_config")?;
    let next_fire_ms: Option<i64> = row.try_get("next_fire_ms")?;
    let last_fire_ms: Option<i64> = row.try_get("last_fire_ms")?;

    Ok(Job {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        trigger: Trigger::deserialize(serde_json::from_str(&trigger_spec)?)?,
        pipeline_config: serde_json::from_str(&pipeline_config)?,
        next_fire_time: next_fire_ms.map(ms_to_datetime).transpose()?,
        last_fire_time: last_fire_ms.map(ms_to_datetime).transpose()?,
        coalesce: row.try_get::<i64, _>("coalesce_enabled")? != 0,
        max_instances: row.try_get::<i64, _>("max_instances")? as u32,
        misfire_grace_secs: row.try_get::<i64, _>("misfire_grace_secs")? as u64,
        created_at: ms_to_datetime(row.try_get("created_ms")?)?,
        updated_at: ms_to_datetime(row.try_get("updated_ms")?)?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let trigger_spec = serde_json::to_string(&job.trigger.serialize()?)?;
        let pipeline_config = serde_json::to_string(&job.pipeline_config)?;

        sqlx::query(
            r#"
            INSERT INTO scheduler_jobs
                (id, seq, name, trigger_spec, pipeline_config, next_fire_ms, last_fire_ms,
                 coalesce_enabled, max_instances, misfire_grace_secs, created_ms, updated_ms,
                 lease_until_ms)
            VALUES
                (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM scheduler_jobs), ?2, ?3, ?4, ?5,
                 ?6, ?7, ?8, ?9, ?10, ?11, NULL)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                trigger_spec = excluded.trigger_spec,
                pipeline_config = excluded.pipeline_config,
                next_fire_ms = excluded.next_fire_ms,
                last_fire_ms = excluded.last_fire_ms,
                coalesce_enabled = excluded.coalesce_enabled,
                max_instances = excluded.max_instances,
                misfire_grace_secs = excluded.misfire_grace_secs,
                created_ms = excluded.created_ms,
                updated_ms = excluded.updated_ms,
                lease_until_ms = NULL
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(trigger_spec)
        .bind(pipeline_config)
        .bind(job.next_fire_time.map(datetime_to_ms))
        .bind(job.last_fire_time.map(datetime_to_ms))
        .bind(job.coalesce as i64)
        .bind(job.max_instances as i64)
        .bind(job.misfire_grace_secs as i64)
        .bind(datetime_to_ms(job.created_at))
        .bind(datetime_to_ms(job.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs WHERE id = ?1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn peek_earliest(&self) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs WHERE next_fire_ms IS NOT NULL \
             ORDER BY next_fire_ms ASC, id ASC LIMIT 1",
            SELECT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn acquire_due_jobs(&self, now: DateTime<Utc>, max_n: usize) -> Result<Vec<Job>> {
        let now_ms = datetime_to_ms(now);
        let lease_ms = datetime_to_ms(now + Duration::seconds(ACQUIRE_LEASE_SECS));

        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM scheduler_jobs \
             WHERE next_fire_ms IS NOT NULL AND next_fire_ms <= ?1 \
               AND (lease_until_ms IS NULL OR lease_until_ms <= ?1) \
             ORDER BY next_fire_ms ASC, id ASC LIMIT ?2",
            SELECT_COLUMNS
        ))
        .bind(now_ms)
        .bind(max_n as i64)
        .fetch_all(&mut *tx)
        .await?;

        let jobs: Vec<Job> = rows.iter().map(job_from_row).collect::<Result<_>>()?;

        for job in &jobs {
            sqlx::query("UPDATE scheduler_jobs SET lease_until_ms = ?1 WHERE id = ?2")
                .bind(lease_ms)
                .bind(&job.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(jobs)
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM scheduler_jobs")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JobConfigMap;
    use crate::trigger::IntervalSchedule;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 23, 12, 0, 0).unwrap()
    }

    fn interval_job(id: &str, secs: u64) -> Job {
        let trigger = Trigger::Interval(IntervalSchedule::new(0, 0, 0, secs).unwrap());
        Job::new(id, id, trigger, JobConfigMap::new(), now()).unwrap()
    }

    async fn temp_store(dir: &tempfile::TempDir) -> SqliteJobStore {
        let config = StoreConfig {
            url: format!("sqlite:{}/jobs.db", dir.path().display()),
            ..Default::default()
        };
        SqliteJobStore::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;

        let mut job = interval_job("tick", 60);
        job.pipeline_config.insert(
            "incremental_mode".to_string(),
            serde_json::Value::String("incremental".to_string()),
        );
        job.coalesce = false;
        store.put(&job).await.unwrap();

        let loaded = store.get("tick").await.unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.trigger, job.trigger);
        assert_eq!(loaded.pipeline_config, job.pipeline_config);
        assert_eq!(loaded.next_fire_time, job.next_fire_time);
        assert!(!loaded.coalesce);
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = temp_store(&dir).await;
            store.put(&interval_job("persisted", 60)).await.unwrap();
        }
        let store = temp_store(&dir).await;
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.get("persisted").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_and_release_via_put() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        store.put(&interval_job("a", 30)).await.unwrap();

        let later = now() + Duration::seconds(31);
        let acquired = store.acquire_due_jobs(later, 5).await.unwrap();
        assert_eq!(acquired.len(), 1);
        assert!(store.acquire_due_jobs(later, 5).await.unwrap().is_empty());

        let mut advanced = acquired[0].clone();
        advanced.advance_after_fire(later);
        store.put(&advanced).await.unwrap();

        let next_due = later + Duration::seconds(30);
        assert_eq!(store.acquire_due_jobs(next_due, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insertion_order_and_peek() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir).await;
        store.put(&interval_job("second-created", 10)).await.unwrap();
        store.put(&interval_job("another", 99999)).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["second-created", "another"]);

        let earliest = store.peek_earliest().await.unwrap().unwrap();
        assert_eq!(earliest.id, "second-created");
    }
}
