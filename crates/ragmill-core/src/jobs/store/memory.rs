//! Ephemeral in-memory job store.
//!
//! Same contract as the SQL backends, minus durability. Used by tests and
//! by ephemeral mode where jobs intentionally do not survive a restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{JobStore, ACQUIRE_LEASE_SECS};
use crate::jobs::job::Job;
use crate::Result;

struct StoredJob {
    job: Job,
    seq: u64,
    lease_until: Option<DateTime<Utc>>,
}

/// In-memory store backed by a mutexed map
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    jobs: HashMap<String, StoredJob>,
    next_seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                next_seq: 1,
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn put(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        match inner.jobs.get_mut(&job.id) {
            Some(existing) => {
                existing.job = job.clone();
                existing.lease_until = None;
            }
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.jobs.insert(
                    job.id.clone(),
                    StoredJob {
                        job: job.clone(),
                        seq,
                        lease_until: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.jobs.get(id).map(|stored| stored.job.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.jobs.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let mut stored: Vec<&StoredJob> = inner.jobs.values().collect();
        stored.sort_by_key(|s| s.seq);
        Ok(stored.into_iter().map(|s| s.job.clone()).collect())
    }

    async fn peek_earliest(&self) -> Result<Option<Job>> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner
            .jobs
            .values()
            .filter(|s| s.job.next_fire_time.is_some())
            .min_by_key(|s| (s.job.next_fire_time, s.job.id.clone()))
            .map(|s| s.job.clone()))
    }

    async fn acquire_due_jobs(&self, now: DateTime<Utc>, max_n: usize) -> Result<Vec<Job>> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let mut due: Vec<&mut StoredJob> = inner
            .jobs
            .values_mut()
            .filter(|s| {
                s.job.is_due(now) && s.lease_until.map(|lease| lease <= now).unwrap_or(true)
            })
            .collect();
        due.sort_by_key(|s| (s.job.next_fire_time, s.job.id.clone()));
        due.truncate(max_n);

        let lease = now + Duration::seconds(ACQUIRE_LEASE_SECS);
        let mut acquired = Vec::with_capacity(due.len());
        for stored in due {
            stored.lease_until = Some(lease);
            acquired.push(stored.job.clone());
        }
        Ok(acquired)
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.lock().expect("store lock poisoned");
        Ok(inner.jobs.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::JobConfigMap;
    use crate::trigger::{IntervalSchedule, Trigger};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 23, 12, 0, 0).unwrap()
    }

    fn interval_job(id: &str, secs: u64) -> Job {
        let trigger = Trigger::Interval(IntervalSchedule::new(0, 0, 0, secs).unwrap());
        Job::new(id, id, trigger, JobConfigMap::new(), now()).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        let job = interval_job("a", 60);

        store.put(&job).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert_eq!(store.count().await.unwrap(), 1);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let store = MemoryStore::new();
        for id in ["zeta", "alpha", "mid"] {
            store.put(&interval_job(id, 60)).await.unwrap();
        }
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);

        // Replacing a record does not move it
        store.put(&interval_job("alpha", 30)).await.unwrap();
        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_peek_earliest_skips_exhausted() {
        let store = MemoryStore::new();
        let mut done = interval_job("done", 10);
        done.next_fire_time = None;
        store.put(&done).await.unwrap();
        store.put(&interval_job("late", 120)).await.unwrap();
        store.put(&interval_job("soon", 30)).await.unwrap();

        let earliest = store.peek_earliest().await.unwrap().unwrap();
        assert_eq!(earliest.id, "soon");
    }

    #[tokio::test]
    async fn test_peek_earliest_ties_break_on_id() {
        let store = MemoryStore::new();
        store.put(&interval_job("bbb", 60)).await.unwrap();
        store.put(&interval_job("aaa", 60)).await.unwrap();
        let earliest = store.peek_earliest().await.unwrap().unwrap();
        assert_eq!(earliest.id, "aaa");
    }

    #[tokio::test]
    async fn test_acquire_due_jobs_leases() {
        let store = MemoryStore::new();
        store.put(&interval_job("a", 60)).await.unwrap();
        store.put(&interval_job("b", 60)).await.unwrap();

        let later = now() + Duration::seconds(61);
        let acquired = store.acquire_due_jobs(later, 10).await.unwrap();
        assert_eq!(acquired.len(), 2);
        assert_eq!(acquired[0].id, "a");

        // Leased jobs are invisible to a second scan
        let again = store.acquire_due_jobs(later, 10).await.unwrap();
        assert!(again.is_empty());

        // Writing back releases the lease
        let mut advanced = acquired[0].clone();
        advanced.advance_after_fire(later);
        store.put(&advanced).await.unwrap();
        let reacquired = store
            .acquire_due_jobs(later + Duration::seconds(60), 10)
            .await
            .unwrap();
        assert_eq!(reacquired.len(), 1);
        assert_eq!(reacquired[0].id, "a");
    }

    #[tokio::test]
    async fn test_acquire_respects_max_n() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.put(&interval_job(id, 1)).await.unwrap();
        }
        let later = now() + Duration::seconds(5);
        let acquired = store.acquire_due_jobs(later, 2).await.unwrap();
        assert_eq!(acquired.len(), 2);
        assert_eq!(acquired[0].id, "a");
        assert_eq!(acquired[1].id, "b");
    }
}
