//! Job records and execution report artifacts.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::pipeline::JobConfigMap;
use crate::trigger::Trigger;
use crate::{Error, Result};

static JOB_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("job id pattern"));

/// A persistent job definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Stable user-chosen identifier; primary key
    pub id: String,

    /// Human label
    pub name: String,

    /// Firing rule
    pub trigger: Trigger,

    /// Opaque configuration handed to the pipeline runner
    pub pipeline_config: JobConfigMap,

    /// Next scheduled instant; `None` = paused or exhausted
    pub next_fire_time: Option<DateTime<Utc>>,

    /// Most recent firing instant
    pub last_fire_time: Option<DateTime<Utc>>,

    /// Collapse missed windows into a single firing
    pub coalesce: bool,

    /// Concurrent firings of this job admitted by the pool
    pub max_instances: u32,

    /// Grace period before a late firing counts as missed
    pub misfire_grace_secs: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job and derive its first fire time.
    ///
    /// Interval triggers are anchored at the creation instant when no
    /// anchor is set; Date triggers must point at the future.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        mut trigger: Trigger,
        pipeline_config: JobConfigMap,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let id = id.into();
        validate_job_id(&id)?;
        trigger.validate()?;

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

        let next_fire_time = match &trigger {
            Trigger::Date(date) => Some(date.run_date),
            other => other.next_fire_after(now),
        };

        Ok(Self {
            id,
            name: name.into(),
            trigger,
            pipeline_config,
            next_fire_time,
            last_fire_time: None,
            coalesce: true,
            max_instances: 3,
            misfire_grace_secs: 3600,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances.max(1);
        self
    }

    pub fn with_misfire_grace_secs(mut self, secs: u64) -> Self {
        self.misfire_grace_secs = secs;
        self
    }

    /// Record a firing at `now` and derive the following fire time.
    ///
    /// Date triggers exhaust here: `next_fire_time` becomes `None` and the
    /// scheduler ignores the record until it is removed.
    pub fn advance_after_fire(&mut self, now: DateTime<Utc>) {
        self.last_fire_time = Some(now);
        self.next_fire_time = self.trigger.next_fire_after(now);
        self.updated_at = now;
    }

    /// Pull the next fire time to `now` for an immediate run
    pub fn mark_run_now(&mut self, now: DateTime<Utc>) {
        self.next_fire_time = Some(now);
        self.updated_at = now;
    }

    /// Whether the scheduler still has anything to do with this record
    pub fn is_schedulable(&self) -> bool {
        self.next_fire_time.is_some()
    }

    /// Due check against the given instant
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.next_fire_time, Some(next) if next <= now)
    }
}

/// Validate the job id charset
pub fn validate_job_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::validation("job id must not be empty"));
    }
    if !JOB_ID_PATTERN.is_match(id) {
        return Err(Error::validation(format!(
            "job id '{}' contains characters outside [A-Za-z0-9_.-]",
            id
        )));
    }
    Ok(())
}

/// Terminal outcome of a single firing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecOutcome {
    Success,
    Failure,
    Missed,
    Timeout,
}

impl fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecOutcome::Success => write!(f, "success"),
            ExecOutcome::Failure => write!(f, "failure"),
            ExecOutcome::Missed => write!(f, "missed"),
            ExecOutcome::Timeout => write!(f, "timeout"),
        }
    }
}

/// Append-only record of one firing, written as a JSON artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecutionRecord {
    pub job_id: String,

    pub firing_id: Uuid,

    pub fired_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub outcome: ExecOutcome,

    pub message: String,

    /// Captured child output, capped at 1000 bytes
    pub truncated_output: String,
}

impl JobExecutionRecord {
    pub fn new(
        job_id: impl Into<String>,
        firing_id: Uuid,
        fired_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: ExecOutcome,
        message: impl Into<String>,
        output: &str,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            firing_id,
            fired_at,
            finished_at,
            outcome,
            message: truncate_to_bytes(&message.into(), 1000),
            truncated_output: truncate_to_bytes(output, 1000),
        }
    }

    /// Artifact file name: `job_report_<jobId>_<YYYYMMDD_HHMMSS>.json`
    pub fn report_filename(&self) -> String {
        format!(
            "job_report_{}_{}.json",
            self.job_id,
            self.fired_at.format("%Y%m%d_%H%M%S")
        )
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence
fn truncate_to_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
