//! Pipeline child-process execution.
//!
//! One runner invocation is one firing: build argv, spawn the pipeline
//! binary, capture output with bounded buffers, enforce the deadline, then
//! emit exactly one terminal event and write one report artifact. The
//! runner never returns an error to the pool; every outcome is an event.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::jobs::events::{EventBus, JobEvent};
use crate::jobs::job::{ExecOutcome, Job, JobExecutionRecord};
use crate::jobs::pool::JobHandler;
use crate::pipeline::build_pipeline_argv;

/// Cap on captured bytes per stream
const CAPTURE_LIMIT: usize = 1024 * 1024;

/// Why a firing produced no successful exit status
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("failed waiting on pipeline process: {0}")]
    Wait(std::io::Error),

    #[error("pipeline timed out after {0}s")]
    DeadlineExceeded(u64),

    #[error("pipeline killed during scheduler shutdown")]
    Cancelled,
}

impl ExecError {
    fn outcome(&self) -> ExecOutcome {
        match self {
            ExecError::DeadlineExceeded(_) => ExecOutcome::Timeout,
            _ => ExecOutcome::Failure,
        }
    }
}

/// Executes firings by spawning the pipeline binary
pub struct JobRunner {
    pipeline: PipelineConfig,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    deadline: Duration,
}

impl JobRunner {
    pub fn new(
        pipeline: PipelineConfig,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        deadline: Duration,
    ) -> Self {
        Self {
            pipeline,
            bus,
            clock,
            deadline,
        }
    }

    async fn execute(&self, job: &Job, cancel: CancellationToken) {
        let fired_at = self.clock.now_utc();
        let firing_id = Uuid::new_v4();
        let argv = build_pipeline_argv(&self.pipeline, &job.pipeline_config);

        info!(
            "Starting pipeline job: {} ({} {})",
            job.id,
            self.pipeline.binary,
            argv.join(" ")
        );

        let spawned = Command::new(&self.pipeline.binary)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let err = ExecError::Spawn {
                    binary: self.pipeline.binary.clone(),
                    source: e,
                };
                let finished_at = self.clock.now_utc();
                self.finish(
                    job,
                    firing_id,
                    fired_at,
                    finished_at,
                    err.outcome(),
                    err.to_string(),
                    String::new(),
                )
                .await;
                return;
            }
        };

        let stdout_task = child.stdout.take().map(|out| tokio::spawn(read_capped(out)));
        let stderr_task = child.stderr.take().map(|err| tokio::spawn(read_capped(err)));

        let waited: std::result::Result<std::process::ExitStatus, ExecError> = tokio::select! {
            res = tokio::time::timeout(self.deadline, child.wait()) => match res {
                Ok(Ok(status)) => Ok(status),
                Ok(Err(e)) => Err(ExecError::Wait(e)),
                Err(_) => {
                    let _ = child.kill().await;
                    Err(ExecError::DeadlineExceeded(self.deadline.as_secs()))
                }
            },
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(ExecError::Cancelled)
            }
        };

        let stdout = collect_capture(stdout_task, &job.id, "stdout").await;
        let stderr = collect_capture(stderr_task, &job.id, "stderr").await;
        let finished_at = self.clock.now_utc();

        let (outcome, message) = match waited {
            Ok(status) if status.success() => {
                (ExecOutcome::Success, "Pipeline completed successfully".to_string())
            }
            Ok(status) => match status.code() {
                Some(code) => {
                    let message = if stderr.trim().is_empty() {
                        format!("pipeline exited with code {}", code)
                    } else {
                        stderr.clone()
                    };
                    (ExecOutcome::Failure, message)
                }
                // Signal-induced termination counts as a timeout kill
                None => (
                    ExecOutcome::Timeout,
                    "pipeline terminated by signal".to_string(),
                ),
            },
            Err(err) => (err.outcome(), err.to_string()),
        };

        self.finish(job, firing_id, fired_at, finished_at, outcome, message, stdout)
            .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        job: &Job,
        firing_id: Uuid,
        fired_at: chrono::DateTime<chrono::Utc>,
        finished_at: chrono::DateTime<chrono::Utc>,
        outcome: ExecOutcome,
        message: String,
        output: String,
    ) {
        let record = JobExecutionRecord::new(
            &job.id,
            firing_id,
            fired_at,
            finished_at,
            outcome,
            message.clone(),
            &output,
        );
        self.write_report(&record).await;

        let event = match outcome {
            ExecOutcome::Success => JobEvent::Executed {
                job_id: job.id.clone(),
                firing_id,
                fired_at,
                finished_at,
            },
            _ => JobEvent::Failed {
                job_id: job.id.clone(),
                firing_id,
                fired_at,
                finished_at,
                outcome,
                message,
            },
        };
        self.bus.publish(event);
    }

    /// Best-effort artifact write; a full disk must not take the loop down
    async fn write_report(&self, record: &JobExecutionRecord) {
        let dir = std::path::Path::new(&self.pipeline.artifact_dir);
        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            warn!("Failed to create artifact directory {}: {}", dir.display(), e);
            return;
        }
        let path = dir.join(record.report_filename());
        match serde_json::to_string_pretty(record) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&path, body).await {
                    warn!("Failed to write job report {}: {}", path.display(), e);
                } else {
                    info!("Job report saved: {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize job report for {}: {}", record.job_id, e),
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: Job, cancel: CancellationToken) {
        self.execute(&job, cancel).await;
    }
}

/// Read a stream into a capped buffer; the overflow flag marks dropped tail
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> (String, bool) {
    let mut captured = Vec::new();
    let mut overflowed = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if captured.len() < CAPTURE_LIMIT {
                    let take = n.min(CAPTURE_LIMIT - captured.len());
                    captured.extend_from_slice(&buf[..take]);
                    if take < n {
                        overflowed = true;
                    }
                } else {
                    overflowed = true;
                }
            }
            Err(_) => break,
        }
    }
    (String::from_utf8_lossy(&captured).into_owned(), overflowed)
}

async fn collect_capture(
    task: Option<tokio::task::JoinHandle<(String, bool)>>,
    job_id: &str,
    stream: &str,
) -> String {
    match task {
        Some(task) => match task.await {
            Ok((text, overflowed)) => {
                if overflowed {
                    warn!("Captured {} for job {} overflowed and was truncated", stream, job_id);
                }
                text
            }
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}
