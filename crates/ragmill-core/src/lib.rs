pub mod clock;
pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod service;
pub mod trigger;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BootstrapConfig, Config, LoggingConfig, PipelineConfig, SchedulerConfig, ServerConfig,
    StoreConfig,
};
pub use error::{Error, ErrorBody, Result};
pub use jobs::{
    open_store, EventBus, EventReceiver, ExecOutcome, HealthReport, HealthVerdict, Job, JobEvent,
    JobExecutionRecord, JobStore, MemoryStore, SchedulerState, SchedulerStats,
};
pub use pipeline::{build_pipeline_argv, JobConfigMap};
pub use service::{
    ConfigDocument, CreateCronJob, CreateIntervalJob, CreateOneTimeJob, JobDocument,
    JobTriggerSpec, SchedulerService, UpdateJobRequest,
};
pub use trigger::Trigger;

/// Current version of ragmill
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_available() {
        assert!(!VERSION.is_empty());
    }
}
