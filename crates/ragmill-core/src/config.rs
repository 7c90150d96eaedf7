use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for ragmill
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            pipeline: PipelineConfig::default(),
            bootstrap: BootstrapConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        // Try to load from RAGMILL_CONFIG env var first
        if let Ok(config_path) = std::env::var("RAGMILL_CONFIG") {
            return Self::load(&config_path);
        }

        // Try default locations
        let default_paths = [
            "./config/default.toml",
            "./ragmill.toml",
            "/etc/ragmill/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.server.port == 0 {
            return Err(Error::Config("Invalid server port".to_string()));
        }

        if self.scheduler.max_workers == 0 {
            return Err(Error::Config("scheduler.max_workers must be at least 1".to_string()));
        }

        if self.scheduler.max_instances == 0 {
            return Err(Error::Config("scheduler.max_instances must be positive".to_string()));
        }

        if self.scheduler.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(Error::Config(format!(
                "Unknown scheduler timezone: {}",
                self.scheduler.timezone
            )));
        }

        if self.store.url.is_empty() {
            return Err(Error::Config("store.url must not be empty".to_string()));
        }

        if self.pipeline.binary.is_empty() {
            return Err(Error::Config("pipeline.binary must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of concurrently running firings
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Default coalesce policy for new jobs
    #[serde(default = "default_true")]
    pub coalesce: bool,

    /// Default max concurrent instances per job
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,

    /// Default misfire grace period in seconds
    #[serde(default = "default_misfire_grace")]
    pub misfire_grace_secs: u64,

    /// Per-firing deadline in seconds
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// How long shutdown waits for in-flight firings before killing them
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Consecutive store failures tolerated by the loop before stopping
    #[serde(default = "default_store_failure_threshold")]
    pub store_failure_threshold: u32,

    /// IANA timezone used for cron triggers without an explicit zone
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            coalesce: true,
            max_instances: default_max_instances(),
            misfire_grace_secs: default_misfire_grace(),
            task_timeout_secs: default_task_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
            store_failure_threshold: default_store_failure_threshold(),
            timezone: default_timezone(),
        }
    }
}

impl SchedulerConfig {
    /// Timezone as a chrono-tz value; validated at config load
    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

/// Job store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend URL: `sqlite:<path>`, `postgres://...`, or `memory:`
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Apply pending schema migrations on open instead of refusing
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Connection pool size for SQL backends
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            auto_migrate: true,
            pool_size: default_pool_size(),
        }
    }
}

/// Pipeline child-process configuration and argv defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline executable invoked for every firing
    #[serde(default = "default_pipeline_binary")]
    pub binary: String,

    /// Directory receiving job reports and the first-run marker
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_storage_path")]
    pub storage_path: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_collection_name")]
    pub collection_name: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_data_dir_pattern")]
    pub data_dir_pattern: String,

    #[serde(default)]
    pub blog_base_url: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_true")]
    pub use_chunking: bool,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u64,

    #[serde(default = "default_true")]
    pub should_save_stats: bool,

    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    #[serde(default = "default_true")]
    pub enable_batch_processing: bool,

    #[serde(default = "default_true")]
    pub enable_performance_monitoring: bool,

    #[serde(default = "default_true")]
    pub adaptive_chunking: bool,

    #[serde(default = "default_max_backup_files")]
    pub max_backup_files: u64,

    #[serde(default = "default_checksum_algorithm")]
    pub checksum_algorithm: String,

    #[serde(default = "default_incremental_mode")]
    pub incremental_mode: String,

    #[serde(default = "default_true")]
    pub auto_detect_changes: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            binary: default_pipeline_binary(),
            artifact_dir: default_artifact_dir(),
            data_dir: default_data_dir(),
            storage_path: default_storage_path(),
            output_dir: default_output_dir(),
            collection_name: default_collection_name(),
            embedding_model: default_embedding_model(),
            data_dir_pattern: default_data_dir_pattern(),
            blog_base_url: None,
            base_url: None,
            use_chunking: true,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            should_save_stats: true,
            batch_size: default_batch_size(),
            enable_batch_processing: true,
            enable_performance_monitoring: true,
            adaptive_chunking: true,
            max_backup_files: default_max_backup_files(),
            checksum_algorithm: default_checksum_algorithm(),
            incremental_mode: default_incremental_mode(),
            auto_detect_changes: true,
        }
    }
}

/// First-time bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seed the default job on first start
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Id of the seeded default job
    #[serde(default = "default_job_id")]
    pub default_job_id: String,

    /// Hour the default cron job fires
    #[serde(default = "default_job_hour")]
    pub hour: u32,

    /// Minute the default cron job fires
    #[serde(default)]
    pub minute: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_job_id: default_job_id(),
            hour: default_job_hour(),
            minute: 0,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    20
}

fn default_max_instances() -> u32 {
    3
}

fn default_misfire_grace() -> u64 {
    3600
}

fn default_task_timeout() -> u64 {
    3600
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_store_failure_threshold() -> u32 {
    10
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_store_url() -> String {
    "sqlite:output/scheduler_jobs.db".to_string()
}

fn default_pool_size() -> u32 {
    5
}

fn default_pipeline_binary() -> String {
    "pipeline_exec".to_string()
}

fn default_artifact_dir() -> String {
    "output".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_storage_path() -> String {
    "db/vector_store".to_string()
}

fn default_output_dir() -> String {
    "output".to_string()
}

fn default_collection_name() -> String {
    "documents".to_string()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_data_dir_pattern() -> String {
    "*.md".to_string()
}

fn default_chunk_size() -> u64 {
    1000
}

fn default_chunk_overlap() -> u64 {
    200
}

fn default_batch_size() -> u64 {
    50
}

fn default_max_backup_files() -> u64 {
    3
}

fn default_checksum_algorithm() -> String {
    "sha256".to_string()
}

fn default_incremental_mode() -> String {
    "auto".to_string()
}

fn default_job_id() -> String {
    "default_pipeline_job".to_string()
}

fn default_job_hour() -> u32 {
    2
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_workers, 20);
        assert_eq!(config.scheduler.misfire_grace_secs, 3600);
        assert!(config.scheduler.coalesce);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [scheduler]
            max_workers = 4
            timezone = "America/Chicago"

            [store]
            url = "memory:"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.max_workers, 4);
        assert_eq!(config.scheduler.tz(), chrono_tz::America::Chicago);
        assert_eq!(config.store.url, "memory:");
        // Untouched sections keep their defaults
        assert_eq!(config.pipeline.binary, "pipeline_exec");
        assert_eq!(config.bootstrap.hour, 2);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let mut config = Config::default();
        config.scheduler.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.scheduler.max_workers = 0;
        assert!(config.validate().is_err());
    }
}
