//! Translation of a job's pipeline configuration into child-process argv.
//!
//! The recognized keys form a closed set; anything else in the job's config
//! map is preserved for export but never reaches the command line. Flags
//! are only emitted when the resolved value differs from the configured
//! default, keeping argv minimal. Boolean "disable" flags follow the
//! resolved value directly (`use_chunking=false` always emits
//! `--no-chunking`), matching the pipeline binary's own switches.

use serde_json::{Map, Value};

use crate::config::PipelineConfig;

/// Job configuration map type: string keys to tagged values
pub type JobConfigMap = Map<String, Value>;

/// Build the argv (flags only, binary excluded) for one firing
pub fn build_pipeline_argv(defaults: &PipelineConfig, job_config: &JobConfigMap) -> Vec<String> {
    let mut argv = Vec::new();

    if get_bool(job_config, "force_recreate", false) {
        argv.push("--force-recreate".to_string());
    }

    // Scheduled jobs run non-interactively by default
    if get_bool(job_config, "ci_mode", true) {
        argv.push("--ci".to_string());
    }

    if get_bool(job_config, "dry_run", false) {
        argv.push("--dry-run".to_string());
    }

    let incremental_mode = get_str(job_config, "incremental_mode", &defaults.incremental_mode);
    match incremental_mode.as_str() {
        "incremental" => argv.push("--incremental".to_string()),
        "incremental_only" => argv.push("--incremental-only".to_string()),
        "incremental_with_fallback" => argv.push("--incremental-with-fallback".to_string()),
        // "full" is the binary's base behavior; "auto" only gets a flag
        // when change detection is switched on relative to the defaults.
        "auto" => {
            let auto_detect =
                get_bool(job_config, "auto_detect_changes", defaults.auto_detect_changes);
            if auto_detect != defaults.auto_detect_changes && auto_detect {
                argv.push("--auto-incremental".to_string());
            }
        }
        _ => {}
    }

    push_if_differs(&mut argv, "--data-dir", job_config, "data_dir", &defaults.data_dir);
    push_if_differs(
        &mut argv,
        "--vector-storage-path",
        job_config,
        "storage_path",
        &defaults.storage_path,
    );
    push_if_differs(&mut argv, "--output-dir", job_config, "output_dir", &defaults.output_dir);
    push_if_differs(
        &mut argv,
        "--collection-name",
        job_config,
        "collection_name",
        &defaults.collection_name,
    );
    push_if_differs(
        &mut argv,
        "--embedding-model",
        job_config,
        "embedding_model",
        &defaults.embedding_model,
    );
    push_if_differs(
        &mut argv,
        "--data-dir-pattern",
        job_config,
        "data_dir_pattern",
        &defaults.data_dir_pattern,
    );

    if let Some(url) = get_opt_str(job_config, "blog_base_url") {
        if Some(&url) != defaults.blog_base_url.as_ref() {
            argv.push("--blog-base-url".to_string());
            argv.push(url);
        }
    }
    if let Some(url) = get_opt_str(job_config, "base_url") {
        if Some(&url) != defaults.base_url.as_ref() {
            argv.push("--base-url".to_string());
            argv.push(url);
        }
    }

    if !get_bool(job_config, "use_chunking", defaults.use_chunking) {
        argv.push("--no-chunking".to_string());
    }

    let chunk_size = get_u64(job_config, "chunk_size", defaults.chunk_size);
    if chunk_size != defaults.chunk_size {
        argv.push("--chunk-size".to_string());
        argv.push(chunk_size.to_string());
    }
    let chunk_overlap = get_u64(job_config, "chunk_overlap", defaults.chunk_overlap);
    if chunk_overlap != defaults.chunk_overlap {
        argv.push("--chunk-overlap".to_string());
        argv.push(chunk_overlap.to_string());
    }

    if !get_bool(job_config, "should_save_stats", defaults.should_save_stats) {
        argv.push("--no-save-stats".to_string());
    }

    let batch_size = get_u64(job_config, "batch_size", defaults.batch_size);
    if batch_size != defaults.batch_size {
        argv.push("--batch-size".to_string());
        argv.push(batch_size.to_string());
    }

    if !get_bool(job_config, "enable_batch_processing", defaults.enable_batch_processing) {
        argv.push("--disable-batch-processing".to_string());
    }
    if !get_bool(
        job_config,
        "enable_performance_monitoring",
        defaults.enable_performance_monitoring,
    ) {
        argv.push("--disable-performance-monitoring".to_string());
    }
    if !get_bool(job_config, "adaptive_chunking", defaults.adaptive_chunking) {
        argv.push("--disable-adaptive-chunking".to_string());
    }

    let max_backup_files = get_u64(job_config, "max_backup_files", defaults.max_backup_files);
    if max_backup_files != defaults.max_backup_files {
        argv.push("--max-backup-files".to_string());
        argv.push(max_backup_files.to_string());
    }

    push_if_differs(
        &mut argv,
        "--checksum-algorithm",
        job_config,
        "checksum_algorithm",
        &defaults.checksum_algorithm,
    );

    if let Some(path) = get_opt_str(job_config, "metadata_csv_path") {
        argv.push("--metadata-file".to_string());
        argv.push(path);
    }

    if get_bool(job_config, "health_check", false) {
        argv.push("--health-check".to_string());
    }
    if get_bool(job_config, "health_check_only", false) {
        argv.push("--health-check-only".to_string());
    }

    argv
}

fn push_if_differs(
    argv: &mut Vec<String>,
    flag: &str,
    job_config: &JobConfigMap,
    key: &str,
    default: &str,
) {
    let value = get_str(job_config, key, default);
    if value != default {
        argv.push(flag.to_string());
        argv.push(value);
    }
}

fn get_bool(map: &JobConfigMap, key: &str, default: bool) -> bool {
    match map.get(key) {
        Some(Value::Bool(b)) => *b,
        _ => default,
    }
}

fn get_u64(map: &JobConfigMap, key: &str, default: u64) -> u64 {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
        _ => default,
    }
}

fn get_str(map: &JobConfigMap, key: &str, default: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        _ => default.to_string(),
    }
}

fn get_opt_str(map: &JobConfigMap, key: &str) -> Option<String> {
    match map.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}
