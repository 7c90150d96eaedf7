use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;

use ragmill_core::jobs::presets;
use ragmill_core::service::{
    CreateCronJob, CreateIntervalJob, CreateOneTimeJob, SchedulerService,
};
use ragmill_core::{Job, JobConfigMap};

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List all scheduled jobs
    List,

    /// Show one job
    Show { job_id: String },

    /// Create a cron job
    CreateCron {
        job_id: String,
        /// Full five-field cron expression (overrides hour/minute)
        #[arg(long)]
        cron: Option<String>,
        #[arg(long)]
        hour: Option<u32>,
        #[arg(long, default_value_t = 0)]
        minute: u32,
        /// mon..sun or 0..6 (0 = Monday)
        #[arg(long)]
        day_of_week: Option<String>,
        /// Pipeline config overrides as a JSON object
        #[arg(long)]
        config: Option<String>,
    },

    /// Create an interval job
    CreateInterval {
        job_id: String,
        #[arg(long, default_value_t = 0)]
        days: u64,
        #[arg(long, default_value_t = 0)]
        hours: u64,
        #[arg(long, default_value_t = 0)]
        minutes: u64,
        #[arg(long, default_value_t = 0)]
        seconds: u64,
        #[arg(long)]
        config: Option<String>,
    },

    /// Create a one-time job
    CreateOnce {
        job_id: String,
        /// RFC 3339 instant, e.g. 2026-01-01T02:00:00Z
        #[arg(long)]
        run_date: DateTime<Utc>,
        #[arg(long)]
        config: Option<String>,
    },

    /// Remove a job
    Remove { job_id: String },

    /// Trigger a job right now
    Run { job_id: String },
}

pub async fn run(service: Arc<SchedulerService>, command: JobsCommand) -> anyhow::Result<()> {
    match command {
        JobsCommand::List => {
            let jobs = service.list_jobs().await?;
            if jobs.is_empty() {
                println!("No scheduled jobs");
                return Ok(());
            }
            for job in jobs {
                print_job(&job);
            }
        }
        JobsCommand::Show { job_id } => {
            let job = service.get_job(&job_id).await?;
            print_job(&job);
            println!(
                "  config: {}",
                serde_json::to_string_pretty(&job.pipeline_config)?
            );
        }
        JobsCommand::CreateCron {
            job_id,
            cron,
            hour,
            minute,
            day_of_week,
            config,
        } => {
            let job = service
                .create_cron_job(CreateCronJob {
                    job_id,
                    name: None,
                    cron_expression: cron,
                    hour,
                    minute,
                    day_of_week,
                    config: parse_config(config.as_deref())?,
                })
                .await?;
            created(&job);
        }
        JobsCommand::CreateInterval {
            job_id,
            days,
            hours,
            minutes,
            seconds,
            config,
        } => {
            let job = service
                .create_interval_job(CreateIntervalJob {
                    job_id,
                    name: None,
                    days,
                    hours,
                    minutes,
                    seconds,
                    config: parse_config(config.as_deref())?,
                })
                .await?;
            created(&job);
        }
        JobsCommand::CreateOnce {
            job_id,
            run_date,
            config,
        } => {
            let job = service
                .create_one_time_job(CreateOneTimeJob {
                    job_id,
                    name: None,
                    run_date,
                    config: parse_config(config.as_deref())?,
                })
                .await?;
            created(&job);
        }
        JobsCommand::Remove { job_id } => {
            service.delete_job(&job_id).await?;
            println!("{} removed job '{}'", "ok".green(), job_id);
        }
        JobsCommand::Run { job_id } => {
            service.run_now(&job_id).await?;
            println!("{} triggered job '{}'", "ok".green(), job_id);
        }
    }
    Ok(())
}

pub async fn create_from_preset(
    service: Arc<SchedulerService>,
    preset: &str,
    job_id: &str,
    config: Option<&str>,
) -> anyhow::Result<()> {
    let jobs = service
        .create_from_preset(preset, job_id, parse_config(config)?)
        .await?;
    for job in &jobs {
        created(job);
    }
    Ok(())
}

pub fn list_presets() {
    for preset in presets::catalogue() {
        println!("{:<20} {}", preset.name.cyan(), preset.description);
    }
}

pub async fn export(
    service: Arc<SchedulerService>,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let document = service.export_config().await?;
    let body = serde_json::to_string_pretty(&document)?;
    match output {
        Some(path) => {
            std::fs::write(path, body)?;
            println!(
                "{} exported {} job(s) to {}",
                "ok".green(),
                document.jobs.len(),
                path.display()
            );
        }
        None => println!("{}", body),
    }
    Ok(())
}

pub async fn import(service: Arc<SchedulerService>, file: &Path) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(file)?;
    let document = serde_json::from_str(&body)?;
    let imported = service.import_config(document).await?;
    println!("{} imported {} job(s)", "ok".green(), imported);
    Ok(())
}

pub fn status(service: Arc<SchedulerService>) {
    let stats = service.get_stats();
    println!("scheduler: {}", service.scheduler_state());
    println!("executed:  {}", stats.executed);
    println!("failed:    {}", stats.failed);
    println!("missed:    {}", stats.missed);
    if let Some(last) = stats.last_execution {
        println!("last run:  {}", last.to_rfc3339());
    }
    if let Some(err) = stats.last_error {
        println!(
            "last error: {} ({}): {}",
            err.job_id.red(),
            err.timestamp.to_rfc3339(),
            err.message
        );
    }
}

pub async fn health(service: Arc<SchedulerService>) {
    let report = service.health_check().await;
    let verdict = match report.verdict {
        ragmill_core::HealthVerdict::Healthy => "healthy".green(),
        ragmill_core::HealthVerdict::Warning => "warning".yellow(),
        ragmill_core::HealthVerdict::Unhealthy => "unhealthy".red(),
    };
    println!("verdict:   {}", verdict);
    println!("scheduler: {}", report.scheduler_state);
    println!("jobs:      {}", report.total_jobs);
    if let Some(warning) = &report.warning {
        println!("warning:   {}", warning.yellow());
    }
    for recommendation in &report.recommendations {
        println!("  - {}", recommendation);
    }
}

fn parse_config(raw: Option<&str>) -> anyhow::Result<JobConfigMap> {
    match raw {
        None => Ok(JobConfigMap::new()),
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(raw)?;
            value
                .as_object()
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("--config must be a JSON object"))
        }
    }
}

fn created(job: &Job) {
    println!(
        "{} created {} '{}' ({}), next fire: {}",
        "ok".green(),
        job.trigger.kind(),
        job.id,
        job.trigger,
        job.next_fire_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );
}

fn print_job(job: &Job) {
    println!(
        "{:<24} {:<10} next: {:<25} {}",
        job.id.cyan(),
        job.trigger.kind(),
        job.next_fire_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
        job.trigger
    );
}
