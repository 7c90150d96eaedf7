use std::sync::Arc;

use colored::Colorize;
use tracing::info;

use ragmill_core::service::SchedulerService;

/// Start the scheduler loop and serve the HTTP API until interrupted
pub async fn run(service: Arc<SchedulerService>) -> anyhow::Result<()> {
    service.start().await?;

    println!(
        "{} scheduler running, API on http://{}:{}",
        "ragmill".green().bold(),
        service.config().server.host,
        service.config().server.port
    );

    let signal_service = Arc::clone(&service);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            signal_service.shutdown(true).await;
        }
    });

    // The API server exits once the scheduler reaches its stopped state.
    let config = service.config().clone();
    ragmill_api::run(&config, service).await?;

    println!("{}", "Scheduler stopped".yellow());
    Ok(())
}
