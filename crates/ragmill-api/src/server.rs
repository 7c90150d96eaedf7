use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use ragmill_core::service::SchedulerService;
use ragmill_core::{Config, Result};

use crate::routes::{config, jobs, status};
use crate::state::AppState;

/// Assemble the router over a running scheduler service
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/scheduler/status", get(status::get_status))
        .route("/scheduler/health", get(status::health_check))
        .route("/scheduler/jobs", get(jobs::list_jobs))
        .route("/scheduler/jobs/cron", post(jobs::create_cron_job))
        .route("/scheduler/jobs/interval", post(jobs::create_interval_job))
        .route("/scheduler/jobs/onetime", post(jobs::create_one_time_job))
        .route(
            "/scheduler/jobs/:job_id",
            get(jobs::get_job)
                .put(jobs::update_job)
                .delete(jobs::delete_job),
        )
        .route("/scheduler/jobs/:job_id/run", post(jobs::run_job_now))
        .route("/scheduler/presets", get(jobs::list_presets))
        .route("/scheduler/presets/:preset_name", post(jobs::create_preset_job))
        .route("/scheduler/config/export", get(config::export_config))
        .route("/scheduler/config/import", post(config::import_config))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the scheduler API until the process is asked to stop
pub async fn run(config: &Config, service: Arc<SchedulerService>) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| ragmill_core::Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let app = build_router(AppState::new(service.clone()));

    info!("Scheduler API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ragmill_core::Error::Config(format!("Cannot bind {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            service.wait_until_stopped().await;
        })
        .await
        .map_err(|e| ragmill_core::Error::Other(format!("Server error: {}", e)))?;

    Ok(())
}
