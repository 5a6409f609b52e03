use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use retail_pulse::app_state::{self, AppState};
use retail_pulse::config::AppConfig;
use retail_pulse::engine::dispatch::Dispatcher;
use retail_pulse::routes;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing retail-pulse server");

    let prometheus_handle = routes::metrics::install_recorder()
        .expect("Failed to install Prometheus metrics recorder");

    let jobs = app_state::init_job_store(&config)
        .await
        .expect("Failed to initialize job store");

    let queue = app_state::init_queue(&config).expect("Failed to initialize job queue");

    // With a queue the worker binary executes jobs; otherwise they run here.
    let dispatcher = match queue {
        Some(queue) => {
            tracing::info!("Dispatching jobs to the Redis queue");
            Dispatcher::Queue(queue)
        }
        None => {
            let runner = app_state::init_runner(&config, Arc::clone(&jobs))
                .expect("Failed to initialize job runner");
            match runner.resume_ongoing().await {
                Ok(count) => tracing::info!(jobs = count, "Resume sweep finished"),
                Err(e) => tracing::error!(error = %e, "Resume sweep failed"),
            }
            Dispatcher::Inline(runner)
        }
    };

    let state = AppState::new(jobs, dispatcher.clone());
    let app = routes::router(state, Some(prometheus_handle));

    tracing::info!("Starting retail-pulse on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    if let Some(runner) = dispatcher.runner() {
        runner.shutdown().await;
    }

    tracing::info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
