use axum::extract::State;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe job metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!(
        "store_visit_jobs_submitted_total",
        "Store visit jobs accepted by the API"
    );
    metrics::describe_counter!(
        "store_visit_jobs_completed_total",
        "Store visit jobs that completed"
    );
    metrics::describe_counter!(
        "store_visit_jobs_failed_total",
        "Store visit jobs that failed"
    );
    metrics::describe_counter!(
        "store_visit_images_processed_total",
        "Images fetched, stored and scored"
    );
    metrics::describe_histogram!(
        "store_visit_image_processing_seconds",
        "Time to process a single image"
    );
    metrics::describe_gauge!(
        "store_visit_jobs_active",
        "Jobs currently held by this process's runner"
    );

    Ok(Arc::new(handle))
}

/// Prometheus metrics scrape endpoint.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
