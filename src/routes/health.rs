use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_jobs: Option<usize>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_result<E>(result: Result<(), E>, start: Instant) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: job store, queue and runner status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = Instant::now();
    let job_store = ComponentHealth::from_result(state.jobs.health_check().await, start);

    let queue = match state.dispatcher.queue() {
        Some(queue) => {
            let start = Instant::now();
            Some(ComponentHealth::from_result(queue.health_check().await, start))
        }
        None => None,
    };

    let all_healthy = job_store.is_ok() && queue.as_ref().is_none_or(ComponentHealth::is_ok);
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            job_store,
            queue,
            active_jobs: state.dispatcher.runner().map(|runner| runner.active_jobs()),
        },
    };

    (status_code, Json(response))
}
