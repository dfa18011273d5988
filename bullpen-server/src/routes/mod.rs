use std::sync::Arc;

use axum::{
    Router,
    routing::{get, put},
};
use tower_http::trace::TraceLayer;

use crate::{
    boards::{Dashboard, ProvisionReport},
    handlers::{
        health::{HealthState, health_handler},
        queues, shell,
    },
    infra::HEALTH_PATH,
};

/// Routes for one board, relative to its mount path.
pub fn board_router(dashboard: Arc<Dashboard>) -> Router {
    Router::new()
        .route("/", get(shell::shell_handler))
        .route("/api/queues", get(queues::list_queues))
        .route("/api/queues/{queue}/jobs", get(queues::list_jobs))
        .route(
            "/api/queues/{queue}/jobs/{id}",
            get(queues::get_job).delete(queues::remove_job),
        )
        .route("/api/queues/{queue}/jobs/{id}/retry", put(queues::retry_job))
        .route("/api/queues/{queue}/pause", put(queues::pause_queue))
        .route("/api/queues/{queue}/resume", put(queues::resume_queue))
        .with_state(dashboard)
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health_handler))
        .with_state(state)
}

/// The full application: mounted boards and the health endpoint, wrapped in
/// request tracing.
pub fn create_app(report: ProvisionReport) -> Router {
    report.into_router().layer(TraceLayer::new_for_http())
}
