use axum::{Json, extract::State};
use serde_json::{Value, json};

/// Provisioning totals frozen when the router is built.
#[derive(Debug, Clone, Copy)]
pub struct HealthState {
    pub boards_mounted: usize,
    pub boards_failed: usize,
}

/// Always 200 once routing exists: the process is up even if every board
/// failed.
pub async fn health_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "boards_mounted": state.boards_mounted,
        "boards_failed": state.boards_failed,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
