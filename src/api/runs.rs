//! Health and run status endpoints

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use crate::SharedState;

const RECENT_RUNS: usize = 20;

/// GET / - health check
pub async fn root() -> &'static str {
    "docs_deploy - healthy"
}

/// GET /status - server info, the running deployment and recent history
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let runs = state.runs.lock().await;
    let current = runs.current().map(|r| r.id.clone());

    Json(json!({
        "name": "docs_deploy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "started_at": state.started_at.to_rfc3339(),
        "dry_run": state.dry_run,
        "current_run": current,
        "queued_runs": runs.queued_count(),
        "recent_runs": runs.recent(RECENT_RUNS),
    }))
}

/// GET /runs/{id}
pub async fn get_run(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let runs = state.runs.lock().await;
    match runs.get(&id) {
        Some(run) => (StatusCode::OK, Json(json!(run))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("run '{}' not found", id) })),
        )
            .into_response(),
    }
}
