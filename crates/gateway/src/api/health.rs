//! Liveness/readiness and a minimal metrics surface.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health` — legacy shape: always 200 while the process is up.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /v1/health` — reports provider counts alongside the uptime.
pub async fn health_v1(State(state): State<AppState>) -> Json<Value> {
    let statuses = state.providers.status_map().await;
    let running = statuses.iter().filter(|s| s.state == "running").count();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "providers": { "total": statuses.len(), "running": running },
    }))
}

/// `GET /metrics` — a small Prometheus-text-format export. Not a full
/// metrics pipeline; enough to let an operator see provider and session
/// counts without standing up a scrape target for every gauge.
pub async fn metrics(State(state): State<AppState>) -> String {
    let statuses = state.providers.status_map().await;
    let running = statuses.iter().filter(|s| s.state == "running").count();
    let sessions = state.sessions.list_sessions().await;

    let mut out = String::new();
    out.push_str("# HELP mcpb_uptime_seconds Seconds since the broker started.\n");
    out.push_str("# TYPE mcpb_uptime_seconds gauge\n");
    out.push_str(&format!("mcpb_uptime_seconds {}\n", state.started_at.elapsed().as_secs()));
    out.push_str("# HELP mcpb_providers_total Configured providers.\n");
    out.push_str("# TYPE mcpb_providers_total gauge\n");
    out.push_str(&format!("mcpb_providers_total {}\n", statuses.len()));
    out.push_str("# HELP mcpb_providers_running Providers currently running.\n");
    out.push_str("# TYPE mcpb_providers_running gauge\n");
    out.push_str(&format!("mcpb_providers_running {running}\n"));
    out.push_str("# HELP mcpb_user_sessions Active per-user isolated sessions.\n");
    out.push_str("# TYPE mcpb_user_sessions gauge\n");
    out.push_str(&format!("mcpb_user_sessions {}\n", sessions.len()));
    out
}
