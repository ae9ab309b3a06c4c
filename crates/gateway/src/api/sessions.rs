//! Per-user isolated session fleet control: `/user-sessions/*`.

use axum::extract::{Path, State};
use axum::Json;
use mcpb_domain::Error;
use serde::Deserialize;

use crate::error::ApiError;
use crate::principal::AuthedPrincipal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub provider: String,
}

/// `POST /user-sessions/start` — start (or reuse) the caller's session for
/// a per-user-isolated provider. Requires a bearer token the caller can be
/// isolated under; the local-admin sentinel carries none.
pub async fn start(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(req): Json<StartSessionRequest>,
) -> Result<Json<mcpb_sessions::StartOutcome>, ApiError> {
    let access_token = principal.principal.access_token.clone().ok_or_else(|| {
        ApiError(Error::AuthMissing(
            "starting a user session requires a bearer access token".into(),
        ))
    })?;
    let email = principal.principal.email.clone().unwrap_or_default();
    let outcome = state
        .sessions
        .start(&req.provider, &principal.principal.id, &email, &access_token)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct StopSessionRequest {
    pub provider: String,
}

/// `POST /user-sessions/stop`.
pub async fn stop(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(req): Json<StopSessionRequest>,
) -> Json<serde_json::Value> {
    let stopped = state.sessions.stop(&req.provider, &principal.principal.id).await;
    Json(serde_json::json!({ "stopped": stopped }))
}

/// `GET /user-sessions` — every active session, admin-only since it spans
/// every user.
pub async fn list(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
) -> Result<Json<Vec<mcpb_sessions::SessionInfo>>, ApiError> {
    principal.require_admin()?;
    Ok(Json(state.sessions.list_sessions().await))
}

/// `GET /user-sessions/{user}` — sessions belonging to one user. An
/// ordinary caller may only look up their own; an admin may look up anyone's.
pub async fn for_user(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(user): Path<String>,
) -> Result<Json<Vec<mcpb_sessions::SessionInfo>>, ApiError> {
    if !principal.principal.is_admin && principal.principal.id != user {
        return Err(ApiError(Error::AccessDenied(
            "may only inspect your own sessions".into(),
        )));
    }
    let sessions = state
        .sessions
        .list_sessions()
        .await
        .into_iter()
        .filter(|s| s.user_id == user)
        .collect();
    Ok(Json(sessions))
}
