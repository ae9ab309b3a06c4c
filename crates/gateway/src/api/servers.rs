//! Provider lifecycle and catalog management: `/servers/*`.
//!
//! Every mutating route here requires an admin principal — the broker's
//! catalog is operational configuration, not something an ordinary caller
//! gets to reshape.

use axum::extract::{Path, State};
use axum::Json;
use mcpb_providers::AddServerRequest;
use serde::Deserialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::principal::AuthedPrincipal;
use crate::state::AppState;

/// `GET /servers` — every provider's status.
pub async fn list(State(state): State<AppState>, _principal: AuthedPrincipal) -> Json<Vec<mcpb_providers::ProviderStatus>> {
    Json(state.providers.status_map().await)
}

/// `POST /servers` — adds a provider, flat shape or `mcpServers`-wrapped.
pub async fn add(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(body): Json<Value>,
) -> Result<Json<mcpb_providers::ProviderStatus>, ApiError> {
    principal.require_admin()?;
    let req = AddServerRequest::from_value(body)?;
    let status = state.providers.add_server(req).await?;
    Ok(Json(status))
}

/// `DELETE /servers/{id}`.
pub async fn remove(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    principal.require_admin()?;
    state.providers.remove_server(&id).await?;
    Ok(())
}

/// `POST /servers/{id}/start`.
pub async fn start(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    principal.require_admin()?;
    state.providers.start_server(&id).await?;
    Ok(())
}

/// `POST /servers/{id}/stop`.
pub async fn stop(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    principal.require_admin()?;
    state.providers.stop_server(&id).await?;
    Ok(())
}

/// `POST /servers/{id}/restart`.
pub async fn restart(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    principal.require_admin()?;
    state.providers.restart_server(&id).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// `PATCH /servers/{id}/enabled`.
pub async fn set_enabled(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Path(id): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> Result<(), ApiError> {
    principal.require_admin()?;
    state.providers.set_server_enabled(&id, body.enabled).await?;
    Ok(())
}

/// `GET /servers/{id}/enabled`.
pub async fn get_enabled(State(state): State<AppState>, Path(id): Path<String>) -> Json<Value> {
    Json(serde_json::json!({ "name": id, "enabled": state.providers.get_enabled(&id).await }))
}

/// `GET /servers/enabled` — the enabled flag for every provider.
pub async fn list_enabled(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!(state.providers.list_enabled().await))
}

/// `GET /servers/{name}/tools` — cached `tools/list` for one provider.
pub async fn tools_for(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<mcpb_transport::McpToolDef>>, ApiError> {
    let supervisor = state
        .providers
        .get(&name)
        .await
        .ok_or_else(|| ApiError(mcpb_domain::Error::ProviderUnknown(name)))?;
    Ok(Json(supervisor.tools().await))
}
