//! The generic JSON-RPC envelope endpoints: `POST /mcp`, `POST /mcp/tool`,
//! `POST /call`.
//!
//! All three funnel into [`dispatch`], which resolves a target provider
//! (explicit or auto-detected for `tools/call`), runs it through the
//! access policy engine, shapes `tools/call` arguments (`inject_user_id`,
//! serverless API-key copy, on-behalf-of injection), and forwards to either
//! the provider registry or the per-user session fleet depending on the
//! provider's isolation capability.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use mcpb_domain::{AuditEvent, AuditOutcome, Error};
use mcpb_providers::ProviderState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ApiError, ProviderCallOutcome};
use crate::principal::AuthedPrincipal;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct McpEnvelope {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub server: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct McpResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub id: Option<Value>,
    pub server: String,
    pub execution_time: f64,
}

#[derive(Debug, Deserialize)]
pub struct McpToolRequest {
    #[serde(default)]
    pub server: Option<String>,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub server: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `POST /mcp` — forwards an arbitrary JSON-RPC method, with auto-detect
/// fallback for `tools/call` when no `server` is named.
pub async fn mcp(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(envelope): Json<McpEnvelope>,
) -> Result<Json<McpResponse>, ApiError> {
    let params = envelope.params.unwrap_or_else(|| json!({}));
    let response = dispatch(&state, &principal, envelope.server, envelope.method, params, envelope.id).await?;
    Ok(Json(response))
}

/// `POST /mcp/tool` — a `tools/call` shorthand taking `tool`/`arguments`
/// directly instead of a pre-built `params` object.
pub async fn mcp_tool(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(req): Json<McpToolRequest>,
) -> Result<Json<McpResponse>, ApiError> {
    let params = json!({ "name": req.tool, "arguments": req.arguments });
    let response = dispatch(&state, &principal, req.server, "tools/call".into(), params, req.id).await?;
    Ok(Json(response))
}

/// `POST /call` — like `/mcp/tool` but `server` is required; no
/// auto-detect fallback.
pub async fn call(
    State(state): State<AppState>,
    principal: AuthedPrincipal,
    Json(req): Json<CallRequest>,
) -> Result<Json<McpResponse>, ApiError> {
    let params = json!({ "name": req.tool, "arguments": req.arguments });
    let response = dispatch(&state, &principal, Some(req.server), "tools/call".into(), params, None).await?;
    Ok(Json(response))
}

async fn dispatch(
    state: &AppState,
    principal: &AuthedPrincipal,
    server: Option<String>,
    method: String,
    params: Value,
    id: Option<Value>,
) -> Result<McpResponse, ApiError> {
    let started = Instant::now();
    let is_tool_call = method == "tools/call";

    let tool_name = if is_tool_call {
        params.get("name").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    };

    let server_name: Result<String, ApiError> = match server {
        Some(s) => Ok(s),
        None if is_tool_call => {
            let name = tool_name
                .as_deref()
                .ok_or_else(|| ApiError(Error::ValidationError("tools/call requires params.name".into())));
            match name {
                Ok(name) => auto_detect_provider(state, name).await.ok_or_else(|| {
                    ApiError(Error::ValidationError(format!("no running provider advertises tool '{name}'")))
                }),
                Err(e) => Err(e),
            }
        }
        None => Err(ApiError(Error::ValidationError("'server' is required for this method".into()))),
    };

    // Every call is audited exactly once, whether it fails before a provider
    // is even chosen (no `server` given, auto-detect found nothing) or after.
    let server_name = match server_name {
        Ok(name) => name,
        Err(e) => {
            state.audit.emit(AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                principal_id: principal.principal.id.clone(),
                principal_kind: format!("{:?}", principal.principal.kind),
                action: method.clone(),
                provider: None,
                tool: tool_name,
                params: Some(params),
                outcome: AuditOutcome::Error,
                elapsed_ms: Some(started.elapsed().as_millis() as u64),
                detail: Some(e.0.to_string()),
            });
            return Err(e);
        }
    };

    let result = dispatch_to_provider(state, principal, &server_name, &method, params.clone()).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    state.audit.emit(AuditEvent {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        principal_id: principal.principal.id.clone(),
        principal_kind: format!("{:?}", principal.principal.kind),
        action: method.clone(),
        provider: Some(server_name.clone()),
        tool: tool_name,
        params: Some(params),
        outcome: match &result {
            Ok(ProviderCallOutcome::Value(_)) => AuditOutcome::Success,
            Ok(ProviderCallOutcome::RpcError(_)) => AuditOutcome::Error,
            Err(ApiError(Error::AccessDenied(_))) => AuditOutcome::Denied,
            Err(_) => AuditOutcome::Error,
        },
        elapsed_ms: Some(elapsed_ms),
        detail: match &result {
            Ok(ProviderCallOutcome::RpcError(e)) => Some(e.to_string()),
            Ok(ProviderCallOutcome::Value(_)) => None,
            Err(e) => Some(e.0.to_string()),
        },
    });

    // A provider-returned JSON-RPC error is not a broker-side failure: it is
    // passed through to the caller inside a 200 response, original id intact.
    // Only a call that never reached the provider becomes a thrown ApiError.
    let (result, error) = match result? {
        ProviderCallOutcome::Value(v) => (Some(v), None),
        ProviderCallOutcome::RpcError(e) => (None, Some(e)),
    };
    Ok(McpResponse {
        result,
        error,
        id,
        server: server_name,
        execution_time: elapsed_ms as f64 / 1000.0,
    })
}

async fn dispatch_to_provider(
    state: &AppState,
    principal: &AuthedPrincipal,
    server_name: &str,
    method: &str,
    params: Value,
) -> Result<ProviderCallOutcome, ApiError> {
    let capabilities = state
        .providers
        .capabilities(server_name)
        .await
        .ok_or_else(|| ApiError(Error::ProviderUnknown(server_name.to_string())))?;

    if capabilities.admin_only && !principal.principal.is_admin {
        return Err(ApiError(Error::AccessDenied(format!(
            "Admin privileges required for provider {server_name}"
        ))));
    }
    state.policy.check(&principal.principal, server_name).await?;

    let is_tool_call = method == "tools/call";
    if is_tool_call {
        let tool_name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError(Error::ValidationError("tools/call requires params.name".into())))?
            .to_string();
        let mut arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        if capabilities.inject_user_id {
            apply_inject_user_id(&mut arguments, &principal.principal.id);
        }
        if let Some(obj) = arguments.as_object() {
            if !obj.contains_key("api_key")
                && state.config.providers.serverless_tools.contains(&tool_name)
            {
                if let Some(key) = &principal.api_key {
                    arguments
                        .as_object_mut()
                        .expect("checked above")
                        .insert("api_key".into(), json!(key));
                }
            }
        }
        if capabilities.supports_obo {
            let scope = &state.config.auth.default_obo_scope;
            arguments = state.obo.inject(arguments, principal.assertion.as_deref(), scope).await;
        }

        if capabilities.per_user_isolated {
            let access_token = principal
                .principal
                .access_token
                .clone()
                .ok_or_else(|| ApiError(Error::AuthMissing(format!(
                    "provider {server_name} requires per-user credential isolation, but the caller carries no access token"
                ))))?;
            let email = principal.principal.email.clone().unwrap_or_default();
            state
                .sessions
                .start(server_name, &principal.principal.id, &email, &access_token)
                .await?;
            let raw = state
                .sessions
                .call_tool(server_name, &principal.principal.id, &tool_name, arguments)
                .await;
            return ProviderCallOutcome::from_session_result(server_name, raw);
        }

        let supervisor = state
            .providers
            .get(server_name)
            .await
            .ok_or_else(|| ApiError(Error::ProviderUnknown(server_name.to_string())))?;
        if supervisor.state().await != ProviderState::Running {
            return Err(ApiError(Error::ProviderUnavailable(server_name.to_string())));
        }
        let raw = supervisor.call_tool(&tool_name, arguments).await;
        ProviderCallOutcome::from_supervisor_result(server_name, raw)
    } else {
        let supervisor = state
            .providers
            .get(server_name)
            .await
            .ok_or_else(|| ApiError(Error::ProviderUnknown(server_name.to_string())))?;
        if supervisor.state().await != ProviderState::Running {
            return Err(ApiError(Error::ProviderUnavailable(server_name.to_string())));
        }
        let params = if params.is_null() { None } else { Some(params) };
        let raw = supervisor.send_request(method, params).await;
        ProviderCallOutcome::from_supervisor_result(server_name, raw)
    }
}

/// Iterates Running providers in deterministic (name-sorted) order,
/// returning the first whose cached `tools/list` advertises `tool_name`.
async fn auto_detect_provider(state: &AppState, tool_name: &str) -> Option<String> {
    let mut names = state.providers.names().await;
    names.sort();
    for name in names {
        let Some(supervisor) = state.providers.get(&name).await else { continue };
        if supervisor.state().await != ProviderState::Running {
            continue;
        }
        if supervisor.tools().await.iter().any(|t| t.name == tool_name) {
            return Some(name);
        }
    }
    None
}

fn apply_inject_user_id(arguments: &mut Value, user_id: &str) {
    let Some(obj) = arguments.as_object_mut() else { return };
    let is_default = match obj.get("user_id") {
        None => true,
        Some(Value::String(s)) => s == "default",
        Some(_) => false,
    };
    if is_default {
        obj.insert("user_id".into(), json!(user_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inject_user_id_fills_absent_field() {
        let mut args = json!({});
        apply_inject_user_id(&mut args, "alice");
        assert_eq!(args["user_id"], json!("alice"));
    }

    #[test]
    fn inject_user_id_replaces_default_sentinel() {
        let mut args = json!({ "user_id": "default" });
        apply_inject_user_id(&mut args, "alice");
        assert_eq!(args["user_id"], json!("alice"));
    }

    #[test]
    fn inject_user_id_leaves_explicit_value_alone() {
        let mut args = json!({ "user_id": "bob" });
        apply_inject_user_id(&mut args, "alice");
        assert_eq!(args["user_id"], json!("bob"));
    }
}
