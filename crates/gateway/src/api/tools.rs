//! Tool catalog aggregation: `/tools`, `/v1/mcp/tools`.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::principal::AuthedPrincipal;
use crate::state::AppState;

/// Filters `all` down to the providers `principal` may see, returning the
/// survivors plus the names of whatever was hidden. Per §4.7/§4.8, a
/// provider is hidden from aggregation the same way it's hidden from a
/// direct call: the admin-only gate, then the access policy engine.
async fn visible_providers(
    state: &AppState,
    principal: &AuthedPrincipal,
    all: &std::collections::HashMap<String, Vec<mcpb_transport::McpToolDef>>,
) -> (Vec<String>, Vec<String>) {
    let mut visible = Vec::new();
    let mut hidden = Vec::new();
    let mut names: Vec<&String> = all.keys().collect();
    names.sort();
    for name in names {
        let accessible = match state.providers.capabilities(name).await {
            Some(caps) if caps.admin_only && !principal.principal.is_admin => false,
            Some(_) => state.policy.check(&principal.principal, name).await.is_ok(),
            None => false,
        };
        if accessible {
            visible.push(name.clone());
        } else {
            hidden.push(name.clone());
        }
    }
    (visible, hidden)
}

/// `GET /tools` — every accessible running provider's advertised tools,
/// flattened with a `server` tag, the shape most broker clients expect.
/// Providers the caller cannot reach are omitted from `tools` and named in
/// `hidden_providers` instead of silently vanishing.
pub async fn list(State(state): State<AppState>, principal: AuthedPrincipal) -> Json<Value> {
    let all = state.providers.list_all_tools().await;
    let (visible, hidden) = visible_providers(&state, &principal, &all).await;

    let mut flat = Vec::new();
    for server in &visible {
        for tool in &all[server] {
            flat.push(json!({
                "server": server,
                "name": tool.name,
                "description": tool.description,
                "inputSchema": tool.input_schema,
            }));
        }
    }
    Json(json!({ "tools": flat, "hidden_providers": hidden }))
}

/// `GET /v1/mcp/tools` — the same catalog, grouped by provider, matching
/// the shape an MCP-aware dashboard expects when rendering per-server tool
/// lists. Inaccessible providers are dropped from `tools` and listed in
/// `hidden_providers`.
pub async fn list_v1(State(state): State<AppState>, principal: AuthedPrincipal) -> Json<Value> {
    let all = state.providers.list_all_tools().await;
    let (visible, hidden) = visible_providers(&state, &principal, &all).await;

    let filtered: std::collections::HashMap<&String, &Vec<mcpb_transport::McpToolDef>> =
        visible.iter().map(|name| (name, &all[name])).collect();
    Json(json!({ "tools": filtered, "hidden_providers": hidden }))
}
