pub mod health;
pub mod login;
pub mod mcp;
pub mod servers;
pub mod sessions;
pub mod tools;

use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::state::AppState;

/// Builds the full API router. Every route runs the [`crate::principal::AuthedPrincipal`]
/// extractor itself rather than a blanket auth middleware, since what a
/// credential is allowed to do varies by route (admin-only lifecycle
/// endpoints, self-or-admin session lookups, open health probes).
///
/// `/auth/login` and `/auth/callback` are only mounted when
/// [`AppState::pkce`] is configured — without a full OAuth2 IdP there is
/// nothing for them to do.
pub fn router(state: AppState) -> Router<AppState> {
    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/v1/health", get(health::health_v1))
        .route("/metrics", get(health::metrics))
        .route("/mcp", post(mcp::mcp))
        .route("/mcp/tool", post(mcp::mcp_tool))
        .route("/call", post(mcp::call))
        .route("/tools", get(tools::list))
        .route("/v1/mcp/tools", get(tools::list_v1))
        .route("/servers", get(servers::list).post(servers::add))
        .route("/servers/enabled", get(servers::list_enabled))
        .route("/servers/:id", delete(servers::remove))
        .route("/servers/:id/start", post(servers::start))
        .route("/servers/:id/stop", post(servers::stop))
        .route("/servers/:id/restart", post(servers::restart))
        .route("/servers/:id/enabled", patch(servers::set_enabled).get(servers::get_enabled))
        .route("/servers/:name/tools", get(servers::tools_for))
        .route("/user-sessions/start", post(sessions::start))
        .route("/user-sessions/stop", post(sessions::stop))
        .route("/user-sessions", get(sessions::list))
        .route("/user-sessions/:user", get(sessions::for_user));

    if state.pkce.is_some() {
        router = router
            .route("/auth/login", get(login::login))
            .route("/auth/callback", get(login::callback));
    }

    router.layer(tower_http::trace::TraceLayer::new_for_http())
}
