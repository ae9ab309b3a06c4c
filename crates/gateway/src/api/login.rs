//! The PKCE login flow's two HTTP endpoints, mounted only when the broker
//! is configured with a full OAuth2 IdP (see [`crate::state::AppState::pkce`]).

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

/// `GET /auth/login` — redirects the browser to the IdP's authorize
/// endpoint, having stashed the PKCE verifier under the returned state.
pub async fn login(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    let pkce = state
        .pkce
        .as_ref()
        .ok_or_else(|| ApiError(mcpb_domain::Error::Config("PKCE login is not configured".into())))?;
    let request = pkce.generate_auth_url().await?;
    Ok(Redirect::temporary(&request.authorize_url))
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: String,
    state: String,
}

/// `GET /auth/callback` — exchanges the authorization code for tokens and
/// hands the IdP access token back in the response body. There is no
/// cookie jar here: the broker is an API fronting stdio child processes,
/// not a browser session host, so the caller (typically the admin UI) is
/// responsible for storing the token and presenting it as `Authorization:
/// Bearer <token>` on subsequent calls — the auth pipeline verifies it
/// against the same JWKS on every request.
pub async fn callback(State(state): State<AppState>, Query(query): Query<CallbackQuery>) -> Result<Json<Value>, ApiError> {
    let pkce = state
        .pkce
        .as_ref()
        .ok_or_else(|| ApiError(mcpb_domain::Error::Config("PKCE login is not configured".into())))?;
    let session = pkce.exchange_code(&query.code, &query.state).await?;
    Ok(Json(json!({
        "user_id": session.user_id,
        "email": session.email,
        "access_token": session.access_token,
    })))
}
