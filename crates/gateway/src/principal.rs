//! Extracts a classified [`Principal`] from the incoming request's
//! `Authorization` header, plus the two auxiliary credential headers the
//! router consults: `X-Azure-ID-Token` (preferred OBO assertion) and
//! `X-Api-Key` (copied into serverless tool calls).

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use mcpb_auth::Principal;
use mcpb_domain::Error;

use crate::error::ApiError;
use crate::state::AppState;

pub struct AuthedPrincipal {
    pub principal: Principal,
    /// Assertion token used for on-behalf-of exchange: an `X-Azure-ID-Token`
    /// header if present, otherwise the bearer token itself.
    pub assertion: Option<String>,
    pub api_key: Option<String>,
}

impl std::ops::Deref for AuthedPrincipal {
    type Target = Principal;

    fn deref(&self) -> &Principal {
        &self.principal
    }
}

impl AuthedPrincipal {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.principal.is_admin {
            Ok(())
        } else {
            Err(ApiError(Error::AccessDenied("admin privileges required".into())))
        }
    }
}

#[async_trait::async_trait]
impl FromRequestParts<AppState> for AuthedPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let principal = state.auth.classify(header).await?;

        let assertion = parts
            .headers
            .get("x-azure-id-token")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| principal.access_token.clone());

        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self { principal, assertion, api_key })
    }
}
