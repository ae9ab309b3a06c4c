//! On-behalf-of credential exchange.
//!
//! Some providers need to call out to a downstream API as the calling user,
//! not as the broker's own service identity. For those, the broker trades
//! the caller's bearer token for a downstream-scoped access token via the
//! IdP's `urn:ietf:params:oauth:grant-type:jwt-bearer` grant, then injects
//! the result into the outgoing tool call rather than the caller's raw
//! token.

use mcpb_domain::config::IdpConfig;
use mcpb_domain::Error;
use serde::Deserialize;

/// The key FastMCP-compatible providers expect the exchanged token under.
/// Deliberately not a leading-underscore key: upstream FastMCP strips
/// leading-underscore keys from `arguments.meta` before a tool ever sees it.
pub const OBO_META_KEY: &str = "userAccessToken";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct OboExchanger {
    idp: IdpConfig,
    client_secret: Option<String>,
    http: reqwest::Client,
}

impl OboExchanger {
    pub fn new(idp: IdpConfig, client_secret: Option<String>, http: reqwest::Client) -> Self {
        Self { idp, client_secret, http }
    }

    pub fn is_configured(&self) -> bool {
        self.idp.token_endpoint.is_some() && self.idp.client_id.is_some() && self.client_secret.is_some()
    }

    /// Exchanges `assertion` (the caller's bearer token, preferring an
    /// identity token over a raw access token when both are available) for a
    /// token scoped to `target_scope`.
    pub async fn exchange(&self, assertion: &str, target_scope: &str) -> Result<String, Error> {
        let token_endpoint = self
            .idp
            .token_endpoint
            .as_ref()
            .ok_or_else(|| Error::OboExchangeFailed("no token endpoint configured".into()))?;
        let client_id = self
            .idp
            .client_id
            .as_ref()
            .ok_or_else(|| Error::OboExchangeFailed("no client id configured".into()))?;
        let client_secret = self
            .client_secret
            .as_ref()
            .ok_or_else(|| Error::OboExchangeFailed("no client secret configured".into()))?;

        let params = [
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("assertion", assertion),
            ("scope", target_scope),
            ("requested_token_use", "on_behalf_of"),
        ];

        let response = self
            .http
            .post(token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::OboExchangeFailed(format!("token endpoint request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OboExchangeFailed(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::OboExchangeFailed(format!("malformed token response: {e}")))?;

        Ok(token.access_token)
    }

    /// Injects the exchanged token into a tool call's arguments under
    /// `meta.userAccessToken` (never `_meta`: FastMCP-compatible providers
    /// strip leading-underscore keys from `arguments.meta` before a tool
    /// ever sees them), without disturbing the caller's own arguments.
    /// Returns the arguments unchanged if exchange isn't configured or the
    /// assertion is absent — callers fall back to the service identity in
    /// that case.
    pub async fn inject(
        &self,
        mut arguments: serde_json::Value,
        assertion: Option<&str>,
        target_scope: &str,
    ) -> serde_json::Value {
        let (Some(assertion), true) = (assertion, self.is_configured()) else {
            return arguments;
        };

        match self.exchange(assertion, target_scope).await {
            Ok(token) => {
                if let Some(obj) = arguments.as_object_mut() {
                    let meta = obj
                        .entry("meta")
                        .or_insert_with(|| serde_json::json!({}));
                    if let Some(meta_obj) = meta.as_object_mut() {
                        meta_obj.insert(OBO_META_KEY.to_string(), serde_json::Value::String(token));
                    }
                }
                arguments
            }
            Err(e) => {
                tracing::warn!(error = %e, "obo exchange failed, proceeding without injected token");
                arguments
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_without_client_secret() {
        let idp = IdpConfig {
            token_endpoint: Some("https://idp.example.com/token".into()),
            client_id: Some("client".into()),
            ..IdpConfig::default()
        };
        let exchanger = OboExchanger::new(idp, None, reqwest::Client::new());
        assert!(!exchanger.is_configured());
    }

    #[test]
    fn configured_with_all_three() {
        let idp = IdpConfig {
            token_endpoint: Some("https://idp.example.com/token".into()),
            client_id: Some("client".into()),
            ..IdpConfig::default()
        };
        let exchanger = OboExchanger::new(idp, Some("secret".into()), reqwest::Client::new());
        assert!(exchanger.is_configured());
    }

    #[tokio::test]
    async fn inject_is_noop_when_not_configured() {
        let exchanger = OboExchanger::new(IdpConfig::default(), None, reqwest::Client::new());
        let args = serde_json::json!({ "foo": "bar" });
        let result = exchanger.inject(args.clone(), Some("tok"), "scope").await;
        assert_eq!(result, args);
    }

    #[test]
    fn meta_key_has_no_leading_underscore() {
        assert_eq!(OBO_META_KEY, "userAccessToken");
        assert!(!OBO_META_KEY.starts_with('_'));
    }

    #[tokio::test]
    async fn inject_is_noop_without_assertion() {
        let idp = IdpConfig {
            token_endpoint: Some("https://idp.example.com/token".into()),
            client_id: Some("client".into()),
            ..IdpConfig::default()
        };
        let exchanger = OboExchanger::new(idp, Some("secret".into()), reqwest::Client::new());
        let args = serde_json::json!({ "foo": "bar" });
        let result = exchanger.inject(args.clone(), None, "scope").await;
        assert_eq!(result, args);
    }
}
