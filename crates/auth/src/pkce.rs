//! PKCE authorization-code login flow.
//!
//! Grounded directly on the original gateway's Azure AD login helper:
//! generate a state + PKCE verifier/challenge pair and stash the verifier
//! for ten minutes, redirect the browser to the IdP, then on callback swap
//! the authorization code (plus the stashed verifier) for tokens and mint an
//! opaque session id good for a day. [`mcpb_domain::KvStore`] has no notion
//! of TTL itself, so expiry is carried alongside the stored value and
//! checked on read.

use crate::principal::resolve_claims;
use base64::Engine;
use mcpb_domain::config::IdpConfig;
use mcpb_domain::{Error, KvStore};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const PKCE_TTL_SECS: i64 = 600;
const SESSION_TTL_SECS: i64 = 86_400;

fn pkce_key(state: &str) -> String {
    format!("pkce:{state}")
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}")
}

#[derive(Debug, Serialize, Deserialize)]
struct Expiring<T> {
    value: T,
    expires_at: i64,
}

impl<T: Serialize + for<'de> Deserialize<'de>> Expiring<T> {
    fn new(value: T, ttl_secs: i64) -> Self {
        Self { value, expires_at: chrono::Utc::now().timestamp() + ttl_secs }
    }

    fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PkceRecord {
    code_verifier: String,
    redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

pub struct AuthorizationRequest {
    pub authorize_url: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

pub struct PkceLoginFlow {
    idp: IdpConfig,
    client_secret: Option<String>,
    http: reqwest::Client,
    kv: Arc<dyn KvStore>,
}

impl PkceLoginFlow {
    pub fn new(idp: IdpConfig, client_secret: Option<String>, http: reqwest::Client, kv: Arc<dyn KvStore>) -> Self {
        Self { idp, client_secret, http, kv }
    }

    /// Generates a state + PKCE challenge pair, stores the verifier under
    /// `pkce:{state}` for ten minutes, and returns the URL to redirect the
    /// browser to.
    pub async fn generate_auth_url(&self) -> Result<AuthorizationRequest, Error> {
        if !self.idp.pkce_configured() {
            return Err(Error::Config("PKCE login is not fully configured".into()));
        }

        let state = random_url_safe(16);
        let code_verifier = random_url_safe(32);
        let code_challenge = {
            let digest = Sha256::digest(code_verifier.as_bytes());
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
        };

        let redirect_uri = self.idp.redirect_uri.clone().expect("checked by pkce_configured");
        let record = PkceRecord { code_verifier, redirect_uri: redirect_uri.clone() };
        let wrapped = Expiring::new(record, PKCE_TTL_SECS);
        self.kv
            .set(&pkce_key(&state), &serde_json::to_string(&wrapped)?)
            .await?;

        let authorize_endpoint = self.idp.authorize_endpoint.clone().expect("checked by pkce_configured");
        let client_id = self.idp.client_id.clone().expect("checked by pkce_configured");

        let authorize_url = format!(
            "{authorize_endpoint}?client_id={client_id}&response_type=code&redirect_uri={redirect}&\
             response_mode=query&scope=openid%20profile%20email&state={state}&\
             code_challenge={challenge}&code_challenge_method=S256",
            redirect = percent_encode(&redirect_uri),
            challenge = code_challenge,
        );

        Ok(AuthorizationRequest { authorize_url, state })
    }

    /// Exchanges an authorization code for tokens, using the PKCE verifier
    /// stashed under `state`. Deletes the PKCE record whether or not the
    /// exchange succeeds — a code is single-use regardless.
    pub async fn exchange_code(&self, code: &str, state: &str) -> Result<SessionRecord, Error> {
        let stored = self.kv.get(&pkce_key(state)).await?;
        self.kv.delete(&pkce_key(state)).await?;

        let stored = stored.ok_or_else(|| Error::AuthInvalid("unknown or expired login state".into()))?;
        let record: Expiring<PkceRecord> =
            serde_json::from_str(&stored).map_err(|e| Error::Internal(format!("corrupt pkce record: {e}")))?;
        if record.is_expired() {
            return Err(Error::AuthInvalid("login state expired".into()));
        }

        let token_endpoint = self
            .idp
            .token_endpoint
            .as_ref()
            .ok_or_else(|| Error::Config("no token endpoint configured".into()))?;
        let client_id = self
            .idp
            .client_id
            .as_ref()
            .ok_or_else(|| Error::Config("no client id configured".into()))?;

        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("client_id", client_id.as_str()),
            ("code", code),
            ("redirect_uri", record.value.redirect_uri.as_str()),
            ("code_verifier", record.value.code_verifier.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::AuthInvalid(format!("token exchange request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthInvalid(format!("token exchange returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::AuthInvalid(format!("malformed token response: {e}")))?;

        let claims = token
            .id_token
            .as_deref()
            .and_then(decode_unverified_claims)
            .unwrap_or_else(|| serde_json::json!({}));
        let (subject, _subject_claim, email, _email_claim) = resolve_claims(&claims);
        let user_id = subject.unwrap_or_else(|| "unknown".to_string());

        let session = SessionRecord {
            user_id,
            email,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        };

        let session_id = uuid::Uuid::new_v4().to_string();
        let wrapped = Expiring::new(session.clone(), SESSION_TTL_SECS);
        self.kv
            .set(&session_key(&session_id), &serde_json::to_string(&wrapped)?)
            .await?;

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, Error> {
        let Some(stored) = self.kv.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        let record: Expiring<SessionRecord> =
            serde_json::from_str(&stored).map_err(|e| Error::Internal(format!("corrupt session record: {e}")))?;
        if record.is_expired() {
            self.kv.delete(&session_key(session_id)).await?;
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<(), Error> {
        self.kv.delete(&session_key(session_id)).await
    }

    /// Refreshes the stored tokens for `session_id` in place, using the
    /// IdP's refresh-token grant, and re-stores the result under the same
    /// session id with a fresh 24h TTL. Many IdPs don't rotate the refresh
    /// token on every use, so the old one is kept unless the response
    /// includes a new one.
    pub async fn refresh(&self, session_id: &str) -> Result<SessionRecord, Error> {
        let existing = self
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::AuthInvalid("unknown or expired session".into()))?;
        let refresh_token = existing
            .refresh_token
            .clone()
            .ok_or_else(|| Error::AuthInvalid("session has no refresh token".into()))?;

        let token_endpoint = self
            .idp
            .token_endpoint
            .as_ref()
            .ok_or_else(|| Error::Config("no token endpoint configured".into()))?;
        let client_id = self
            .idp
            .client_id
            .as_ref()
            .ok_or_else(|| Error::Config("no client id configured".into()))?;

        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| Error::AuthInvalid(format!("token refresh request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::AuthInvalid(format!("token refresh returned {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::AuthInvalid(format!("malformed token response: {e}")))?;

        let refreshed = SessionRecord {
            user_id: existing.user_id,
            email: existing.email,
            access_token: token.access_token,
            refresh_token: token.refresh_token.or(Some(refresh_token)),
        };

        let wrapped = Expiring::new(refreshed.clone(), SESSION_TTL_SECS);
        self.kv
            .set(&session_key(session_id), &serde_json::to_string(&wrapped)?)
            .await?;

        Ok(refreshed)
    }
}

/// Percent-encodes the handful of characters a redirect URI can contain
/// that aren't safe unescaped in a query string. Not a general-purpose
/// URL encoder: callers only ever pass `redirect_uri` values through it.
fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn random_url_safe(num_bytes: usize) -> String {
    let mut bytes = vec![0u8; num_bytes];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a JWT's claims without verifying its signature. Only used for
/// the `id_token` returned directly by the IdP's own token endpoint over
/// TLS during the PKCE exchange — the broker trusts tokens it receives as
/// the direct result of its own code exchange, the same way the original
/// login flow did.
fn decode_unverified_claims(token: &str) -> Option<serde_json::Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpb_domain::InMemoryKvStore;

    fn configured_idp() -> IdpConfig {
        IdpConfig {
            jwks_url: Some("https://idp.example.com/jwks".into()),
            issuer: Some("https://idp.example.com/".into()),
            client_id: Some("client-1".into()),
            token_endpoint: Some("https://idp.example.com/token".into()),
            authorize_endpoint: Some("https://idp.example.com/authorize".into()),
            redirect_uri: Some("https://gateway.example.com/auth/callback".into()),
            ..IdpConfig::default()
        }
    }

    #[tokio::test]
    async fn rejects_generating_url_when_not_configured() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let flow = PkceLoginFlow::new(IdpConfig::default(), None, reqwest::Client::new(), kv);
        assert!(flow.generate_auth_url().await.is_err());
    }

    #[tokio::test]
    async fn generates_auth_url_and_stores_pkce_record() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let flow = PkceLoginFlow::new(configured_idp(), Some("secret".into()), reqwest::Client::new(), kv.clone());
        let request = flow.generate_auth_url().await.unwrap();
        assert!(request.authorize_url.contains("code_challenge="));
        assert!(request.authorize_url.contains(&request.state));
        assert!(kv.get(&pkce_key(&request.state)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exchange_with_unknown_state_is_rejected() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let flow = PkceLoginFlow::new(configured_idp(), Some("secret".into()), reqwest::Client::new(), kv);
        let result = flow.exchange_code("some-code", "unknown-state").await;
        assert!(matches!(result, Err(Error::AuthInvalid(_))));
    }

    #[tokio::test]
    async fn missing_session_returns_none() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let flow = PkceLoginFlow::new(configured_idp(), Some("secret".into()), reqwest::Client::new(), kv);
        assert!(flow.get_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_with_unknown_session_is_rejected() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let flow = PkceLoginFlow::new(configured_idp(), Some("secret".into()), reqwest::Client::new(), kv);
        let result = flow.refresh("nope").await;
        assert!(matches!(result, Err(Error::AuthInvalid(_))));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_is_rejected() {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let session_id = "sess-1";
        let session = SessionRecord {
            user_id: "alice".into(),
            email: Some("alice@example.com".into()),
            access_token: "at-1".into(),
            refresh_token: None,
        };
        let wrapped = Expiring::new(session, SESSION_TTL_SECS);
        kv.set(&session_key(session_id), &serde_json::to_string(&wrapped).unwrap())
            .await
            .unwrap();

        let flow = PkceLoginFlow::new(configured_idp(), Some("secret".into()), reqwest::Client::new(), kv);
        let result = flow.refresh(session_id).await;
        assert!(matches!(result, Err(Error::AuthInvalid(_))));
    }
}
