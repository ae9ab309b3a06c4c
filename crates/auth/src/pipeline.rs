//! Ordered credential classification chain.
//!
//! Mirrors the dependency-injection order the original gateway used when
//! deciding what kind of caller it was talking to: local-admin sentinel
//! first, then the platform's own API-key namespaces, then named internal
//! service keys, then the two token-verification branches (locally-signed
//! HMAC, or IdP-signed asymmetric). The first branch whose shape matches
//! the credential wins; later branches never get a chance to reinterpret it.

use crate::jwks::JwksCache;
use crate::principal::{resolve_claims, Principal, PrincipalKind};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use mcpb_domain::config::AuthConfig;
use mcpb_domain::Error;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Resolves an API key to a user identity via the platform's own lookup
/// endpoint. The gateway itself holds no user directory.
#[async_trait::async_trait]
pub trait PlatformAuthClient: Send + Sync {
    async fn lookup_api_key(&self, api_key: &str) -> Result<PlatformIdentity, Error>;
}

#[derive(Debug, Clone)]
pub struct PlatformIdentity {
    pub id: String,
    pub email: Option<String>,
    pub groups: Vec<String>,
    pub is_admin: bool,
}

/// A `reqwest`-backed [`PlatformAuthClient`] hitting `{platform_auth_url}/auth/me`.
pub struct HttpPlatformAuthClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPlatformAuthClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self { base_url: base_url.into(), http }
    }
}

#[async_trait::async_trait]
impl PlatformAuthClient for HttpPlatformAuthClient {
    async fn lookup_api_key(&self, api_key: &str) -> Result<PlatformIdentity, Error> {
        #[derive(serde::Deserialize)]
        struct MeResponse {
            id: String,
            #[serde(default)]
            email: Option<String>,
            #[serde(default)]
            groups: Vec<String>,
            #[serde(default)]
            is_admin: bool,
        }

        let url = format!("{}/auth/me", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| Error::DependencyTimeout(format!("platform /auth/me: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::AuthInvalid(format!(
                "platform rejected api key with status {}",
                response.status()
            )));
        }

        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| Error::AuthInvalid(format!("malformed /auth/me response: {e}")))?;

        Ok(PlatformIdentity {
            id: me.id,
            email: me.email,
            groups: me.groups,
            is_admin: me.is_admin,
        })
    }
}

pub struct AuthPipeline {
    config: AuthConfig,
    admin_token: Option<String>,
    hmac_secret: Option<Vec<u8>>,
    internal_keys: HashMap<String, String>, // value -> principal name
    platform_client: Option<Arc<dyn PlatformAuthClient>>,
    jwks: Option<Arc<JwksCache>>,
}

impl AuthPipeline {
    pub fn new(
        config: AuthConfig,
        admin_token: Option<String>,
        hmac_secret: Option<Vec<u8>>,
        internal_keys: HashMap<String, String>,
        platform_client: Option<Arc<dyn PlatformAuthClient>>,
        jwks: Option<Arc<JwksCache>>,
    ) -> Self {
        Self {
            config,
            admin_token,
            hmac_secret,
            internal_keys,
            platform_client,
            jwks,
        }
    }

    /// Classifies an `Authorization` header value (without the `Bearer `
    /// prefix stripped yet) into a [`Principal`], walking the ordered chain.
    /// `header` is `None` when no `Authorization` header was present at all.
    pub async fn classify(&self, header: Option<&str>) -> Result<Principal, Error> {
        let Some(header) = header else {
            return Ok(Principal::local_admin());
        };

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or(header)
            .trim();

        if token.is_empty() {
            return Ok(Principal::local_admin());
        }

        if let Some(admin_token) = &self.admin_token {
            if constant_time_eq(token, admin_token) {
                return Ok(Principal::local_admin());
            }
        }

        if token.starts_with(&self.config.system_key_prefix) {
            return Ok(Principal::system_service());
        }

        if token.starts_with(&self.config.api_key_prefix) {
            return self.classify_api_key(token).await;
        }

        if let Some(name) = self.internal_keys.iter().find_map(|(value, name)| {
            constant_time_eq(token, value).then(|| name.clone())
        }) {
            return Ok(Principal::internal_service(&name));
        }

        match decode_unverified_header(token) {
            Some((Some(_kid), alg)) => self.classify_idp_token(token, alg).await,
            Some((None, _alg)) => self.classify_hmac_token(token).await,
            None => Err(Error::AuthInvalid("malformed bearer token".into())),
        }
    }

    async fn classify_api_key(&self, token: &str) -> Result<Principal, Error> {
        let client = self
            .platform_client
            .as_ref()
            .ok_or_else(|| Error::AuthInvalid("no platform auth client configured for api keys".into()))?;

        let identity = client.lookup_api_key(token).await?;
        let groups: std::collections::HashSet<String> = identity.groups.into_iter().collect();
        let is_admin = identity.is_admin || groups.iter().any(|g| self.config.admin_groups.contains(g));

        Ok(Principal {
            id: identity.id,
            email: identity.email,
            is_admin,
            groups,
            kind: PrincipalKind::ApiKeyUser,
            claim_source: None,
            access_token: Some(token.to_string()),
        })
    }

    async fn classify_hmac_token(&self, token: &str) -> Result<Principal, Error> {
        let secret = self
            .hmac_secret
            .as_ref()
            .ok_or_else(|| Error::AuthInvalid("no hmac secret configured for local tokens".into()))?;

        let claims = verify_hmac_token(token, secret)?;
        self.principal_from_local_claims(claims)
    }

    async fn classify_idp_token(&self, token: &str, alg: String) -> Result<Principal, Error> {
        if !self.config.idp.allowed_algorithms.iter().any(|a| a == &alg) {
            return Err(Error::AuthInvalid(format!("algorithm {alg} not allowed")));
        }
        let algorithm = match alg.as_str() {
            "RS256" => Algorithm::RS256,
            "ES256" => Algorithm::ES256,
            other => return Err(Error::AuthInvalid(format!("unsupported algorithm {other}"))),
        };

        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| Error::AuthInvalid("no jwks configured for idp tokens".into()))?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| Error::AuthInvalid(format!("malformed token header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| Error::AuthInvalid("token missing kid".into()))?;

        let key = jwks
            .get_key(&kid)
            .await
            .map_err(|e| Error::AuthInvalid(format!("jwks lookup failed: {e}")))?;

        let mut validation = Validation::new(algorithm);
        let issuers = self.config.idp.known_issuers();
        if !issuers.is_empty() {
            validation.set_issuer(&issuers);
        }
        validation.set_audience(&self.config.idp.known_audiences());

        let data = jsonwebtoken::decode::<serde_json::Value>(token, &key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired("idp token expired".into()),
                ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                    Error::AuthInvalid(format!("idp token validation failed: {e}"))
                }
                _ => Error::AuthInvalid(format!("idp token invalid: {e}")),
            }
        })?;

        let mut principal = self.principal_from_claims(data.claims, PrincipalKind::IdpToken)?;

        let authorized = principal.is_admin
            || principal.groups.iter().any(|g| self.config.authorized_groups.contains(g));
        if !authorized {
            return Err(Error::AccessDenied(
                "caller's groups include neither an authorized group nor an admin group".into(),
            ));
        }

        principal.access_token = Some(token.to_string());
        Ok(principal)
    }

    /// Builds a [`Principal`] from a locally-signed token's own claim
    /// shape (`userId`/`email`/`isAdmin`/`groups`), per spec §4.5 point 5 —
    /// distinct from [`Self::principal_from_claims`], which follows the
    /// IdP's `oid`/`sub`/`preferred_username` claim-name variance.
    fn principal_from_local_claims(&self, claims: serde_json::Value) -> Result<Principal, Error> {
        let (subject, email, claims_is_admin) = crate::principal::resolve_local_claims(&claims);
        let id = subject.ok_or_else(|| Error::AuthInvalid("token has no userId claim".into()))?;

        let groups: std::collections::HashSet<String> = claims
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default();
        let is_admin = claims_is_admin || groups.iter().any(|g| self.config.admin_groups.contains(g));

        Ok(Principal {
            id,
            email,
            is_admin,
            groups,
            kind: PrincipalKind::LocalToken,
            claim_source: Some("userId"),
            access_token: None,
        })
    }

    fn principal_from_claims(&self, claims: serde_json::Value, kind: PrincipalKind) -> Result<Principal, Error> {
        let (subject, _subject_claim, email, claim_source) = resolve_claims(&claims);
        let id = subject.ok_or_else(|| Error::AuthInvalid("token has no subject claim".into()))?;

        let groups: std::collections::HashSet<String> = claims
            .get("groups")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
            .unwrap_or_default();
        let is_admin = groups.iter().any(|g| self.config.admin_groups.contains(g));

        Ok(Principal {
            id,
            email,
            is_admin,
            groups,
            kind,
            claim_source,
            access_token: None,
        })
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Decodes a JWT header without verifying the signature, returning
/// `(kid, alg)` so the pipeline can route to the HMAC or JWKS branch. `None`
/// if the token isn't even shaped like a JWT.
fn decode_unverified_header(token: &str) -> Option<(Option<String>, String)> {
    let header = jsonwebtoken::decode_header(token).ok()?;
    let alg = format!("{:?}", header.alg);
    Some((header.kid, alg))
}

fn verify_hmac_token(token: &str, secret: &[u8]) -> Result<serde_json::Value, Error> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(Error::AuthInvalid("malformed hmac token".into()));
    }

    let signing_input = format!("{}.{}", parts[0], parts[1]);
    let signature = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[2])
        .map_err(|_| Error::AuthInvalid("malformed token signature".into()))?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| Error::Internal("invalid hmac secret length".into()))?;
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::AuthInvalid("hmac signature mismatch".into()))?;

    let payload = base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, parts[1])
        .map_err(|_| Error::AuthInvalid("malformed token payload".into()))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&payload).map_err(|e| Error::AuthInvalid(format!("malformed token claims: {e}")))?;

    if let Some(exp) = claims.get("exp").and_then(|v| v.as_i64()) {
        if exp < chrono::Utc::now().timestamp() {
            return Err(Error::TokenExpired("local token expired".into()));
        }
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_hmac(claims: &serde_json::Value, secret: &[u8]) -> String {
        let header = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            br#"{"alg":"HS256","typ":"JWT"}"#,
        );
        let payload = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            serde_json::to_vec(claims).unwrap(),
        );
        let signing_input = format!("{header}.{payload}");
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(signing_input.as_bytes());
        let sig = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            mac.finalize().into_bytes(),
        );
        format!("{signing_input}.{sig}")
    }

    #[tokio::test]
    async fn no_header_yields_local_admin() {
        let pipeline = AuthPipeline::new(AuthConfig::default(), None, None, HashMap::new(), None, None);
        let principal = pipeline.classify(None).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::LocalAdmin);
        assert!(principal.is_admin);
    }

    #[tokio::test]
    async fn admin_token_match_yields_local_admin() {
        let pipeline = AuthPipeline::new(
            AuthConfig::default(),
            Some("super-secret".into()),
            None,
            HashMap::new(),
            None,
            None,
        );
        let principal = pipeline.classify(Some("Bearer super-secret")).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::LocalAdmin);
    }

    #[tokio::test]
    async fn system_prefix_yields_system_service() {
        let pipeline = AuthPipeline::new(AuthConfig::default(), None, None, HashMap::new(), None, None);
        let principal = pipeline.classify(Some("Bearer awc_system_xyz")).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::SystemService);
        assert!(principal.is_admin);
    }

    #[tokio::test]
    async fn exact_match_internal_key_yields_internal_service() {
        let mut keys = HashMap::new();
        keys.insert("workflow-key-123".to_string(), "workflow-runner".to_string());
        let pipeline = AuthPipeline::new(AuthConfig::default(), None, None, keys, None, None);
        let principal = pipeline.classify(Some("Bearer workflow-key-123")).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::InternalService);
        assert_eq!(principal.id, "workflow-runner");
    }

    #[tokio::test]
    async fn api_key_without_platform_client_is_rejected() {
        let pipeline = AuthPipeline::new(AuthConfig::default(), None, None, HashMap::new(), None, None);
        let result = pipeline.classify(Some("Bearer awc_some_user_key")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn valid_hmac_token_yields_local_token_principal() {
        let secret = b"test-hmac-secret".to_vec();
        let claims = serde_json::json!({ "userId": "user-1", "email": "user1@example.com" });
        let token = sign_hmac(&claims, &secret);

        let pipeline = AuthPipeline::new(AuthConfig::default(), None, Some(secret), HashMap::new(), None, None);
        let principal = pipeline.classify(Some(&format!("Bearer {token}"))).await.unwrap();
        assert_eq!(principal.kind, PrincipalKind::LocalToken);
        assert_eq!(principal.id, "user-1");
        assert_eq!(principal.email, Some("user1@example.com".into()));
        assert!(!principal.is_admin);
    }

    #[tokio::test]
    async fn hmac_token_is_admin_true_sets_admin_principal() {
        let secret = b"test-hmac-secret".to_vec();
        let claims = serde_json::json!({ "userId": "user-1", "isAdmin": true });
        let token = sign_hmac(&claims, &secret);

        let pipeline = AuthPipeline::new(AuthConfig::default(), None, Some(secret), HashMap::new(), None, None);
        let principal = pipeline.classify(Some(&format!("Bearer {token}"))).await.unwrap();
        assert!(principal.is_admin);
    }

    #[tokio::test]
    async fn tampered_hmac_signature_is_rejected() {
        let secret = b"test-hmac-secret".to_vec();
        let claims = serde_json::json!({ "userId": "user-1" });
        let mut token = sign_hmac(&claims, &secret);
        token.push('x');

        let pipeline = AuthPipeline::new(AuthConfig::default(), None, Some(secret), HashMap::new(), None, None);
        let result = pipeline.classify(Some(&format!("Bearer {token}"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn expired_hmac_token_is_rejected() {
        let secret = b"test-hmac-secret".to_vec();
        let claims = serde_json::json!({ "userId": "user-1", "exp": 1 });
        let token = sign_hmac(&claims, &secret);

        let pipeline = AuthPipeline::new(AuthConfig::default(), None, Some(secret), HashMap::new(), None, None);
        let result = pipeline.classify(Some(&format!("Bearer {token}"))).await;
        assert!(matches!(result, Err(Error::TokenExpired(_))));
    }
}
