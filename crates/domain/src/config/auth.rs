use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth pipeline configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Settings for the principal-classification chain: local admin sentinel,
/// system/service principals, locally-signed HMAC tokens, and IdP-issued
/// JWKS-backed tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the local admin bearer token used when
    /// no `Authorization` header is present and local-admin mode is enabled.
    #[serde(default = "d_admin_token_env")]
    pub admin_token_env: String,

    /// Prefix identifying platform API keys (`awc_system_...`, `awc_...`).
    #[serde(default = "d_api_key_prefix")]
    pub api_key_prefix: String,

    /// Prefix identifying system service principals within the API key space.
    #[serde(default = "d_system_key_prefix")]
    pub system_key_prefix: String,

    /// Base URL of the platform's `/auth/me` API-key lookup endpoint.
    #[serde(default)]
    pub platform_auth_url: Option<String>,

    /// Named internal/workflow-runner service keys, matched by exact value.
    /// Keyed by principal name, value is the env var holding the key.
    #[serde(default)]
    pub internal_service_keys: Vec<InternalServiceKey>,

    /// Environment variable holding the shared HMAC-SHA256 secret used to
    /// verify locally-signed tokens (no `kid` header).
    #[serde(default = "d_hmac_secret_env")]
    pub hmac_secret_env: String,

    /// JWKS / IdP configuration for asymmetric token verification.
    #[serde(default)]
    pub idp: IdpConfig,

    /// Group names that are treated as administrators.
    #[serde(default)]
    pub admin_groups: HashSet<String>,

    /// Group names authorized to use the broker at all via an IdP-signed
    /// token. A caller must land in at least one of these or in
    /// `admin_groups`; otherwise the IdP-token branch fails with 403. Empty
    /// means "admin_groups only" — there is no separate non-admin tier.
    #[serde(default)]
    pub authorized_groups: HashSet<String>,

    /// Scope/resource requested during on-behalf-of exchange when the
    /// target provider doesn't name one of its own.
    #[serde(default = "d_default_obo_scope")]
    pub default_obo_scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token_env: d_admin_token_env(),
            api_key_prefix: d_api_key_prefix(),
            system_key_prefix: d_system_key_prefix(),
            platform_auth_url: None,
            internal_service_keys: Vec::new(),
            hmac_secret_env: d_hmac_secret_env(),
            idp: IdpConfig::default(),
            admin_groups: HashSet::new(),
            authorized_groups: HashSet::new(),
            default_obo_scope: d_default_obo_scope(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalServiceKey {
    pub name: String,
    pub env: String,
}

/// JWKS-backed identity-provider verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpConfig {
    /// JWKS document URL. When `None`, asymmetric token verification is
    /// disabled and such tokens are rejected as invalid.
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// Primary token issuer, e.g. the IdP's v2 issuer URL.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Additional acceptable issuers, e.g. the same tenant's v1-format
    /// issuer URL. A token is accepted if it matches any of `issuer` plus
    /// this set.
    #[serde(default)]
    pub issuer_aliases: Vec<String>,

    /// Primary audience, normally the app's client id.
    #[serde(default)]
    pub audience: Option<String>,

    /// The cloud-management resource URI, accepted as an audience alongside
    /// `audience` and the derived `api://{client_id}` form. Most deployments
    /// leave this at its default.
    #[serde(default = "d_cloud_management_audience")]
    pub cloud_management_audience: String,

    /// How long a fetched JWKS document is cached before refetching.
    #[serde(default = "d_jwks_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,

    /// Algorithms accepted during verification. `alg: none` is never
    /// accepted regardless of this list.
    #[serde(default = "d_allowed_algorithms")]
    pub allowed_algorithms: Vec<String>,

    /// OAuth2 client id/secret used for the OBO exchange and PKCE login.
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret_env: Option<String>,

    #[serde(default)]
    pub token_endpoint: Option<String>,

    #[serde(default)]
    pub authorize_endpoint: Option<String>,

    #[serde(default)]
    pub redirect_uri: Option<String>,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            jwks_url: None,
            issuer: None,
            issuer_aliases: Vec::new(),
            audience: None,
            cloud_management_audience: d_cloud_management_audience(),
            jwks_cache_ttl_secs: d_jwks_cache_ttl_secs(),
            allowed_algorithms: d_allowed_algorithms(),
            client_id: None,
            client_secret_env: None,
            token_endpoint: None,
            authorize_endpoint: None,
            redirect_uri: None,
        }
    }
}

impl IdpConfig {
    pub fn is_configured(&self) -> bool {
        self.jwks_url.is_some() && self.issuer.is_some()
    }

    pub fn pkce_configured(&self) -> bool {
        self.is_configured()
            && self.client_id.is_some()
            && self.token_endpoint.is_some()
            && self.authorize_endpoint.is_some()
            && self.redirect_uri.is_some()
    }

    /// The full set of issuers a token is checked against: `issuer` plus
    /// `issuer_aliases` (e.g. the v1/v2 issuer URLs for the same tenant).
    pub fn known_issuers(&self) -> Vec<String> {
        let mut out: Vec<String> = self.issuer.iter().cloned().collect();
        out.extend(self.issuer_aliases.iter().cloned());
        out
    }

    /// The full set of audiences a token is checked against: the configured
    /// `audience` (app client id), the derived `api://{client_id}` form, and
    /// the cloud-management resource URI.
    pub fn known_audiences(&self) -> Vec<String> {
        let mut out: Vec<String> = self.audience.iter().cloned().collect();
        if let Some(client_id) = &self.client_id {
            out.push(format!("api://{client_id}"));
        }
        out.push(self.cloud_management_audience.clone());
        out
    }
}

fn d_admin_token_env() -> String {
    "MCPB_ADMIN_TOKEN".into()
}

fn d_api_key_prefix() -> String {
    "awc_".into()
}

fn d_system_key_prefix() -> String {
    "awc_system_".into()
}

fn d_hmac_secret_env() -> String {
    "MCPB_HMAC_SECRET".into()
}

fn d_default_obo_scope() -> String {
    "https://management.azure.com/.default".into()
}

fn d_jwks_cache_ttl_secs() -> u64 {
    600
}

fn d_cloud_management_audience() -> String {
    "https://management.azure.com/".into()
}

fn d_allowed_algorithms() -> Vec<String> {
    vec!["RS256".into(), "ES256".into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_admin_groups_empty() {
        assert!(AuthConfig::default().admin_groups.is_empty());
    }

    #[test]
    fn default_disallows_none_algorithm() {
        let idp = IdpConfig::default();
        assert!(!idp.allowed_algorithms.iter().any(|a| a == "none"));
    }

    #[test]
    fn idp_not_configured_without_jwks_url() {
        assert!(!IdpConfig::default().is_configured());
    }

    #[test]
    fn idp_configured_with_jwks_and_issuer() {
        let idp = IdpConfig {
            jwks_url: Some("https://idp.example.com/jwks".into()),
            issuer: Some("https://idp.example.com/".into()),
            ..IdpConfig::default()
        };
        assert!(idp.is_configured());
    }

    #[test]
    fn known_audiences_includes_api_prefix_and_cloud_management() {
        let idp = IdpConfig {
            audience: Some("my-client-id".into()),
            client_id: Some("my-client-id".into()),
            ..IdpConfig::default()
        };
        let audiences = idp.known_audiences();
        assert!(audiences.contains(&"my-client-id".to_string()));
        assert!(audiences.contains(&"api://my-client-id".to_string()));
        assert!(audiences.contains(&"https://management.azure.com/".to_string()));
    }

    #[test]
    fn known_issuers_includes_aliases() {
        let idp = IdpConfig {
            issuer: Some("https://login.example.com/v2".into()),
            issuer_aliases: vec!["https://login.example.com/v1".into()],
            ..IdpConfig::default()
        };
        let issuers = idp.known_issuers();
        assert_eq!(issuers.len(), 2);
        assert!(issuers.contains(&"https://login.example.com/v2".to_string()));
        assert!(issuers.contains(&"https://login.example.com/v1".to_string()));
    }

    #[test]
    fn pkce_requires_full_oauth_settings() {
        let mut idp = IdpConfig {
            jwks_url: Some("https://idp.example.com/jwks".into()),
            issuer: Some("https://idp.example.com/".into()),
            client_id: Some("client".into()),
            ..IdpConfig::default()
        };
        assert!(!idp.pkce_configured());
        idp.token_endpoint = Some("https://idp.example.com/token".into());
        idp.authorize_endpoint = Some("https://idp.example.com/authorize".into());
        idp.redirect_uri = Some("https://gateway.example.com/auth/callback".into());
        assert!(idp.pkce_configured());
    }
}
