//! Access policy engine.
//!
//! Decides whether a classified [`Principal`] may reach a given provider.
//! Order of evaluation: admins bypass everything; a hard admin-only
//! provider set always wins over any platform policy; otherwise the
//! platform's own group policy is consulted (allow wins over deny on
//! conflict, matching how the original gateway resolved overlapping group
//! memberships); absent any policy signal, access defaults to allowed.

use crate::principal::Principal;
use mcpb_domain::config::PolicyConfig;
use mcpb_domain::Error;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Deserialize)]
struct GroupPolicy {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PlatformPolicyResponse {
    /// Provider name -> group policy.
    #[serde(default)]
    providers: HashMap<String, GroupPolicy>,
}

struct CachedPolicy {
    response: PlatformPolicyResponse,
    fetched_at: Instant,
}

pub struct PolicyEngine {
    config: PolicyConfig,
    http: reqwest::Client,
    cache: RwLock<Option<CachedPolicy>>,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, http: reqwest::Client) -> Self {
        Self { config, http, cache: RwLock::new(None) }
    }

    /// Returns `Ok(())` if `principal` may call `provider`, otherwise
    /// `Err(Error::AccessDenied)`.
    pub async fn check(&self, principal: &Principal, provider: &str) -> Result<(), Error> {
        if principal.is_admin {
            return Ok(());
        }

        if self.config.admin_only_providers.contains(provider) {
            return Err(Error::AccessDenied(format!(
                "provider {provider} is restricted to administrators"
            )));
        }

        let Some(platform_policy_url) = &self.config.platform_policy_url else {
            return Ok(());
        };

        let policy = match self.get_policy(platform_policy_url).await {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(error = %e, "platform policy fetch failed, defaulting to allow");
                return Ok(());
            }
        };

        let Some(group_policy) = policy.providers.get(provider) else {
            return Ok(());
        };

        let allowed = principal.groups.iter().any(|g| group_policy.allow.contains(g));
        if allowed {
            return Ok(());
        }

        let denied = principal.groups.iter().any(|g| group_policy.deny.contains(g));
        if denied {
            return Err(Error::AccessDenied(format!(
                "principal's groups are denied access to provider {provider}"
            )));
        }

        // Neither an `allow` nor a `deny` entry matched the principal's
        // groups. A non-empty `allow` list naming other groups is not an
        // implicit deny for everyone else; default-open still applies.
        Ok(())
    }

    async fn get_policy(&self, url: &str) -> Result<PlatformPolicyResponse, Error> {
        let ttl = Duration::from_secs(self.config.policy_cache_ttl_secs);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.response.clone());
                }
            }
        }

        let response: PlatformPolicyResponse = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::DependencyTimeout(format!("platform policy fetch: {e}")))?
            .json()
            .await
            .map_err(|e| Error::DependencyTimeout(format!("malformed platform policy response: {e}")))?;

        let mut cache = self.cache.write().await;
        *cache = Some(CachedPolicy { response: response.clone(), fetched_at: Instant::now() });
        Ok(response)
    }
}

impl Clone for PlatformPolicyResponse {
    fn clone(&self) -> Self {
        Self { providers: self.providers.clone() }
    }
}

impl Clone for GroupPolicy {
    fn clone(&self) -> Self {
        Self { allow: self.allow.clone(), deny: self.deny.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::principal::Principal;
    use std::collections::HashSet;

    fn user(groups: &[&str]) -> Principal {
        Principal {
            id: "user-1".into(),
            email: None,
            is_admin: false,
            groups: groups.iter().map(|s| s.to_string()).collect(),
            kind: crate::principal::PrincipalKind::ApiKeyUser,
            claim_source: None,
            access_token: None,
        }
    }

    #[tokio::test]
    async fn admin_bypasses_everything() {
        let mut config = PolicyConfig::default();
        config.admin_only_providers.insert("secret-tool".into());
        let engine = PolicyEngine::new(config, reqwest::Client::new());
        let admin = Principal::local_admin();
        assert!(engine.check(&admin, "secret-tool").await.is_ok());
    }

    #[tokio::test]
    async fn admin_only_provider_rejects_non_admin() {
        let mut config = PolicyConfig::default();
        config.admin_only_providers.insert("secret-tool".into());
        let engine = PolicyEngine::new(config, reqwest::Client::new());
        let result = engine.check(&user(&["everyone"]), "secret-tool").await;
        assert!(matches!(result, Err(Error::AccessDenied(_))));
    }

    #[tokio::test]
    async fn no_platform_policy_url_defaults_to_allow() {
        let config = PolicyConfig::default();
        let engine = PolicyEngine::new(config, reqwest::Client::new());
        assert!(engine.check(&user(&["anyone"]), "some-provider").await.is_ok());
    }

    #[tokio::test]
    async fn admin_only_providers_is_independent_of_platform_policy() {
        let mut config = PolicyConfig::default();
        config.admin_only_providers = HashSet::from(["locked".to_string()]);
        let engine = PolicyEngine::new(config, reqwest::Client::new());
        assert!(engine.check(&user(&["engineering"]), "open-provider").await.is_ok());
    }

    fn config_with_policy_url() -> PolicyConfig {
        let mut config = PolicyConfig::default();
        config.platform_policy_url = Some("http://platform.invalid/policy".into());
        config
    }

    #[tokio::test]
    async fn group_outside_a_nonempty_allow_list_still_defaults_to_allow() {
        let policy = PlatformPolicyResponse {
            providers: HashMap::from([(
                "restricted-tool".to_string(),
                GroupPolicy { allow: vec!["approved-team".to_string()], deny: vec![] },
            )]),
        };
        let engine = PolicyEngine::new(config_with_policy_url(), reqwest::Client::new());
        *engine.cache.write().await = Some(CachedPolicy { response: policy, fetched_at: Instant::now() });

        // `outsiders` matches neither `allow` nor `deny` for this provider;
        // per spec §4.7 step 4 this still falls through to default-allow.
        let result = engine.check(&user(&["outsiders"]), "restricted-tool").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn group_in_deny_list_is_still_rejected() {
        let policy = PlatformPolicyResponse {
            providers: HashMap::from([(
                "restricted-tool".to_string(),
                GroupPolicy { allow: vec!["approved-team".to_string()], deny: vec!["blocked-team".to_string()] },
            )]),
        };
        let engine = PolicyEngine::new(config_with_policy_url(), reqwest::Client::new());
        *engine.cache.write().await = Some(CachedPolicy { response: policy, fetched_at: Instant::now() });

        let result = engine.check(&user(&["blocked-team"]), "restricted-tool").await;
        assert!(matches!(result, Err(Error::AccessDenied(_))));
    }
}
