use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Access policy engine configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    /// Providers always denied to non-admin principals, regardless of what
    /// the platform group policy says.
    #[serde(default)]
    pub admin_only_providers: HashSet<String>,

    /// Platform endpoint returning per-group allow/deny lists. When absent,
    /// the engine falls back to default-open for non-admin-only providers.
    #[serde(default)]
    pub platform_policy_url: Option<String>,

    /// How long a fetched group policy is cached.
    #[serde(default = "d_policy_cache_ttl_secs")]
    pub policy_cache_ttl_secs: u64,
}

fn d_policy_cache_ttl_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_admin_only_providers() {
        assert!(PolicyConfig::default().admin_only_providers.is_empty());
    }

    #[test]
    fn default_policy_cache_ttl_is_five_minutes() {
        assert_eq!(PolicyConfig::default().policy_cache_ttl_secs, 300);
    }
}
