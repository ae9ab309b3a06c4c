use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider catalog configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative built-in Tool Provider catalog plus knobs for dynamically
/// added providers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    /// Built-in providers started at boot (subject to each entry's
    /// `disabled_by` env var check).
    #[serde(default)]
    pub builtins: Vec<BuiltinProviderConfig>,

    /// Default timeout (seconds) for an outstanding JSON-RPC request before
    /// the Pending Request Table entry is dropped.
    #[serde(default = "d_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping a provider.
    #[serde(default = "d_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// How long to wait after spawning a provider process before probing it.
    #[serde(default = "d_startup_delay_ms")]
    pub startup_delay_ms: u64,

    /// Tool names treated as "serverless": when a call targets one of these
    /// and `arguments.api_key` is absent, the principal's own platform API
    /// key is copied into the call before dispatch.
    #[serde(default)]
    pub serverless_tools: HashSet<String>,
}

fn d_request_timeout_secs() -> u64 {
    30
}

fn d_stop_grace_secs() -> u64 {
    5
}

fn d_startup_delay_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinProviderConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// If this env var is set to `"true"` (case-insensitive), the built-in
    /// is skipped at catalog load time.
    #[serde(default)]
    pub disabled_by: Option<String>,

    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

/// Per-provider capability flags consulted by the auth pipeline, the
/// session fleet, and the access policy engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProviderCapabilities {
    /// The provider accepts an on-behalf-of exchanged access token.
    #[serde(default)]
    pub supports_obo: bool,
    /// Only admin principals may invoke this provider.
    #[serde(default)]
    pub admin_only: bool,
    /// For `tools/call`, `arguments.user_id` is set to the principal id
    /// when absent or equal to the literal `"default"`.
    #[serde(default)]
    pub inject_user_id: bool,
    /// Each user gets an isolated process rather than sharing a shared one.
    #[serde(default)]
    pub per_user_isolated: bool,
}

impl BuiltinProviderConfig {
    pub fn is_disabled(&self) -> bool {
        match &self.disabled_by {
            Some(var) => std::env::var(var)
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_builtins() {
        assert!(ProvidersConfig::default().builtins.is_empty());
    }

    #[test]
    fn disabled_by_unset_env_is_enabled() {
        let p = BuiltinProviderConfig {
            name: "awp_admin".into(),
            command: "fastmcp".into(),
            args: vec![],
            env: HashMap::new(),
            disabled_by: Some("MCPB_TEST_NONEXISTENT_VAR_XYZ".into()),
            capabilities: ProviderCapabilities::default(),
        };
        assert!(!p.is_disabled());
    }

    #[test]
    fn disabled_by_true_env_is_disabled() {
        std::env::set_var("MCPB_TEST_DISABLE_FLAG", "true");
        let p = BuiltinProviderConfig {
            name: "awp_admin".into(),
            command: "fastmcp".into(),
            args: vec![],
            env: HashMap::new(),
            disabled_by: Some("MCPB_TEST_DISABLE_FLAG".into()),
            capabilities: ProviderCapabilities::default(),
        };
        assert!(p.is_disabled());
        std::env::remove_var("MCPB_TEST_DISABLE_FLAG");
    }

    #[test]
    fn no_disabled_by_is_always_enabled() {
        let p = BuiltinProviderConfig {
            name: "sequential_thinking".into(),
            command: "npx".into(),
            args: vec![],
            env: HashMap::new(),
            disabled_by: None,
            capabilities: ProviderCapabilities::default(),
        };
        assert!(!p.is_disabled());
    }
}
