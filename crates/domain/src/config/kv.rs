use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Key-value store configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backing store for persisted state that must survive a restart: enabled
/// flags for dynamically added providers, PKCE login state, cached group
/// policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Connection URL, e.g. `redis://localhost:6379`. When absent, an
    /// in-memory store is used and persisted state does not survive a
    /// restart.
    #[serde(default)]
    pub url: Option<String>,

    /// Prefix applied to every key this process writes, so that multiple
    /// environments can share one store.
    #[serde(default = "d_key_prefix")]
    pub key_prefix: String,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: d_key_prefix(),
        }
    }
}

fn d_key_prefix() -> String {
    "mcp:".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_is_none() {
        assert!(KvConfig::default().url.is_none());
    }

    #[test]
    fn default_key_prefix() {
        assert_eq!(KvConfig::default().key_prefix, "mcp:");
    }
}
