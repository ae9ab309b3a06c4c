//! Declarative + dynamic catalog of [`ProviderSupervisor`]s.
//!
//! Mirrors the two ways providers enter the broker: a built-in catalog
//! sourced from config (each entry optionally gated off by an env var) and
//! ad-hoc additions submitted at runtime through the HTTP API, in either a
//! flat shape or a Claude-Desktop-style `mcpServers` wrapper.

use crate::supervisor::{ProviderState, ProviderSupervisor, ProviderSupervisorSettings};
use mcpb_domain::config::{BuiltinProviderConfig, ProviderCapabilities, ProvidersConfig};
use mcpb_domain::kv::KvStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const ENABLED_KEY_PREFIX: &str = "mcp:server:enabled:";

#[derive(thiserror::Error, Debug)]
pub enum AddServerError {
    #[error("server configuration must include 'name'")]
    MissingName,
    #[error("server configuration must include 'command'")]
    MissingCommand,
    #[error("mcpServers object is empty")]
    EmptyMcpServers,
    #[error("server '{0}' already exists")]
    AlreadyExists(String),
    #[error("unknown server: {0}")]
    Unknown(String),
}

/// One entry as accepted by the dynamic-add endpoint. Supports both the
/// flat shape (`{name, command, args, env}`) and, after normalization by
/// [`AddServerRequest::from_value`], the `mcpServers`-wrapped shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddServerRequest {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub capabilities: ProviderCapabilities,
}

impl AddServerRequest {
    /// Normalizes either submission shape into a single request.
    ///
    /// Flat: `{"name": "kubernetes", "command": "npx", "args": [...]}`.
    /// Wrapped: `{"mcpServers": {"kubernetes": {"command": "npx", ...}}}` —
    /// only the first entry of `mcpServers` is used, matching the upstream
    /// Claude Desktop config format this accepts for convenience.
    pub fn from_value(value: Value) -> Result<Self, AddServerError> {
        let object = if let Some(servers) = value.get("mcpServers") {
            let servers = servers.as_object().ok_or(AddServerError::EmptyMcpServers)?;
            let (name, server_config) = servers
                .iter()
                .next()
                .ok_or(AddServerError::EmptyMcpServers)?;
            let mut merged = server_config.clone();
            if let Some(obj) = merged.as_object_mut() {
                obj.insert("name".into(), Value::String(name.clone()));
            }
            merged
        } else {
            value
        };

        let name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or(AddServerError::MissingName)?
            .to_string();

        let command = object
            .get("command")
            .and_then(Value::as_str)
            .ok_or(AddServerError::MissingCommand)?
            .to_string();

        let args = object
            .get("args")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let env = object
            .get("env")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let capabilities = object
            .get("capabilities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| ProviderCapabilities {
                supports_obo: object
                    .get("supports_obo")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                admin_only: false,
                inject_user_id: false,
                per_user_isolated: false,
            });

        Ok(Self {
            name,
            command,
            args,
            env,
            capabilities,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub state: String,
    pub enabled: bool,
    pub last_error: Option<String>,
    pub capabilities: ProviderCapabilities,
}

struct Entry {
    supervisor: Arc<ProviderSupervisor>,
    capabilities: ProviderCapabilities,
    disabled_by: Option<String>,
}

/// The provider catalog: one [`ProviderSupervisor`] per provider name, plus
/// the enabled-flag layer persisted through a [`KvStore`].
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    settings: ProviderSupervisorSettings,
    kv: Arc<dyn KvStore>,
}

impl ProviderRegistry {
    pub fn new(kv: Arc<dyn KvStore>, request_timeout_secs: u64, stop_grace_secs: u64, startup_delay_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            settings: ProviderSupervisorSettings {
                request_timeout: std::time::Duration::from_secs(request_timeout_secs),
                stop_grace: std::time::Duration::from_secs(stop_grace_secs),
                startup_delay: std::time::Duration::from_millis(startup_delay_ms),
            },
            kv,
        }
    }

    fn new_settings(&self) -> ProviderSupervisorSettings {
        ProviderSupervisorSettings {
            request_timeout: self.settings.request_timeout,
            stop_grace: self.settings.stop_grace,
            startup_delay: self.settings.startup_delay,
        }
    }

    /// Builds a registry from configuration, inserting every built-in entry
    /// not gated off by its `disabled_by` environment variable. Does not
    /// start any processes — call [`Self::start_all_enabled`] for that.
    pub async fn from_config(config: &ProvidersConfig, kv: Arc<dyn KvStore>) -> Self {
        let registry = Self::new(
            kv,
            config.request_timeout_secs,
            config.stop_grace_secs,
            config.startup_delay_ms,
        );
        for builtin in &config.builtins {
            registry.insert_builtin(builtin).await;
        }
        registry.load_enabled_states().await;
        registry
    }

    async fn insert_builtin(&self, builtin: &BuiltinProviderConfig) {
        let supervisor = Arc::new(ProviderSupervisor::from_builtin(builtin, self.new_settings()));
        let mut entries = self.entries.write().await;
        entries.insert(
            builtin.name.clone(),
            Entry {
                supervisor,
                capabilities: builtin.capabilities,
                disabled_by: builtin.disabled_by.clone(),
            },
        );
    }

    /// Whether a built-in entry's `disabled_by` env var currently disables
    /// it. Dynamically added servers never have a `disabled_by` gate.
    fn is_env_disabled(disabled_by: &Option<String>) -> bool {
        disabled_by
            .as_ref()
            .map(|var| {
                std::env::var(var)
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Starts every provider that is neither env-disabled nor persisted as
    /// disabled in the key-value store, in parallel.
    pub async fn start_all_enabled(&self) {
        let names: Vec<String> = {
            let entries = self.entries.read().await;
            entries.keys().cloned().collect()
        };

        let mut handles = Vec::new();
        for name in names {
            if !self.get_enabled(&name).await {
                tracing::info!(provider = %name, "skipping disabled provider at boot");
                continue;
            }
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&name) {
                let supervisor = entry.supervisor.clone();
                handles.push(tokio::spawn(async move {
                    if let Err(e) = supervisor.start().await {
                        tracing::warn!(provider = %supervisor.name, error = %e, "provider failed to start at boot");
                    }
                }));
            }
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub async fn stop_all(&self) {
        let supervisors: Vec<Arc<ProviderSupervisor>> = {
            let entries = self.entries.read().await;
            entries.values().map(|e| e.supervisor.clone()).collect()
        };
        for supervisor in supervisors {
            supervisor.stop().await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ProviderSupervisor>> {
        self.entries.read().await.get(name).map(|e| e.supervisor.clone())
    }

    pub async fn capabilities(&self, name: &str) -> Option<ProviderCapabilities> {
        self.entries.read().await.get(name).map(|e| e.capabilities)
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn status_map(&self) -> Vec<ProviderStatus> {
        let entries = self.entries.read().await;
        let mut out = Vec::with_capacity(entries.len());
        for (name, entry) in entries.iter() {
            out.push(ProviderStatus {
                name: name.clone(),
                state: format!("{:?}", entry.supervisor.state().await).to_lowercase(),
                enabled: !Self::is_env_disabled(&entry.disabled_by) && self.kv_enabled(name).await,
                last_error: entry.supervisor.last_error().await,
                capabilities: entry.capabilities,
            });
        }
        out
    }

    pub async fn add_server(&self, req: AddServerRequest) -> Result<ProviderStatus, AddServerError> {
        {
            let entries = self.entries.read().await;
            if entries.contains_key(&req.name) {
                return Err(AddServerError::AlreadyExists(req.name));
            }
        }

        let supervisor = Arc::new(ProviderSupervisor::new(
            req.name.clone(),
            req.command.clone(),
            req.args.clone(),
            req.env.clone(),
            self.new_settings(),
        ));

        {
            let mut entries = self.entries.write().await;
            entries.insert(
                req.name.clone(),
                Entry {
                    supervisor: supervisor.clone(),
                    capabilities: req.capabilities,
                    disabled_by: None,
                },
            );
        }

        tracing::info!(name = %req.name, command = %req.command, "added dynamic provider");
        self.set_enabled(&req.name, true).await;
        if let Err(e) = supervisor.start().await {
            tracing::warn!(provider = %req.name, error = %e, "dynamically added provider failed to start");
        }

        Ok(ProviderStatus {
            name: req.name,
            state: format!("{:?}", supervisor.state().await).to_lowercase(),
            enabled: true,
            last_error: supervisor.last_error().await,
            capabilities: req.capabilities,
        })
    }

    pub async fn remove_server(&self, name: &str) -> Result<(), AddServerError> {
        let supervisor = {
            let mut entries = self.entries.write().await;
            entries.remove(name).ok_or_else(|| AddServerError::Unknown(name.to_string()))?
        };
        supervisor.supervisor.stop().await;
        let _ = self.kv.delete(&enabled_key(name)).await;
        tracing::info!(provider = %name, "removed provider");
        Ok(())
    }

    pub async fn start_server(&self, name: &str) -> Result<(), AddServerError> {
        let supervisor = self.get(name).await.ok_or_else(|| AddServerError::Unknown(name.to_string()))?;
        let _ = supervisor.start().await;
        Ok(())
    }

    pub async fn stop_server(&self, name: &str) -> Result<(), AddServerError> {
        let supervisor = self.get(name).await.ok_or_else(|| AddServerError::Unknown(name.to_string()))?;
        supervisor.stop().await;
        Ok(())
    }

    pub async fn restart_server(&self, name: &str) -> Result<(), AddServerError> {
        let supervisor = self.get(name).await.ok_or_else(|| AddServerError::Unknown(name.to_string()))?;
        supervisor.stop().await;
        let _ = supervisor.start().await;
        Ok(())
    }

    /// Persists the enabled flag and starts/stops the process to match.
    pub async fn set_server_enabled(&self, name: &str, enabled: bool) -> Result<(), AddServerError> {
        let supervisor = self.get(name).await.ok_or_else(|| AddServerError::Unknown(name.to_string()))?;
        self.set_enabled(name, enabled).await;

        if enabled && supervisor.state().await != ProviderState::Running {
            let _ = supervisor.start().await;
        } else if !enabled && supervisor.state().await == ProviderState::Running {
            supervisor.stop().await;
        }
        Ok(())
    }

    async fn set_enabled(&self, name: &str, enabled: bool) {
        if let Err(e) = self.kv.set(&enabled_key(name), if enabled { "true" } else { "false" }).await {
            tracing::warn!(provider = %name, error = %e, "failed to persist enabled state");
        }
    }

    async fn kv_enabled(&self, name: &str) -> bool {
        match self.kv.get(&enabled_key(name)).await {
            Ok(Some(v)) => v == "true",
            _ => true,
        }
    }

    pub async fn get_enabled(&self, name: &str) -> bool {
        let entries = self.entries.read().await;
        match entries.get(name) {
            Some(entry) if Self::is_env_disabled(&entry.disabled_by) => false,
            Some(_) => self.kv_enabled(name).await,
            None => false,
        }
    }

    pub async fn list_enabled(&self) -> HashMap<String, bool> {
        let names = self.names().await;
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            out.insert(name.clone(), self.get_enabled(&name).await);
        }
        out
    }

    /// Loads persisted enabled flags from the key-value store, overriding
    /// each built-in entry's compile-time default — mirrors the original
    /// `_load_enabled_states_from_redis` behavior.
    async fn load_enabled_states(&self) {
        let names = self.names().await;
        for name in names {
            match self.kv.get(&enabled_key(&name)).await {
                Ok(Some(v)) => {
                    tracing::info!(provider = %name, enabled = %v, "loaded persisted enabled state");
                }
                Ok(None) => {
                    self.set_enabled(&name, true).await;
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "failed to load persisted enabled state");
                }
            }
        }
    }

    /// Aggregates `tools/list` results across every running provider,
    /// tagged by provider name.
    pub async fn list_all_tools(&self) -> HashMap<String, Vec<mcpb_transport::McpToolDef>> {
        let supervisors: Vec<(String, Arc<ProviderSupervisor>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.supervisor.clone()))
                .collect()
        };

        let mut all = HashMap::new();
        for (name, supervisor) in supervisors {
            if supervisor.state().await == ProviderState::Running {
                all.insert(name, supervisor.tools().await);
            } else {
                all.insert(name, Vec::new());
            }
        }
        all
    }
}

fn enabled_key(name: &str) -> String {
    format!("{ENABLED_KEY_PREFIX}{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpb_domain::InMemoryKvStore;

    fn kv() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[test]
    fn parses_flat_shape() {
        let value = serde_json::json!({
            "name": "kubernetes",
            "command": "npx",
            "args": ["-y", "kubernetes-mcp-server@latest"]
        });
        let req = AddServerRequest::from_value(value).unwrap();
        assert_eq!(req.name, "kubernetes");
        assert_eq!(req.command, "npx");
        assert_eq!(req.args, vec!["-y", "kubernetes-mcp-server@latest"]);
    }

    #[test]
    fn parses_mcp_servers_wrapped_shape() {
        let value = serde_json::json!({
            "mcpServers": {
                "kubernetes": {
                    "command": "npx",
                    "args": ["-y", "kubernetes-mcp-server@latest"]
                }
            }
        });
        let req = AddServerRequest::from_value(value).unwrap();
        assert_eq!(req.name, "kubernetes");
        assert_eq!(req.command, "npx");
    }

    #[test]
    fn rejects_empty_mcp_servers() {
        let value = serde_json::json!({ "mcpServers": {} });
        assert!(matches!(
            AddServerRequest::from_value(value),
            Err(AddServerError::EmptyMcpServers)
        ));
    }

    #[test]
    fn rejects_missing_name() {
        let value = serde_json::json!({ "command": "npx" });
        assert!(matches!(
            AddServerRequest::from_value(value),
            Err(AddServerError::MissingName)
        ));
    }

    #[tokio::test]
    async fn adding_duplicate_name_is_rejected() {
        let registry = ProviderRegistry::new(kv(), 5, 1, 1);
        let req = AddServerRequest {
            name: "widget".into(),
            command: "cat".into(),
            args: vec![],
            env: HashMap::new(),
            capabilities: ProviderCapabilities::default(),
        };
        registry.add_server(req.clone()).await.unwrap();
        let result = registry.add_server(req).await;
        assert!(matches!(result, Err(AddServerError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn removing_unknown_server_errors() {
        let registry = ProviderRegistry::new(kv(), 5, 1, 1);
        assert!(matches!(
            registry.remove_server("nope").await,
            Err(AddServerError::Unknown(_))
        ));
    }

    #[tokio::test]
    async fn set_enabled_persists_through_kv_store() {
        let registry = ProviderRegistry::new(kv(), 5, 1, 1);
        let req = AddServerRequest {
            name: "widget".into(),
            command: "cat".into(),
            args: vec![],
            env: HashMap::new(),
            capabilities: ProviderCapabilities::default(),
        };
        registry.add_server(req).await.unwrap();
        registry.set_server_enabled("widget", false).await.unwrap();
        assert!(!registry.get_enabled("widget").await);
        registry.set_server_enabled("widget", true).await.unwrap();
        assert!(registry.get_enabled("widget").await);
    }
}
