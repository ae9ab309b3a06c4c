//! Per-provider lifecycle state machine.
//!
//! `Stopped -> Starting -> Running | Failed`, and `Running -> Stopped ->
//! Starting` on a later restart. A supervisor owns exactly one transport at
//! a time; restarting replaces it rather than mutating it in place.

use mcpb_domain::config::BuiltinProviderConfig;
use mcpb_transport::{initialize_params, McpTransport, StdioTransport, ToolsListResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Stopped,
    Starting,
    Running,
    Failed,
}

#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("provider is already starting or running")]
    AlreadyActive,
    #[error("transport: {0}")]
    Transport(#[from] mcpb_transport::TransportError),
}

pub struct ProviderSupervisorSettings {
    pub request_timeout: Duration,
    pub stop_grace: Duration,
    pub startup_delay: Duration,
}

/// Owns one provider's spawn parameters, running transport (if any), and
/// cached tool list.
pub struct ProviderSupervisor {
    pub name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    settings: ProviderSupervisorSettings,
    state: RwLock<ProviderState>,
    transport: RwLock<Option<Arc<StdioTransport>>>,
    tools: RwLock<Vec<mcpb_transport::McpToolDef>>,
    last_error: RwLock<Option<String>>,
}

impl ProviderSupervisor {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        env: HashMap<String, String>,
        settings: ProviderSupervisorSettings,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env,
            settings,
            state: RwLock::new(ProviderState::Stopped),
            transport: RwLock::new(None),
            tools: RwLock::new(Vec::new()),
            last_error: RwLock::new(None),
        }
    }

    pub fn from_builtin(builtin: &BuiltinProviderConfig, settings: ProviderSupervisorSettings) -> Self {
        Self::new(
            builtin.name.clone(),
            builtin.command.clone(),
            builtin.args.clone(),
            builtin.env.clone(),
            settings,
        )
    }

    pub async fn state(&self) -> ProviderState {
        *self.state.read().await
    }

    pub async fn tools(&self) -> Vec<mcpb_transport::McpToolDef> {
        self.tools.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn transport(&self) -> Option<Arc<StdioTransport>> {
        self.transport.read().await.clone()
    }

    /// Spawn the child, run the `initialize` handshake, fetch `tools/list`.
    /// Transitions `Stopped -> Starting -> Running | Failed`.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ProviderState::Starting | ProviderState::Running) {
                return Err(SupervisorError::AlreadyActive);
            }
            *state = ProviderState::Starting;
        }

        match self.try_start().await {
            Ok((tools, warning)) => {
                *self.tools.write().await = tools;
                *self.last_error.write().await = warning.clone();
                *self.state.write().await = ProviderState::Running;
                match &warning {
                    Some(w) => tracing::warn!(provider = %self.name, warning = %w, "provider started with a handshake warning"),
                    None => tracing::info!(provider = %self.name, "provider started"),
                }
                Ok(())
            }
            Err(e) => {
                *self.last_error.write().await = Some(e.to_string());
                *self.state.write().await = ProviderState::Failed;
                tracing::warn!(provider = %self.name, error = %e, "provider failed to start");
                Err(e)
            }
        }
    }

    /// Returns the advertised tools plus, if the `initialize` handshake
    /// itself came back as a JSON-RPC error rather than a timeout or dead
    /// process, a warning describing it. An error response there means the
    /// child is alive and speaking JSON-RPC, just unhappy about the
    /// handshake params — that's worth recording but not fatal; only a
    /// timeout or a dead process fails the start.
    async fn try_start(&self) -> Result<(Vec<mcpb_transport::McpToolDef>, Option<String>), SupervisorError> {
        let transport = Arc::new(StdioTransport::spawn(
            self.name.clone(),
            &self.command,
            &self.args,
            &self.env,
            self.settings.request_timeout,
        )?);

        tokio::time::sleep(self.settings.startup_delay).await;
        if !transport.is_alive() {
            return Err(SupervisorError::Transport(
                mcpb_transport::TransportError::ProcessExited,
            ));
        }

        let init = initialize_params();
        let warning = match transport
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": init.protocol_version,
                    "capabilities": init.capabilities,
                    "clientInfo": init.client_info,
                })),
            )
            .await
        {
            Ok(_) => None,
            Err(mcpb_transport::TransportError::Rpc(e)) => {
                Some(format!("initialize handshake returned an error: {e}"))
            }
            Err(other) => return Err(SupervisorError::Transport(other)),
        };
        transport
            .send_notification("notifications/initialized", None)
            .await?;
        let tools_value = transport.send_request("tools/list", None).await?;
        let tools: ToolsListResult = serde_json::from_value(tools_value)
            .map_err(mcpb_transport::TransportError::Json)?;

        *self.transport.write().await = Some(transport);
        Ok((tools.tools, warning))
    }

    /// SIGTERM-then-SIGKILL-after-grace stop. Idempotent: stopping a
    /// provider that isn't running is a no-op.
    pub async fn stop(&self) {
        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            let _ = transport.shutdown(self.settings.stop_grace).await;
        }
        *self.state.write().await = ProviderState::Stopped;
        self.tools.write().await.clear();
        tracing::info!(provider = %self.name, "provider stopped");
    }

    pub async fn is_alive(&self) -> bool {
        match self.transport.read().await.as_ref() {
            Some(transport) => transport.is_alive(),
            None => false,
        }
    }

    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, SupervisorError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(SupervisorError::Transport(
                mcpb_transport::TransportError::ProcessExited,
            ))?;
        let result = transport
            .send_request(
                "tools/call",
                Some(serde_json::json!({ "name": tool_name, "arguments": arguments })),
            )
            .await?;
        Ok(result)
    }

    /// Forwards an arbitrary JSON-RPC method to the provider, for the
    /// generic envelope endpoint. `tools/call` goes through [`Self::call_tool`]
    /// instead, which shapes the params consistently for callers that don't
    /// want to build the envelope themselves.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, SupervisorError> {
        let transport = self
            .transport
            .read()
            .await
            .clone()
            .ok_or(SupervisorError::Transport(
                mcpb_transport::TransportError::ProcessExited,
            ))?;
        Ok(transport.send_request(method, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ProviderSupervisorSettings {
        ProviderSupervisorSettings {
            request_timeout: Duration::from_millis(500),
            stop_grace: Duration::from_millis(500),
            startup_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn new_supervisor_starts_stopped() {
        let sup = ProviderSupervisor::new("test", "cat", vec![], HashMap::new(), settings());
        assert_eq!(sup.state().await, ProviderState::Stopped);
    }

    #[tokio::test]
    async fn starting_a_process_that_cant_speak_json_rpc_fails() {
        // `cat` is alive but never sends a valid `initialize` response, so
        // the handshake request times out and start() reports Failed.
        let sup = ProviderSupervisor::new("test", "cat", vec![], HashMap::new(), settings());
        let result = sup.start().await;
        assert!(result.is_err());
        assert_eq!(sup.state().await, ProviderState::Failed);
        assert!(sup.last_error().await.is_some());
    }

    #[tokio::test]
    async fn starting_a_nonexistent_command_fails() {
        let sup = ProviderSupervisor::new(
            "test",
            "mcpb-this-binary-does-not-exist",
            vec![],
            HashMap::new(),
            settings(),
        );
        assert!(sup.start().await.is_err());
        assert_eq!(sup.state().await, ProviderState::Failed);
    }

    #[tokio::test]
    async fn stop_on_never_started_provider_is_a_no_op() {
        let sup = ProviderSupervisor::new("test", "cat", vec![], HashMap::new(), settings());
        sup.stop().await;
        assert_eq!(sup.state().await, ProviderState::Stopped);
    }
}
