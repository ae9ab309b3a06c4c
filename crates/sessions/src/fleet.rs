//! The [`UserSessionFleet`] itself.

use chrono::{DateTime, Utc};
use mcpb_transport::{initialize_params, McpTransport, McpToolDef, StdioTransport};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("no provider registered for per-user isolation: {0}")]
    UnknownProvider(String),
    #[error("no active session for user {0}")]
    NoSession(String),
    #[error("session process for user {0} is not running")]
    Dead(String),
    #[error("transport: {0}")]
    Transport(#[from] mcpb_transport::TransportError),
}

/// Spawn parameters for one per-user-isolated provider. `env` is merged
/// under the per-user credential variables, never overriding them.
#[derive(Debug, Clone)]
pub struct ProviderSpawnSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

struct Session {
    user_id: String,
    email: String,
    transport: Arc<StdioTransport>,
    created_at: DateTime<Utc>,
    last_accessed_at: RwLock<DateTime<Utc>>,
    tools: Vec<McpToolDef>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub provider: String,
    pub user_id: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub is_alive: bool,
    pub tool_count: usize,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub status: &'static str, // "existing" | "created"
    pub user_id: String,
    pub email: String,
    pub tools: Vec<McpToolDef>,
    pub created_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

/// Owns every per-user session, across every provider flagged
/// `per_user_isolated`, keyed by `(provider, user_id)`.
pub struct UserSessionFleet {
    providers: HashMap<String, ProviderSpawnSpec>,
    sessions: RwLock<HashMap<(String, String), Arc<Session>>>,
    request_timeout: Duration,
    stop_grace: Duration,
    startup_delay: Duration,
    max_idle: chrono::Duration,
}

impl UserSessionFleet {
    pub fn new(
        providers: HashMap<String, ProviderSpawnSpec>,
        request_timeout: Duration,
        stop_grace: Duration,
        startup_delay: Duration,
        max_idle_minutes: i64,
    ) -> Self {
        Self {
            providers,
            sessions: RwLock::new(HashMap::new()),
            request_timeout,
            stop_grace,
            startup_delay,
            max_idle: chrono::Duration::minutes(max_idle_minutes),
        }
    }

    fn key(provider: &str, user_id: &str) -> (String, String) {
        (provider.to_string(), user_id.to_string())
    }

    /// Reuse-or-create semantics mirroring `UserSessionManager.start_user_session`:
    /// an existing live session is touched and returned as `"existing"`; a
    /// dead one is torn down and replaced; otherwise a fresh child is
    /// spawned with the user's credentials injected into its environment.
    pub async fn start(
        &self,
        provider: &str,
        user_id: &str,
        email: &str,
        access_token: &str,
    ) -> Result<StartOutcome, SessionError> {
        let key = Self::key(provider, user_id);

        if let Some(existing) = self.sessions.read().await.get(&key).cloned() {
            if existing.transport.is_alive() {
                *existing.last_accessed_at.write().await = Utc::now();
                tracing::info!(provider = %provider, user_id = %user_id, "reusing existing user session");
                return Ok(StartOutcome {
                    status: "existing",
                    user_id: user_id.to_string(),
                    email: email.to_string(),
                    tools: existing.tools.clone(),
                    created_at: existing.created_at,
                    pid: existing.transport.pid().await,
                });
            }
            tracing::warn!(provider = %provider, user_id = %user_id, "found dead session, cleaning up");
            self.stop(provider, user_id).await;
        }

        let spec = self
            .providers
            .get(provider)
            .ok_or_else(|| SessionError::UnknownProvider(provider.to_string()))?;

        let mut env = spec.env.clone();
        env.insert("USER_ACCESS_TOKEN".into(), access_token.to_string());
        env.insert("USER_ID".into(), user_id.to_string());
        env.insert("USER_EMAIL".into(), email.to_string());

        tracing::info!(provider = %provider, user_id = %user_id, email = %email, "starting new user session");
        let transport = Arc::new(StdioTransport::spawn(
            format!("{provider}:{user_id}"),
            &spec.command,
            &spec.args,
            &env,
            self.request_timeout,
        )?);

        tokio::time::sleep(self.startup_delay).await;
        if !transport.is_alive() {
            return Err(SessionError::Dead(user_id.to_string()));
        }

        let init = initialize_params();
        transport
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": init.protocol_version,
                    "capabilities": init.capabilities,
                    "clientInfo": init.client_info,
                })),
            )
            .await?;
        transport.send_notification("notifications/initialized", None).await?;

        let tools_value = transport.send_request("tools/list", None).await?;
        let tools: Vec<McpToolDef> = serde_json::from_value::<mcpb_transport::ToolsListResult>(tools_value)
            .map(|r| r.tools)
            .unwrap_or_default();
        tracing::info!(provider = %provider, user_id = %user_id, tool_count = tools.len(), "user session ready");

        let now = Utc::now();
        let pid = transport.pid().await;
        let session = Arc::new(Session {
            user_id: user_id.to_string(),
            email: email.to_string(),
            transport,
            created_at: now,
            last_accessed_at: RwLock::new(now),
            tools: tools.clone(),
        });

        self.sessions.write().await.insert(key, session);

        Ok(StartOutcome {
            status: "created",
            user_id: user_id.to_string(),
            email: email.to_string(),
            tools,
            created_at: now,
            pid,
        })
    }

    pub async fn stop(&self, provider: &str, user_id: &str) -> bool {
        let key = Self::key(provider, user_id);
        match self.sessions.write().await.remove(&key) {
            Some(session) => {
                session.transport.shutdown(self.stop_grace).await.ok();
                tracing::info!(provider = %provider, user_id = %user_id, "user session stopped");
                true
            }
            None => false,
        }
    }

    pub async fn call_tool(
        &self,
        provider: &str,
        user_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, SessionError> {
        let key = Self::key(provider, user_id);
        let session = self
            .sessions
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| SessionError::NoSession(user_id.to_string()))?;

        if !session.transport.is_alive() {
            return Err(SessionError::Dead(user_id.to_string()));
        }
        *session.last_accessed_at.write().await = Utc::now();

        let result = session
            .transport
            .send_request(
                "tools/call",
                Some(serde_json::json!({ "name": tool_name, "arguments": arguments })),
            )
            .await?;
        Ok(result)
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for ((provider, _user), session) in sessions.iter() {
            out.push(SessionInfo {
                provider: provider.clone(),
                user_id: session.user_id.clone(),
                email: session.email.clone(),
                created_at: session.created_at,
                last_accessed_at: *session.last_accessed_at.read().await,
                is_alive: session.transport.is_alive(),
                tool_count: session.tools.len(),
                pid: session.transport.pid().await,
            });
        }
        out
    }

    /// Evicts sessions idle longer than `max_idle` or whose process has
    /// died. Safe to race against a concurrent `start`/`stop` for the same
    /// user: both paths go through the same locked removal.
    pub async fn sweep(&self) {
        let stale: Vec<(String, String)> = {
            let sessions = self.sessions.read().await;
            let mut stale = Vec::new();
            for (key, session) in sessions.iter() {
                let idle = Utc::now() - *session.last_accessed_at.read().await;
                if idle > self.max_idle || !session.transport.is_alive() {
                    stale.push(key.clone());
                }
            }
            stale
        };

        for (provider, user_id) in &stale {
            self.stop(provider, user_id).await;
        }
        if !stale.is_empty() {
            tracing::info!(count = stale.len(), "swept idle/dead user sessions");
        }
    }

    /// Spawns the periodic sweeper task. Returns the `JoinHandle` so the
    /// caller can abort it at shutdown.
    pub fn spawn_sweeper(self: Arc<Self>, interval_minutes: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
            loop {
                interval.tick().await;
                self.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet_with_cat() -> UserSessionFleet {
        let mut providers = HashMap::new();
        providers.insert(
            "azure".to_string(),
            ProviderSpawnSpec {
                command: "cat".into(),
                args: vec![],
                env: HashMap::new(),
            },
        );
        UserSessionFleet::new(
            providers,
            Duration::from_millis(200),
            Duration::from_millis(200),
            Duration::from_millis(10),
            60,
        )
    }

    #[tokio::test]
    async fn starting_session_for_unknown_provider_errors() {
        let fleet = fleet_with_cat();
        let result = fleet.start("nope", "alice", "alice@example.com", "tok").await;
        assert!(matches!(result, Err(SessionError::UnknownProvider(_))));
    }

    #[tokio::test]
    async fn starting_against_cat_fails_the_handshake() {
        // `cat` is alive but won't speak JSON-RPC, so the initialize
        // handshake request times out.
        let fleet = fleet_with_cat();
        let result = fleet.start("azure", "alice", "alice@example.com", "tok").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stopping_a_session_that_never_existed_returns_false() {
        let fleet = fleet_with_cat();
        assert!(!fleet.stop("azure", "nobody").await);
    }

    #[tokio::test]
    async fn list_sessions_is_empty_when_nothing_started() {
        let fleet = fleet_with_cat();
        assert!(fleet.list_sessions().await.is_empty());
    }
}
