//! Child-process stdio transport for a single Tool Provider.
//!
//! Unlike a design that serializes one request/response cycle at a time
//! behind a single lock, this transport runs a dedicated background task
//! that owns the child's stdout and demultiplexes responses by JSON-RPC id
//! into a Pending Request Table. Callers of [`StdioTransport::send_request`]
//! only ever hold the stdin lock for the duration of a single write+flush,
//! so many requests can be in flight over one stdio stream at once.

use crate::protocol::{JsonRpcId, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex as AsyncMutex};

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("process exited")]
    ProcessExited,
    #[error("request timed out")]
    Timeout,
    #[error("unsupported")]
    Unsupported,
    #[error(transparent)]
    Rpc(#[from] crate::protocol::JsonRpcError),
}

/// A transport that can carry JSON-RPC requests/notifications to and from
/// one Tool Provider process. Implemented by [`StdioTransport`]; kept as a
/// trait so the provider supervisor and registry stay agnostic to the wire.
#[async_trait]
pub trait McpTransport: Send + Sync {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError>;

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;

    /// Send SIGTERM, wait up to `grace` for the child to exit, then SIGKILL it.
    async fn shutdown(&self, grace: Duration) -> Result<(), TransportError>;
}

type PendingTable = Arc<SyncMutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

pub struct StdioTransport {
    stdin: AsyncMutex<ChildStdin>,
    child: AsyncMutex<Child>,
    pending: PendingTable,
    next_id: AtomicI64,
    alive: Arc<AtomicBool>,
    request_timeout: Duration,
    provider_name: String,
}

impl StdioTransport {
    /// Spawn `command` with `args`/`env` and start the background reader
    /// tasks. The child's stdin/stdout/stderr are all piped.
    pub fn spawn(
        provider_name: impl Into<String>,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let provider_name = provider_name.into();
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let pending: PendingTable = Arc::new(SyncMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        spawn_reader_task(provider_name.clone(), stdout, pending.clone(), alive.clone());
        spawn_stderr_task(provider_name.clone(), stderr);

        Ok(Self {
            stdin: AsyncMutex::new(stdin),
            child: AsyncMutex::new(child),
            pending,
            next_id: AtomicI64::new(1),
            alive,
            request_timeout,
            provider_name,
        })
    }

    /// The child process's OS pid, for introspection endpoints. `None` once
    /// the child has been reaped.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.id()
    }

    async fn write_line(&self, line: &str) -> Result<(), TransportError> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

fn spawn_reader_task(
    provider_name: String,
    stdout: tokio::process::ChildStdout,
    pending: PendingTable,
    alive: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                        Ok(response) => {
                            let key = response.id.as_key();
                            let sender = pending.lock().remove(&key);
                            match sender {
                                Some(tx) => {
                                    let _ = tx.send(response);
                                }
                                None => {
                                    tracing::warn!(
                                        provider = %provider_name,
                                        id = %key,
                                        "provider response for unknown or already-resolved request id"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            tracing::debug!(
                                provider = %provider_name,
                                error = %e,
                                line = %trimmed,
                                "skipping non-JSON-RPC line on provider stdout"
                            );
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!(provider = %provider_name, "provider stdout closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(provider = %provider_name, error = %e, "error reading provider stdout");
                    break;
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
        // Any request still waiting loses its sender here and the
        // corresponding `send_request` call observes a closed channel.
        pending.lock().clear();
    });
}

fn spawn_stderr_task(provider_name: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(provider = %provider_name, stderr = %line, "provider stderr");
        }
    });
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, TransportError> {
        if !self.is_alive() {
            return Err(TransportError::ProcessExited);
        }

        let id = JsonRpcId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let key = id.as_key();
        let (tx, rx) = oneshot::channel();

        // Insert before writing: the reader task may observe the response
        // before `write_line` below even returns.
        self.pending.lock().insert(key.clone(), tx);

        let request = JsonRpcRequest::new(id, method, params);
        let line = serde_json::to_string(&request)?;
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().remove(&key);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response.into_result().map_err(TransportError::Rpc),
            Ok(Err(_canceled)) => Err(TransportError::ProcessExited),
            Err(_elapsed) => {
                self.pending.lock().remove(&key);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), TransportError> {
        let notification = JsonRpcNotification::new(method, params);
        let line = serde_json::to_string(&notification)?;
        self.write_line(&line).await
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self, grace: Duration) -> Result<(), TransportError> {
        self.alive.store(false, Ordering::SeqCst);
        {
            let mut stdin = self.stdin.lock().await;
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                tracing::debug!(provider = %self.provider_name, error = %e, "SIGTERM failed, process likely already exited");
            }
        }
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            tracing::warn!(provider = %self.provider_name, "provider did not exit after SIGTERM, sending SIGKILL");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration as TokioDuration;

    /// Spawns `cat`, which echoes each stdin line back on stdout — not a
    /// real JSON-RPC responder, but enough to exercise the pending-table
    /// wiring against a real child process without a throwaway test binary.
    fn echo_transport(timeout: TokioDuration) -> StdioTransport {
        StdioTransport::spawn("echo-test", "cat", &[], &HashMap::new(), timeout)
            .expect("failed to spawn `cat` for transport test")
    }

    #[tokio::test]
    async fn notification_does_not_wait_for_a_response() {
        let transport = echo_transport(Duration::from_millis(500));
        transport
            .send_notification("notifications/initialized", None)
            .await
            .expect("notification write should succeed");
    }

    #[tokio::test]
    async fn request_times_out_against_a_non_responder() {
        // `cat` echoes the request back, but it won't be a well-formed
        // JSON-RPC *response* carrying our id, so the pending entry is
        // never resolved and the call should time out.
        let transport = echo_transport(Duration::from_millis(200));
        let result = transport.send_request("tools/list", None).await;
        assert!(matches!(result, Err(TransportError::Timeout) | Err(TransportError::Json(_))));
    }

    #[tokio::test]
    async fn is_alive_true_immediately_after_spawn() {
        let transport = echo_transport(Duration::from_millis(200));
        assert!(transport.is_alive());
    }

    #[tokio::test]
    async fn shutdown_marks_transport_dead() {
        let transport = echo_transport(Duration::from_millis(200));
        transport
            .shutdown(Duration::from_secs(5))
            .await
            .expect("shutdown should succeed");
        assert!(!transport.is_alive());
    }

    #[test]
    fn pending_table_keys_on_canonical_id_string() {
        let pending: PendingTable = Arc::new(SyncMutex::new(HashMap::new()));
        let (tx, _rx) = oneshot::channel();
        pending.lock().insert(JsonRpcId::Number(5).as_key(), tx);
        assert!(pending.lock().contains_key(&JsonRpcId::String("5".into()).as_key()));
    }
}
