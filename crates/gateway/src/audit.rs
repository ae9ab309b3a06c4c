//! Audit event fan-out.
//!
//! Handlers hand events to a bounded channel rather than awaiting the sink
//! themselves, so a slow or unreachable audit intake never adds latency to
//! a tool call. Every event is always logged via `tracing`; the HTTP POST
//! to the configured sink is best-effort and its failures are swallowed.

use mcpb_domain::config::AuditConfig;
use mcpb_domain::AuditEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AuditDispatcher {
    sender: mpsc::Sender<AuditEvent>,
}

impl AuditDispatcher {
    /// Spawns the background task that drains the channel and, if
    /// configured, posts each event to the sink. Returns the dispatcher
    /// handle and the task's `JoinHandle` so the caller can await it during
    /// shutdown after dropping the handle (closing the channel).
    pub fn spawn(config: AuditConfig, http: reqwest::Client) -> (Arc<Self>, tokio::task::JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel(config.queue_capacity);
        let timeout = Duration::from_secs(config.timeout_secs);
        let sink_url = config.sink_url.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                tracing::info!(
                    principal = %event.principal_id,
                    action = %event.action,
                    provider = ?event.provider,
                    outcome = ?event.outcome,
                    "audit"
                );

                let Some(url) = &sink_url else { continue };
                let result = http.post(url).json(&event).timeout(timeout).send().await;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "audit sink delivery failed");
                }
            }
        });

        (Arc::new(Self { sender }), handle)
    }

    /// Enqueues an event for dispatch. Drops the event (and logs a warning)
    /// if the channel is full rather than blocking the caller.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::warn!(error = %e, "audit channel full, dropping event");
        }
    }
}
