use serde::{Deserialize, Serialize};

/// A single audit record describing one authenticated action taken against
/// the broker: a tool call, a provider lifecycle change, a login.
///
/// Dispatched to the configured audit sink by the gateway's background
/// audit task; always logged via `tracing` regardless of sink
/// availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub principal_id: String,
    pub principal_kind: String,
    /// The JSON-RPC method invoked, e.g. `"tools/call"`.
    pub action: String,
    #[serde(default)]
    pub provider: Option<String>,
    /// The tool name for a `tools/call`, if one was named.
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
    pub outcome: AuditOutcome,
    /// Wall-clock time of the provider round trip, `None` when the call
    /// never reached a provider (e.g. denied before dispatch).
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_roundtrip() {
        let event = AuditEvent {
            id: uuid::Uuid::nil(),
            timestamp: chrono::Utc::now(),
            principal_id: "user-123".into(),
            principal_kind: "idp_user".into(),
            action: "tools/call".into(),
            provider: Some("awp_admin".into()),
            tool: Some("list_vms".into()),
            params: None,
            outcome: AuditOutcome::Success,
            elapsed_ms: Some(42),
            detail: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.principal_id, event.principal_id);
        assert_eq!(back.outcome, AuditOutcome::Success);
    }

    #[test]
    fn outcome_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AuditOutcome::Denied).unwrap(), "\"denied\"");
    }
}
