use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit dispatcher configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Endpoint the audit dispatcher posts events to. When `None`, events
    /// are only emitted through structured logging.
    #[serde(default)]
    pub sink_url: Option<String>,

    #[serde(default = "d_timeout_secs")]
    pub timeout_secs: u64,

    /// Bounded channel capacity between request handlers and the
    /// background dispatcher task. Events are dropped (and logged) if the
    /// channel is full rather than blocking the request path.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink_url: None,
            timeout_secs: d_timeout_secs(),
            queue_capacity: d_queue_capacity(),
        }
    }
}

fn d_timeout_secs() -> u64 {
    5
}

fn d_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sink_is_none() {
        assert!(AuditConfig::default().sink_url.is_none());
    }

    #[test]
    fn default_queue_capacity_is_1024() {
        assert_eq!(AuditConfig::default().queue_capacity, 1024);
    }
}
