use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// User session fleet configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// A per-user session is considered stale after this many idle minutes.
    #[serde(default = "d_max_idle_minutes")]
    pub max_idle_minutes: u64,

    /// How often the background sweeper scans for stale or dead sessions.
    #[serde(default = "d_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_idle_minutes: d_max_idle_minutes(),
            sweep_interval_minutes: d_sweep_interval_minutes(),
        }
    }
}

fn d_max_idle_minutes() -> u64 {
    60
}

fn d_sweep_interval_minutes() -> u64 {
    15
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_idle_is_sixty_minutes() {
        assert_eq!(SessionsConfig::default().max_idle_minutes, 60);
    }

    #[test]
    fn default_sweep_interval_is_fifteen_minutes() {
        assert_eq!(SessionsConfig::default().sweep_interval_minutes, 15);
    }
}
