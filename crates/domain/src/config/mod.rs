mod audit;
mod auth;
mod kv;
mod observability;
mod policy;
mod providers;
mod server;
mod sessions;

pub use audit::*;
pub use auth::*;
pub use kv::*;
pub use observability::*;
pub use policy::*;
pub use providers::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub kv: KvConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

const DANGEROUS_ENV_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "DYLD_INSERT_LIBRARIES"];

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. A non-empty vec
    /// containing at least one `Error`-severity issue should abort startup;
    /// `Warning`-only issues are logged and startup continues.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // ── Server ──────────────────────────────────────────────────
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        // ── Auth ────────────────────────────────────────────────────
        if self.auth.idp.jwks_url.is_some() != self.auth.idp.issuer.is_some() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.idp".into(),
                message: "jwks_url and issuer must be configured together".into(),
            });
        }
        if self
            .auth
            .idp
            .allowed_algorithms
            .iter()
            .any(|a| a.eq_ignore_ascii_case("none"))
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "auth.idp.allowed_algorithms".into(),
                message: "\"none\" is never an accepted signing algorithm".into(),
            });
        }
        if !self.auth.idp.is_configured() && self.auth.platform_auth_url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "auth".into(),
                message: "neither an IdP nor a platform auth URL is configured; only local admin and HMAC tokens will authenticate".into(),
            });
        }
        if self.auth.admin_groups.is_empty() && !self.auth.idp.is_configured() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "auth.admin_groups".into(),
                message: "no admin groups configured".into(),
            });
        }

        // ── Providers ───────────────────────────────────────────────
        let mut seen_names: HashSet<&str> = HashSet::new();
        for (i, provider) in self.providers.builtins.iter().enumerate() {
            if provider.name.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.builtins[{i}].name"),
                    message: "provider name must not be empty".into(),
                });
            }
            if provider.command.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.builtins[{i}].command"),
                    message: "provider command must not be empty".into(),
                });
            }
            if !provider.name.is_empty() && !seen_names.insert(&provider.name) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("providers.builtins[{i}].name"),
                    message: format!("duplicate provider name \"{}\"", provider.name),
                });
            }
            for key in provider.env.keys() {
                if DANGEROUS_ENV_VARS.contains(&key.as_str()) {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("providers.builtins[{i}].env.{key}"),
                        message: format!("overriding {key} is not permitted for security"),
                    });
                }
            }
        }
        if self.providers.request_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "providers.request_timeout_secs".into(),
                message: "request_timeout_secs must be greater than 0".into(),
            });
        }

        // ── Sessions ────────────────────────────────────────────────
        if self.sessions.max_idle_minutes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.max_idle_minutes".into(),
                message: "max_idle_minutes must be greater than 0".into(),
            });
        }
        if self.sessions.sweep_interval_minutes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.sweep_interval_minutes".into(),
                message: "sweep_interval_minutes must be greater than 0".into(),
            });
        }

        // ── Audit ───────────────────────────────────────────────────
        if self.audit.timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "audit.timeout_secs".into(),
                message: "timeout_secs must be greater than 0".into(),
            });
        }
        if self.audit.sink_url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "audit.sink_url".into(),
                message: "no audit sink configured; events are logged only".into(),
            });
        }

        // ── KV store ────────────────────────────────────────────────
        if self.kv.key_prefix.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "kv.key_prefix".into(),
                message: "key_prefix must not be empty".into(),
            });
        }
        if self.kv.url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "kv.url".into(),
                message: "no KV store configured; enabled-flag and PKCE state will not survive a restart".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        let mut cfg = Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            auth: AuthConfig {
                idp: IdpConfig {
                    jwks_url: Some("https://idp.example.com/jwks".into()),
                    issuer: Some("https://idp.example.com/".into()),
                    ..IdpConfig::default()
                },
                ..AuthConfig::default()
            },
            ..Config::default()
        };
        cfg.auth.admin_groups.insert("mcp-admins".into());
        cfg.audit.sink_url = Some("https://audit.example.com/events".into());
        cfg.kv.url = Some("redis://localhost:6379".into());
        cfg.providers.builtins.push(BuiltinProviderConfig {
            name: "sequential_thinking".into(),
            command: "npx".into(),
            args: vec!["-y".into(), "@modelcontextprotocol/server-sequential-thinking".into()],
            env: HashMap::new(),
            disabled_by: None,
            capabilities: ProviderCapabilities::default(),
        });
        cfg
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_has_no_errors() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issue = find_issue(&cfg.validate(), "server.port").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_host_empty_is_error() {
        let mut cfg = valid_config();
        cfg.server.host = String::new();
        let issue = find_issue(&cfg.validate(), "server.host").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issue = find_issue(&cfg.validate(), "server.cors.allowed_origins").expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn rate_limit_zero_values_are_errors() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 0,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit.requests_per_second").is_some());
        assert!(find_issue(&issues, "server.rate_limit.burst_size").is_some());
    }

    #[test]
    fn jwks_without_issuer_is_error() {
        let mut cfg = valid_config();
        cfg.auth.idp.issuer = None;
        let issue = find_issue(&cfg.validate(), "auth.idp").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn none_algorithm_is_rejected() {
        let mut cfg = valid_config();
        cfg.auth.idp.allowed_algorithms = vec!["none".into()];
        let issue =
            find_issue(&cfg.validate(), "auth.idp.allowed_algorithms").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn no_idp_or_platform_auth_is_warning() {
        let mut cfg = valid_config();
        cfg.auth.idp = IdpConfig::default();
        let issue = find_issue(&cfg.validate(), "auth").expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_provider_names_is_error() {
        let mut cfg = valid_config();
        let dup = cfg.providers.builtins[0].clone();
        cfg.providers.builtins.push(dup);
        let issue = find_issue(&cfg.validate(), "providers.builtins[1].name").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
        assert!(issue.message.contains("duplicate"));
    }

    #[test]
    fn dangerous_env_var_is_error() {
        let mut cfg = valid_config();
        cfg.providers.builtins[0]
            .env
            .insert("LD_PRELOAD".into(), "/evil.so".into());
        let issue = find_issue(&cfg.validate(), "providers.builtins[0].env.LD_PRELOAD")
            .expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn sessions_zero_idle_minutes_is_error() {
        let mut cfg = valid_config();
        cfg.sessions.max_idle_minutes = 0;
        let issue = find_issue(&cfg.validate(), "sessions.max_idle_minutes").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn no_audit_sink_is_warning() {
        let mut cfg = valid_config();
        cfg.audit.sink_url = None;
        let issue = find_issue(&cfg.validate(), "audit.sink_url").expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn no_kv_url_is_warning() {
        let mut cfg = valid_config();
        cfg.kv.url = None;
        let issue = find_issue(&cfg.validate(), "kv.url").expect("expected warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn empty_kv_key_prefix_is_error() {
        let mut cfg = valid_config();
        cfg.kv.key_prefix = String::new();
        let issue = find_issue(&cfg.validate(), "kv.key_prefix").expect("expected error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(format!("{err}"), "[ERROR] server.port: port must be greater than 0");
    }
}
