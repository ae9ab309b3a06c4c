//! `mcpb-gateway config validate|show`.

use mcpb_domain::config::{Config, ConfigSeverity};

/// Validates `config` and prints every issue to stdout. Returns `true`
/// when there are no `Error`-severity issues.
pub fn validate(config: &Config, config_path: &str) -> bool {
    println!("validating {config_path}");
    let issues = config.validate();
    if issues.is_empty() {
        println!("OK: no configuration issues found");
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    let errors = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    let warnings = issues.len() - errors;
    println!("{errors} error(s), {warnings} warning(s)");
    errors == 0
}

/// Dumps the resolved configuration (including defaults) as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to serialize config: {e}"),
    }
}
