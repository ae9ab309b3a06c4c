pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// mcp-broker — a centralized proxy fronting JSON-RPC stdio Tool Providers.
#[derive(Debug, Parser)]
#[command(name = "mcpb-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the broker (default when no subcommand is given).
    Serve,
    /// Validate the resolved configuration and exit non-zero on error.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Loads configuration from the path named by `MCPB_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`Config`] and the path
/// that was used.
pub fn load_config() -> anyhow::Result<(mcpb_domain::config::Config, String)> {
    let config_path = std::env::var("MCPB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        mcpb_domain::config::Config::default()
    };

    Ok((config, config_path))
}
