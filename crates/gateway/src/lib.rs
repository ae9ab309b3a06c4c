//! HTTP façade for the MCP tool-provider broker: request router, principal
//! extraction, audit fan-out, and the CLI entry points that `main.rs` wires
//! together.

pub mod api;
pub mod audit;
pub mod cli;
pub mod error;
pub mod principal;
pub mod state;

pub use error::ApiError;
pub use state::AppState;
