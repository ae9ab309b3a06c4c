//! Shared types for the MCP tool-provider broker: configuration, the
//! crate-wide error type, and the audit event schema.
//!
//! Kept dependency-light on purpose — no Tokio, no Axum, no HTTP client —
//! so every other crate in the workspace can depend on it without pulling
//! in transport or web-framework machinery transitively.

pub mod audit;
pub mod config;
pub mod error;
pub mod kv;

pub use audit::{AuditEvent, AuditOutcome};
pub use error::{Error, Result, StatusClass};
pub use kv::{InMemoryKvStore, KvStore};
