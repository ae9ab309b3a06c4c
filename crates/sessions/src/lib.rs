//! Per-user isolated child processes for providers that require user-scoped
//! credentials rather than a single shared service identity.
//!
//! Grounded on the original system's per-user Azure MCP session manager:
//! one child process per `(provider, user)` pair, spawned with the user's
//! access token injected via environment variables, reused across calls
//! until idle too long or found dead, and swept on a timer.

mod fleet;

pub use fleet::{SessionError, SessionInfo, StartOutcome, UserSessionFleet};
