//! Provider lifecycle and catalog management.
//!
//! [`supervisor`] owns the state machine for one running child process;
//! [`registry`] owns the catalog of providers (built-in + dynamically
//! added) and the enabled-flag persistence layer on top of it.

pub mod registry;
pub mod supervisor;

pub use registry::{AddServerError, AddServerRequest, ProviderRegistry, ProviderStatus};
pub use supervisor::{ProviderState, ProviderSupervisor, ProviderSupervisorSettings, SupervisorError};
