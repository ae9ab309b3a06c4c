//! Principal classification, on-behalf-of credential exchange, access
//! policy, and PKCE login for the broker's HTTP surface.
//!
//! [`pipeline`] walks the ordered credential-classification chain and
//! produces a [`principal::Principal`]; [`policy`] decides whether that
//! principal may reach a given provider; [`obo`] trades the caller's token
//! for a downstream-scoped one when a provider needs to act as the user
//! rather than as the broker; [`pkce`] drives the browser-based login flow
//! for callers that don't already hold a platform-issued credential.

pub mod jwks;
pub mod obo;
pub mod pipeline;
pub mod pkce;
pub mod policy;
pub mod principal;

pub use jwks::{JwksCache, JwksError};
pub use obo::{OboExchanger, OBO_META_KEY};
pub use pipeline::{AuthPipeline, HttpPlatformAuthClient, PlatformAuthClient, PlatformIdentity};
pub use pkce::{AuthorizationRequest, PkceLoginFlow, SessionRecord};
pub use policy::PolicyEngine;
pub use principal::{resolve_claims, Principal, PrincipalKind};
