/// Shared error type used across the broker's crates.
///
/// Every variant maps to exactly one HTTP status via [`Error::status_code`]
/// so handlers never need their own status-mapping logic.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    /// No credential was presented at all.
    #[error("authentication required: {0}")]
    AuthMissing(String),

    /// A credential was presented but failed verification (bad signature,
    /// unknown key id, malformed token, key lookup failure).
    #[error("invalid credential: {0}")]
    AuthInvalid(String),

    /// The credential verified but is no longer valid.
    #[error("token expired: {0}")]
    TokenExpired(String),

    /// The principal is known but not permitted to perform the action.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A request was well-formed JSON-RPC but failed request-shape checks.
    #[error("validation failed: {0}")]
    ValidationError(String),

    /// No provider is registered under the given name.
    #[error("unknown provider: {0}")]
    ProviderUnknown(String),

    /// The provider is registered but not currently running.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider returned a JSON-RPC error response.
    #[error("provider {provider} error: {message}")]
    ProviderError { provider: String, message: String },

    /// The provider's child process exited unexpectedly.
    #[error("provider {0} died")]
    ProviderDied(String),

    /// On-behalf-of token exchange with the identity provider failed.
    #[error("OBO exchange failed: {0}")]
    OboExchangeFailed(String),

    /// An outbound dependency (platform API, IdP, audit sink) timed out.
    #[error("dependency timeout: {0}")]
    DependencyTimeout(String),

    #[error("config: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

/// HTTP status classes an [`Error`] can map to. Kept distinct from a
/// specific web framework's status type so this crate has no HTTP
/// dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    UnprocessableEntity,
    ServiceUnavailable,
    GatewayTimeout,
    BadGateway,
    InternalServerError,
}

impl Error {
    /// Central error-kind to HTTP status mapping. Handlers should call this
    /// rather than matching on variants themselves.
    pub fn status_class(&self) -> StatusClass {
        match self {
            Error::AuthMissing(_) => StatusClass::Unauthorized,
            Error::AuthInvalid(_) => StatusClass::Unauthorized,
            Error::TokenExpired(_) => StatusClass::Unauthorized,
            Error::AccessDenied(_) => StatusClass::Forbidden,
            Error::ValidationError(_) => StatusClass::BadRequest,
            Error::ProviderUnknown(_) => StatusClass::NotFound,
            Error::ProviderUnavailable(_) => StatusClass::ServiceUnavailable,
            Error::ProviderError { .. } => StatusClass::UnprocessableEntity,
            Error::ProviderDied(_) => StatusClass::InternalServerError,
            Error::OboExchangeFailed(_) => StatusClass::InternalServerError,
            Error::DependencyTimeout(_) => StatusClass::GatewayTimeout,
            Error::Config(_) => StatusClass::InternalServerError,
            Error::Io(_) | Error::Json(_) | Error::Http(_) | Error::Internal(_) | Error::Other(_) => {
                StatusClass::InternalServerError
            }
        }
    }

    /// A stable machine-readable error kind, used as the `error.kind` field
    /// in audit events and JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::AuthMissing(_) => "auth_missing",
            Error::AuthInvalid(_) => "auth_invalid",
            Error::TokenExpired(_) => "token_expired",
            Error::AccessDenied(_) => "access_denied",
            Error::ValidationError(_) => "validation_error",
            Error::ProviderUnknown(_) => "provider_unknown",
            Error::ProviderUnavailable(_) => "provider_unavailable",
            Error::ProviderError { .. } => "provider_error",
            Error::ProviderDied(_) => "provider_died",
            Error::OboExchangeFailed(_) => "obo_exchange_failed",
            Error::DependencyTimeout(_) => "dependency_timeout",
            Error::Config(_) => "config",
            Error::Internal(_) => "internal",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_missing_maps_to_unauthorized() {
        assert_eq!(
            Error::AuthMissing("no header".into()).status_class(),
            StatusClass::Unauthorized
        );
    }

    #[test]
    fn access_denied_maps_to_forbidden() {
        assert_eq!(
            Error::AccessDenied("not in group".into()).status_class(),
            StatusClass::Forbidden
        );
    }

    #[test]
    fn provider_unknown_maps_to_not_found() {
        assert_eq!(
            Error::ProviderUnknown("ghost".into()).status_class(),
            StatusClass::NotFound
        );
    }

    #[test]
    fn provider_unavailable_maps_to_service_unavailable() {
        assert_eq!(
            Error::ProviderUnavailable("alpha".into()).status_class(),
            StatusClass::ServiceUnavailable
        );
    }

    #[test]
    fn provider_died_maps_to_internal_server_error() {
        assert_eq!(
            Error::ProviderDied("awp_admin".into()).status_class(),
            StatusClass::InternalServerError
        );
    }

    #[test]
    fn dependency_timeout_maps_to_gateway_timeout() {
        assert_eq!(
            Error::DependencyTimeout("platform /auth/me".into()).status_class(),
            StatusClass::GatewayTimeout
        );
    }

    #[test]
    fn kind_is_stable_string() {
        assert_eq!(Error::AuthMissing("x".into()).kind(), "auth_missing");
        assert_eq!(
            Error::ProviderError {
                provider: "p".into(),
                message: "m".into()
            }
            .kind(),
            "provider_error"
        );
    }
}
