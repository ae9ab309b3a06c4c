//! Maps the shared [`mcpb_domain::Error`] to an HTTP response in one place,
//! so handlers return `Result<_, ApiError>` and never match status codes
//! themselves.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mcpb_domain::error::StatusClass;
use mcpb_domain::Error;
use mcpb_transport::TransportError;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl From<mcpb_providers::AddServerError> for ApiError {
    fn from(e: mcpb_providers::AddServerError) -> Self {
        use mcpb_providers::AddServerError as E;
        let inner = match e {
            E::AlreadyExists(name) => Error::ValidationError(format!("server '{name}' already exists")),
            E::Unknown(name) => Error::ProviderUnknown(name),
            other => Error::ValidationError(other.to_string()),
        };
        ApiError(inner)
    }
}

impl From<mcpb_sessions::SessionError> for ApiError {
    fn from(e: mcpb_sessions::SessionError) -> Self {
        use mcpb_sessions::SessionError as E;
        match e {
            E::UnknownProvider(p) => ApiError(Error::ProviderUnknown(p)),
            E::NoSession(u) => ApiError(Error::ValidationError(format!("no active session for user {u}"))),
            E::Dead(u) => ApiError(Error::ProviderDied(u)),
            E::Transport(t) => transport_error_to_api("", t),
        }
    }
}

/// Maps a transport-level failure to an HTTP-error `ApiError`, distinguishing
/// the three distinct outcomes spec §7 calls for: a dead child is a
/// `ProviderDied` (500), a call that never got an answer in time is a
/// `DependencyTimeout` (504), and anything below the JSON-RPC layer itself
/// (an `io`/`json`/unsupported-operation failure) is an internal error.
/// `TransportError::Rpc` — a JSON-RPC error the provider itself returned —
/// is handled separately by [`ProviderCallOutcome`], not here: it isn't an
/// HTTP error at all, but a 200 response carrying the error envelope.
fn transport_error_to_api(provider: &str, e: TransportError) -> ApiError {
    match e {
        TransportError::Rpc(rpc) => ApiError(Error::ProviderError {
            provider: provider.to_string(),
            message: rpc.to_string(),
        }),
        TransportError::Timeout => {
            ApiError(Error::DependencyTimeout(format!("provider {provider} did not respond in time")))
        }
        TransportError::ProcessExited => ApiError(Error::ProviderDied(provider.to_string())),
        TransportError::Io(io) => {
            ApiError(Error::Internal(format!("provider {provider} transport io error: {io}")))
        }
        TransportError::Json(j) => {
            ApiError(Error::Internal(format!("provider {provider} transport json error: {j}")))
        }
        TransportError::Unsupported => {
            ApiError(Error::Internal(format!("provider {provider} transport operation unsupported")))
        }
    }
}

/// Outcome of a call that reached a provider: either the value the provider
/// returned, or the JSON-RPC error object it returned instead. Per spec §7,
/// the latter is passed through to the caller as part of a 200 response
/// (original request id preserved by the caller), never thrown as an HTTP
/// error — only a failure to even reach the provider (dead child, timeout,
/// transport-level error) becomes an `ApiError`.
pub enum ProviderCallOutcome {
    Value(serde_json::Value),
    RpcError(serde_json::Value),
}

impl ProviderCallOutcome {
    pub fn from_supervisor_result(
        provider: &str,
        result: Result<serde_json::Value, mcpb_providers::SupervisorError>,
    ) -> Result<Self, ApiError> {
        use mcpb_providers::SupervisorError as E;
        match result {
            Ok(v) => Ok(Self::Value(v)),
            Err(E::Transport(t)) => Self::from_transport(provider, t),
            Err(e @ E::AlreadyActive) => Err(ApiError(Error::Internal(e.to_string()))),
        }
    }

    pub fn from_session_result(
        provider: &str,
        result: Result<serde_json::Value, mcpb_sessions::SessionError>,
    ) -> Result<Self, ApiError> {
        use mcpb_sessions::SessionError as E;
        match result {
            Ok(v) => Ok(Self::Value(v)),
            Err(E::Transport(t)) => Self::from_transport(provider, t),
            Err(e) => Err(ApiError::from(e)),
        }
    }

    fn from_transport(provider: &str, e: TransportError) -> Result<Self, ApiError> {
        match e {
            TransportError::Rpc(rpc) => Ok(Self::RpcError(
                serde_json::to_value(&rpc).unwrap_or_else(|_| {
                    serde_json::json!({ "code": rpc.code, "message": rpc.message })
                }),
            )),
            other => Err(transport_error_to_api(provider, other)),
        }
    }
}

fn status_code(class: StatusClass) -> StatusCode {
    match class {
        StatusClass::BadRequest => StatusCode::BAD_REQUEST,
        StatusClass::Unauthorized => StatusCode::UNAUTHORIZED,
        StatusClass::Forbidden => StatusCode::FORBIDDEN,
        StatusClass::NotFound => StatusCode::NOT_FOUND,
        StatusClass::Conflict => StatusCode::CONFLICT,
        StatusClass::UnprocessableEntity => StatusCode::UNPROCESSABLE_ENTITY,
        StatusClass::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        StatusClass::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        StatusClass::BadGateway => StatusCode::BAD_GATEWAY,
        StatusClass::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(self.0.status_class());
        let body = Json(serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        }));
        (status, body).into_response()
    }
}
