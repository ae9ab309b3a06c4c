use std::sync::Arc;
use std::time::Instant;

use mcpb_auth::{AuthPipeline, OboExchanger, PkceLoginFlow, PolicyEngine};
use mcpb_domain::config::Config;
use mcpb_domain::KvStore;
use mcpb_providers::ProviderRegistry;
use mcpb_sessions::UserSessionFleet;

use crate::audit::AuditDispatcher;

/// Shared application state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub kv: Arc<dyn KvStore>,
    pub providers: Arc<ProviderRegistry>,
    pub sessions: Arc<UserSessionFleet>,
    pub auth: Arc<AuthPipeline>,
    pub policy: Arc<PolicyEngine>,
    pub obo: Arc<OboExchanger>,
    /// `None` unless the IdP client credentials needed for browser login
    /// are fully configured.
    pub pkce: Option<Arc<PkceLoginFlow>>,
    pub audit: Arc<AuditDispatcher>,
    pub http_client: reqwest::Client,
    pub started_at: Instant,
}
