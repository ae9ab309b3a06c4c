use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use mcpb_auth::{AuthPipeline, HttpPlatformAuthClient, JwksCache, OboExchanger, PkceLoginFlow, PlatformAuthClient, PolicyEngine};
use mcpb_domain::config::{Config, ConfigSeverity};
use mcpb_domain::{InMemoryKvStore, KvStore};
use mcpb_gateway::audit::AuditDispatcher;
use mcpb_gateway::cli::{Cli, Command, ConfigCommand};
use mcpb_gateway::state::AppState;
use mcpb_gateway::{api, cli};
use mcpb_providers::ProviderRegistry;
use mcpb_sessions::{ProviderSpawnSpec, UserSessionFleet};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            let valid = cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("mcpb-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mcpb_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("mcp-broker starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    let http = reqwest::Client::builder()
        .build()
        .context("building the shared HTTP client")?;

    // ── Key-value store ──────────────────────────────────────────────
    // `config.kv.url` is reserved for a future networked backend; today
    // every deployment runs the in-process store, which is sufficient for
    // enabled-flags, PKCE state, and session records within one broker
    // instance.
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    if config.kv.url.is_some() {
        tracing::warn!("kv.url is set but only the in-memory key-value store is supported; ignoring");
    }

    // ── Provider catalog ─────────────────────────────────────────────
    let providers = Arc::new(ProviderRegistry::from_config(&config.providers, kv.clone()).await);
    providers.start_all_enabled().await;
    tracing::info!(count = config.providers.builtins.len(), "provider catalog ready");

    // ── Per-user isolated session fleet ──────────────────────────────
    let isolated_specs: HashMap<String, ProviderSpawnSpec> = config
        .providers
        .builtins
        .iter()
        .filter(|b| b.capabilities.per_user_isolated)
        .map(|b| {
            (
                b.name.clone(),
                ProviderSpawnSpec { command: b.command.clone(), args: b.args.clone(), env: b.env.clone() },
            )
        })
        .collect();
    let sessions = Arc::new(UserSessionFleet::new(
        isolated_specs,
        Duration::from_secs(config.providers.request_timeout_secs),
        Duration::from_secs(config.providers.stop_grace_secs),
        Duration::from_millis(config.providers.startup_delay_ms),
        config.sessions.max_idle_minutes,
    ));
    let sweeper = sessions.clone().spawn_sweeper(config.sessions.sweep_interval_minutes);
    tracing::info!("user session fleet ready");

    // ── Auth pipeline ─────────────────────────────────────────────────
    let admin_token = std::env::var(&config.auth.admin_token_env).ok();
    if admin_token.is_none() {
        tracing::warn!(env_var = %config.auth.admin_token_env, "no local admin token configured");
    }
    let hmac_secret = std::env::var(&config.auth.hmac_secret_env).ok().map(String::into_bytes);

    let mut internal_keys = HashMap::new();
    for key in &config.auth.internal_service_keys {
        match std::env::var(&key.env) {
            Ok(value) if !value.is_empty() => {
                internal_keys.insert(value, key.name.clone());
            }
            _ => tracing::warn!(service = %key.name, env_var = %key.env, "internal service key not set"),
        }
    }

    let platform_client: Option<Arc<dyn PlatformAuthClient>> = config
        .auth
        .platform_auth_url
        .clone()
        .map(|url| Arc::new(HttpPlatformAuthClient::new(url, http.clone())) as Arc<dyn PlatformAuthClient>);

    let jwks = config
        .auth
        .idp
        .jwks_url
        .clone()
        .map(|url| JwksCache::shared(url, Duration::from_secs(config.auth.idp.jwks_cache_ttl_secs)));

    let auth = Arc::new(AuthPipeline::new(
        config.auth.clone(),
        admin_token,
        hmac_secret,
        internal_keys,
        platform_client,
        jwks,
    ));
    let policy = Arc::new(PolicyEngine::new(config.policy.clone(), http.clone()));

    let client_secret = config.auth.idp.client_secret_env.clone().and_then(|var| std::env::var(var).ok());
    let obo = Arc::new(OboExchanger::new(config.auth.idp.clone(), client_secret.clone(), http.clone()));

    let pkce = if config.auth.idp.pkce_configured() {
        tracing::info!("PKCE login flow configured");
        Some(Arc::new(PkceLoginFlow::new(config.auth.idp.clone(), client_secret, http.clone(), kv.clone())))
    } else {
        tracing::info!("PKCE login flow not configured, /auth/login and /auth/callback disabled");
        None
    };

    // ── Audit dispatcher ──────────────────────────────────────────────
    let (audit, audit_handle) = AuditDispatcher::spawn(config.audit.clone(), http.clone());

    let state = AppState {
        config: config.clone(),
        kv,
        providers: providers.clone(),
        sessions: sessions.clone(),
        auth,
        policy,
        obo,
        pkce,
        audit,
        http_client: http,
        started_at: Instant::now(),
    };

    // ── CORS ──────────────────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);

    // ── Concurrency limit ────────────────────────────────────────────
    let max_concurrent = std::env::var("MCPB_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(256);
    tracing::info!(max_concurrent, "concurrency limit set");

    // ── Per-IP rate limit ────────────────────────────────────────────
    let governor_layer = config.server.rate_limit.as_ref().map(|rl| {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .expect("rate_limit: requests_per_second and burst_size must be > 0");

        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        GovernorLayer { config: Arc::new(gov_config) }
    });
    if governor_layer.is_none() {
        tracing::info!("per-IP rate limiting disabled (no [server.rate_limit] in config)");
    }

    // ── Router ────────────────────────────────────────────────────────
    let router = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent));
    let app = if let Some(gov) = governor_layer {
        router.layer(gov).with_state(state.clone())
    } else {
        router.with_state(state.clone())
    };

    // ── Bind ──────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "mcp-broker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    tracing::info!("shutting down: stopping session fleet and provider children");
    sweeper.abort();
    for session in sessions.list_sessions().await {
        sessions.stop(&session.provider, &session.user_id).await;
    }
    providers.stop_all().await;
    drop(audit_handle);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment
/// (e.g. `http://localhost:*`). These are expanded into a predicate that
/// matches any port on that host. A literal `"*"` allows all origins (not
/// recommended for production).
fn build_cors_layer(cors: &mcpb_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            wildcard_prefixes.push(origin.trim_end_matches('*').to_owned());
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
