use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::from_fn, middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orange::ipblock::IpBlocker;
use orange::jwks::{HttpKeySource, KeyCache};
use orange::revocation::{DenylistBackend, InMemoryDenylist, RedisDenylist, RevocationGate};
use orange::token::TokenVerifier;
use orange_gateway::{
    config::{DenylistKind, GatewayConfig},
    metrics::register_metrics,
    middleware::{admission_filter, ip_block_filter},
    routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let rate_limit_rpm = config.rate_limit_rpm;

    tracing::info!("Starting orange-gateway on port {}", port);
    tracing::info!("Upstream: {}", config.upstream_url);
    tracing::info!("Public path prefixes: {:?}", config.public_path_prefixes);
    if !config.scope_rules.is_empty() {
        tracing::info!("Scope rules: {:?}", config.scope_rules);
    }

    // Signing keys must be loaded before any traffic is accepted
    let source = match HttpKeySource::new(config.jwks_url.clone()) {
        Ok(source) => source,
        Err(e) => {
            tracing::error!("Failed to create JWKS client: {}", e);
            std::process::exit(1);
        }
    };
    let keys = KeyCache::new(source, config.jwks_min_refresh);
    if let Err(e) = keys.initialize().await {
        tracing::error!(url = %config.jwks_url, "Failed to fetch signing keys: {}", e);
        std::process::exit(1);
    }
    let verifier = TokenVerifier::new(keys, config.clock_skew);

    let (store, block_store) = match config.denylist_kind {
        DenylistKind::Redis => {
            let store = match RedisDenylist::connect(&config.denylist).await {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!("Failed to connect to denylist store: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = store.ping().await {
                tracing::error!("Denylist store did not answer PING: {}", e);
                std::process::exit(1);
            }
            tracing::info!(
                db = ?config.denylist.revocation_db_index,
                prefix = %config.denylist.key_namespace_prefix,
                "Connected to denylist store"
            );
            (
                DenylistBackend::Redis(store.clone()),
                DenylistBackend::Redis(store),
            )
        }
        DenylistKind::Memory => (
            DenylistBackend::Memory(InMemoryDenylist::new()),
            DenylistBackend::Memory(InMemoryDenylist::new()),
        ),
    };
    let gate = RevocationGate::from_config(store, &config.denylist);
    if !config.ip_block.enabled {
        tracing::warn!("IP blocking disabled");
    }
    let ip_blocker = IpBlocker::new(block_store, config.ip_block.clone());

    register_metrics();

    let state = match AppState::new(config, verifier, gate, ip_blocker) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to create HTTP client: {}", e);
            std::process::exit(1);
        }
    };
    let state_data = web::Data::new(state);

    let governor_conf = match GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm as u64)
        .finish()
    {
        Some(conf) => conf,
        None => {
            tracing::error!("Invalid rate limiter configuration");
            std::process::exit(1);
        }
    };

    HttpServer::new(move || {
        App::new()
            .app_data(state_data.clone())
            .app_data(web::PayloadConfig::new(10 * 1024 * 1024)) // 10MB body limit
            .wrap(from_fn(admission_filter))
            .wrap(Logger::default())
            .wrap(Governor::new(&governor_conf))
            .wrap(from_fn(ip_block_filter))
            .configure(routes::health::configure)
            .default_service(web::to(routes::gateway::forward))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
