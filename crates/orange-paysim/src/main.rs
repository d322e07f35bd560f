use actix_web::{middleware::Logger, web, App, HttpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orange::emitter::{validate_callback_url, CallbackEmitter};
use orange::jwks::{HttpKeySource, KeyCache};
use orange::token::TokenVerifier;
use orange_paysim::{config::PaySimConfig, routes, state::AppState};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match PaySimConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;

    tracing::info!("Starting orange-paysim on port {}", port);
    validate_callback_url(&config.callback_url);

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

    let emitter = match CallbackEmitter::new(
        config.callback_url.clone(),
        config.callback_secret.as_bytes(),
    ) {
        Ok(emitter) => emitter
            .with_timeout(config.callback_timeout)
            .with_reference_prefix(config.reference_prefix.clone()),
        Err(e) => {
            tracing::error!("Failed to create callback client: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(url = %config.callback_url, "Callback receiver configured");

    let state = web::Data::new(AppState::new(config, verifier, emitter));

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
