use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, HttpRequest, HttpResponse};
use orange::security::constant_time_eq;
use prometheus::{Encoder, TextEncoder};

use crate::metrics::REGISTRY;
use crate::state::AppState;

/// GET /health. Degraded (503) until the signing keys are loaded.
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let Some(keys) = state.verifier.keys().current() else {
        return HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "degraded",
            "service": "orange-gateway",
            "signing_keys": 0,
        }));
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "orange-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "signing_keys": keys.len(),
        "keys_loaded_at": keys.loaded_at().to_rfc3339(),
        "keys_min_refresh_secs": state.verifier.keys().min_refresh_interval().as_secs(),
    }))
}

fn metrics_authorized(req: &HttpRequest, expected: &str) -> bool {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|presented| constant_time_eq(presented.as_bytes(), expected.as_bytes()))
}

/// GET /metrics, guarded by `METRICS_TOKEN` when one is configured.
pub async fn metrics(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(expected) = state.config.metrics_token.as_deref() {
        if !metrics_authorized(&req, expected) {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics));
}
