use std::time::Instant;

use actix_web::http::{header, Method};
use actix_web::{get, web, HttpRequest, HttpResponse};
use orange::callback::PaymentEvent;
use orange::security::constant_time_eq;

use crate::error::PaySimError;
use crate::metrics;
use crate::state::AppState;

/// Token from `Authorization: Bearer <token>`.
fn bearer_token(req: &HttpRequest) -> Result<&str, PaySimError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or(PaySimError::TokenMissing)?
        .to_str()
        .map_err(|_| PaySimError::TokenInvalid("non-ASCII Authorization header".to_string()))?;
    let token = value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            PaySimError::TokenInvalid("Authorization header must be 'Bearer <token>'".to_string())
        })?;
    Ok(token)
}

/// `/pay`, any method. The caller is authenticated before anything else, so
/// an unauthenticated GET is a 401 rather than a 405.
pub async fn pay(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, PaySimError> {
    let token = bearer_token(&req)?;
    let verified = state.verifier.authenticate(token)?;

    if req.method() != Method::POST {
        return Err(PaySimError::MethodNotAllowed);
    }

    let event: PaymentEvent = serde_json::from_slice(&body).map_err(|e| {
        metrics::PAYMENTS.with_label_values(&["invalid"]).inc();
        PaySimError::InvalidBody(e.to_string())
    })?;
    if event.va_number.trim().is_empty() {
        metrics::PAYMENTS.with_label_values(&["invalid"]).inc();
        return Err(PaySimError::InvalidBody("va_number is required".to_string()));
    }

    tracing::info!(
        va_number = %event.va_number,
        amount = %event.amount,
        sub = verified.subject().unwrap_or("-"),
        "payment requested"
    );

    let start = Instant::now();
    match state.emitter.emit(&event, token).await {
        Ok(receipt) => {
            metrics::PAYMENTS.with_label_values(&["success"]).inc();
            metrics::CALLBACK_LATENCY
                .with_label_values(&["success"])
                .observe(start.elapsed().as_secs_f64());
            tracing::info!(
                reference = %receipt.payment_reference,
                status = receipt.status,
                "callback delivered"
            );
            Ok(HttpResponse::Ok().content_type("text/plain; charset=utf-8").body(format!(
                "Payment accepted. Callback delivered with reference {}.\n",
                receipt.payment_reference
            )))
        }
        Err(e) => {
            metrics::PAYMENTS.with_label_values(&["callback_failed"]).inc();
            metrics::CALLBACK_LATENCY
                .with_label_values(&["error"])
                .observe(start.elapsed().as_secs_f64());
            Err(PaySimError::CallbackFailed(e))
        }
    }
}

#[get("/health")]
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    match state.verifier.keys().current() {
        Some(keys) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "orange-paysim",
            "signing_keys": keys.len(),
            "callback_url": state.emitter.url(),
        })),
        None => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "degraded",
            "service": "orange-paysim",
            "error": "signing keys not loaded",
        })),
    }
}

#[get("/metrics")]
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    if let Some(token) = &state.config.metrics_token {
        let authorized = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| constant_time_eq(t.as_bytes(), token.as_bytes()))
            .unwrap_or(false);

        if !authorized {
            return HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "unauthorized",
                "message": "Valid Bearer token required for /metrics"
            }));
        }
    }
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::metrics_output())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/pay").route(web::route().to(pay)))
        .service(health)
        .service(metrics_endpoint);
}
