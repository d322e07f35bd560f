//! Request filters applied before a route or the upstream proxy runs.
//!
//! [`ip_block_filter`] wraps everything, rate limiter included, so that it
//! sees the limiter's refusals. [`admission_filter`] does bearer
//! authentication, the revocation gate and route scopes.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{HeaderMap, AUTHORIZATION};
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::{web, HttpMessage};
use orange::admission::{admit, Admission};
use orange::ipblock::{IpDecision, ViolationOutcome};
use orange::token::{TokenVerifier, VerifiedToken};

use crate::error::GatewayError;
use crate::metrics::{ADMISSIONS_TOTAL, AUTH_FAILURES_TOTAL, IP_BLOCKED_TOTAL, IP_VIOLATIONS_TOTAL};
use crate::routes::gateway::sanitize_path;
use crate::state::AppState;

/// Gateway-owned endpoints that never require a token.
const ALWAYS_PUBLIC: &[&str] = &["/health", "/metrics"];

/// Extract the token from `Authorization: Bearer <token>`.
///
/// No header at all is `Ok(None)`; a header in any other shape is an error.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, GatewayError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| GatewayError::TokenInvalid("non-ASCII Authorization header".to_string()))?;
    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| GatewayError::TokenInvalid("malformed Authorization header".to_string()))?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GatewayError::TokenInvalid(format!(
            "unsupported authorization scheme: {scheme}"
        )));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(GatewayError::TokenInvalid("empty bearer token".to_string()));
    }
    Ok(Some(token))
}

/// Verify the request's bearer token.
pub fn authenticate(
    headers: &HeaderMap,
    verifier: &TokenVerifier,
) -> Result<VerifiedToken, GatewayError> {
    let token = bearer_token(headers)?.ok_or(GatewayError::TokenMissing)?;
    Ok(verifier.authenticate(token)?)
}

/// A path under a scope rule is never public.
pub fn is_public(state: &AppState, path: &str) -> bool {
    ALWAYS_PUBLIC.contains(&path)
        || (state.config.is_public_path(path) && state.config.required_scope(path).is_none())
}

/// Admission filter: authenticate protected paths, consult the revocation
/// gate, then enforce the route's scope. Verified claims are stored in the
/// request extensions for downstream handlers.
pub async fn admission_filter<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return Ok(reject(
            req,
            GatewayError::Internal("application state not configured".to_string()),
        ));
    };

    // Prefix rules below match the literal path.
    let path = match sanitize_path(req.path()).map(str::to_owned) {
        Ok(path) => path,
        Err(e) => {
            AUTH_FAILURES_TOTAL.with_label_values(&[e.code()]).inc();
            return Ok(reject(req, e));
        }
    };

    let claims = if is_public(&state, &path) {
        None
    } else {
        match authenticate(req.headers(), &state.verifier) {
            Ok(token) => Some(token),
            Err(e) => {
                AUTH_FAILURES_TOTAL.with_label_values(&[e.code()]).inc();
                return Ok(reject(req, e));
            }
        }
    };

    match admit(claims.as_ref(), &state.gate).await {
        Admission::Reject(revoked) => {
            ADMISSIONS_TOTAL.with_label_values(&["rejected"]).inc();
            tracing::info!(
                jti = %revoked.jti,
                path = %path,
                "Refusing request with revoked token"
            );
            return Ok(reject(req, GatewayError::TokenRevoked));
        }
        Admission::PassThrough => {
            ADMISSIONS_TOTAL.with_label_values(&["pass_through"]).inc();
        }
        Admission::PassThroughAfterCheck => {
            ADMISSIONS_TOTAL.with_label_values(&["checked"]).inc();
        }
    }

    if let Some(scope) = state.config.required_scope(&path) {
        if !claims.as_ref().is_some_and(|token| token.has_scope(scope)) {
            tracing::warn!(
                path = %path,
                required = scope,
                granted = ?claims.as_ref().map(VerifiedToken::scopes),
                "Token lacks required scope"
            );
            let err = GatewayError::InsufficientScope(scope.to_string());
            AUTH_FAILURES_TOTAL.with_label_values(&[err.code()]).inc();
            return Ok(reject(req, err));
        }
    }

    if let Some(token) = claims {
        req.extensions_mut().insert(token);
    }
    Ok(next.call(req).await?.map_into_left_body())
}

/// Client address: the first `X-Forwarded-For` entry when the deployment
/// trusts it, otherwise the socket peer.
pub fn client_ip(req: &ServiceRequest, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        if let Some(ip) = forwarded {
            return Some(ip.to_string());
        }
    }
    req.peer_addr().map(|addr| addr.ip().to_string())
}

/// Refuse blocked client addresses and count rate limit refusals against
/// the client.
pub async fn ip_block_filter<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let Some(state) = req.app_data::<web::Data<AppState>>().cloned() else {
        return Ok(reject(
            req,
            GatewayError::Internal("application state not configured".to_string()),
        ));
    };
    let Some(ip) = client_ip(&req, state.config.trust_forwarded_for) else {
        return Ok(next.call(req).await?.map_into_left_body());
    };

    if let IpDecision::Blocked { retry_after } = state.ip_blocker.check(&ip).await {
        IP_BLOCKED_TOTAL.inc();
        return Ok(reject(
            req,
            GatewayError::IpBlocked {
                retry_after_secs: retry_after.as_secs().max(1),
            },
        ));
    }

    // The rate limiter may answer with an error rather than a response.
    let result = next.call(req).await;
    let status = match &result {
        Ok(res) => res.status(),
        Err(e) => e.as_response_error().status_code(),
    };
    if status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(ip = %ip, "Rate limit violation");
        record_violation(&state, &ip).await;
    }
    Ok(result?.map_into_left_body())
}

async fn record_violation(state: &AppState, ip: &str) {
    let outcome = match state.ip_blocker.record_violation(ip).await {
        Ok(ViolationOutcome::Ignored) => "ignored",
        Ok(ViolationOutcome::Counted(_)) => "counted",
        Ok(ViolationOutcome::Suspicious(_)) => "suspicious",
        Ok(ViolationOutcome::Blocked(_)) => "blocked",
        Err(e) => {
            tracing::error!(ip, error = %e, "Failed to record violation");
            "error"
        }
    };
    IP_VIOLATIONS_TOTAL.with_label_values(&[outcome]).inc();
}

fn reject<B>(req: ServiceRequest, err: GatewayError) -> ServiceResponse<EitherBody<B>> {
    req.error_response(err).map_into_right_body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        map
    }

    #[test]
    fn absent_header_is_none() {
        assert!(matches!(bearer_token(&HeaderMap::new()), Ok(None)));
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let map = headers("bearer abc.def.ghi");
        assert_eq!(bearer_token(&map).unwrap(), Some("abc.def.ghi"));
    }

    #[test]
    fn forwarded_for_is_used_only_when_trusted() {
        let req = actix_web::test::TestRequest::get()
            .peer_addr("198.51.100.9:4000".parse().unwrap())
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.0.0.1"))
            .to_srv_request();

        assert_eq!(client_ip(&req, true).as_deref(), Some("203.0.113.7"));
        assert_eq!(client_ip(&req, false).as_deref(), Some("198.51.100.9"));
    }

    #[test]
    fn other_schemes_are_invalid() {
        for value in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer    ", "token"] {
            assert!(
                matches!(bearer_token(&headers(value)), Err(GatewayError::TokenInvalid(_))),
                "{value:?}"
            );
        }
    }
}
