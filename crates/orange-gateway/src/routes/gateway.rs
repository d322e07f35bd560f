use std::time::Instant;

use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::GatewayError;
use crate::metrics::{PROXY_LATENCY, PROXY_REQUESTS_TOTAL};
use crate::proxy::proxy_request;
use crate::state::AppState;

/// Query string as forwarded upstream: fragment dropped, control characters
/// refused.
fn sanitize_query(query: &str) -> Result<&str, GatewayError> {
    let query = query.split_once('#').map_or(query, |(before, _)| before);
    if query.contains(['\r', '\n', '\0']) {
        return Err(GatewayError::InvalidPath(
            "query string must not contain control characters".to_string(),
        ));
    }
    Ok(query)
}

/// Reject paths whose meaning could change once a URL parser normalises them.
///
/// Checks the decoded form and returns the original, still-encoded path.
/// Public-path matching runs on this literal path, so anything that could
/// resolve elsewhere (`..` in any form, `\`, which URL parsers read as `/`)
/// is refused rather than rewritten.
pub fn sanitize_path(path: &str) -> Result<&str, GatewayError> {
    let decoded = urlencoding::decode(path)
        .map_err(|_| GatewayError::InvalidPath("invalid URL encoding".to_string()))?;

    if decoded.contains("..") {
        return Err(GatewayError::InvalidPath("path traversal".to_string()));
    }
    if decoded.contains('\\') {
        return Err(GatewayError::InvalidPath("backslash in path".to_string()));
    }

    // `//host` or `user@host` would change the authority of the target URL
    if decoded.starts_with("//") || decoded.contains('@') {
        return Err(GatewayError::InvalidPath(
            "path would change the upstream authority".to_string(),
        ));
    }

    if decoded.chars().any(char::is_control) {
        return Err(GatewayError::InvalidPath("control character in path".to_string()));
    }

    Ok(path)
}

/// Upstream URL for this request: base URL, original path, sanitized query.
///
/// The URL is refused when parsing it yields a path other than the one the
/// admission filter matched against.
pub fn target_url(upstream_base: &str, req: &HttpRequest) -> Result<String, GatewayError> {
    let path = sanitize_path(req.uri().path())?;
    let base_url = url::Url::parse(upstream_base)
        .map_err(|e| GatewayError::Internal(format!("invalid upstream URL: {e}")))?;
    let base_path = base_url.path().trim_end_matches('/');

    let base = format!("{}{}", upstream_base.trim_end_matches('/'), path);
    let target = match req.uri().query() {
        Some(query) => {
            let query = sanitize_query(query)?;
            if query.is_empty() {
                base
            } else {
                format!("{}?{}", base, query)
            }
        }
        None => base,
    };

    let parsed = url::Url::parse(&target)
        .map_err(|e| GatewayError::InvalidPath(format!("invalid target URL: {e}")))?;
    let expected = format!("{base_path}{path}");
    if parsed.path() != expected {
        return Err(GatewayError::InvalidPath(format!(
            "path normalises to {} instead of {}",
            parsed.path(),
            expected
        )));
    }
    Ok(target)
}

/// Default service: forward every admitted request to the upstream.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, GatewayError> {
    let target = target_url(&state.config.upstream_url, &req)?;

    PROXY_REQUESTS_TOTAL.inc();
    let started = Instant::now();
    let response = proxy_request(&state.http_client, &req, &target, body).await;
    PROXY_LATENCY.observe(started.elapsed().as_secs_f64());

    response
}
