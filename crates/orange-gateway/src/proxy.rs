//! Reverse proxy from the gateway to the upstream wallet services.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};

use crate::error::GatewayError;

/// Request headers that describe the client hop and must not be replayed
/// upstream. `authorization` is forwarded; upstream services authorize on the
/// same bearer token.
const HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// Upstream response headers the client is allowed to see.
const PASSTHROUGH_RESPONSE_HEADERS: &[&str] = &[
    "content-type",
    "content-encoding",
    "content-disposition",
    "cache-control",
    "etag",
    "last-modified",
    "location",
    "date",
    "vary",
    "x-request-id",
];

pub const MAX_UPSTREAM_BODY: usize = 10 * 1024 * 1024;

fn is_hop_header(name: &str) -> bool {
    HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_passthrough(name: &str) -> bool {
    PASSTHROUGH_RESPONSE_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
}

fn build_upstream_request(
    client: &reqwest::Client,
    req: &HttpRequest,
    target_url: &str,
    body: Bytes,
) -> Result<reqwest::RequestBuilder, GatewayError> {
    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| GatewayError::ProxyError(format!("unsupported method {}", req.method())))?;

    let mut upstream = client.request(method, target_url);
    for (name, value) in req.headers().iter() {
        if is_hop_header(name.as_str()) {
            continue;
        }
        upstream = upstream.header(name.as_str(), value.as_bytes());
    }

    if let Some(peer) = req.peer_addr() {
        upstream = upstream.header("X-Forwarded-For", peer.ip().to_string());
    }
    upstream = upstream.header("X-Forwarded-Proto", req.connection_info().scheme());

    if !body.is_empty() {
        upstream = upstream.body(body);
    }
    Ok(upstream)
}

/// Drain the upstream body, refusing anything over [`MAX_UPSTREAM_BODY`].
async fn read_capped(mut response: reqwest::Response) -> Result<Bytes, GatewayError> {
    if response
        .content_length()
        .is_some_and(|len| len > MAX_UPSTREAM_BODY as u64)
    {
        return Err(GatewayError::ProxyError("upstream body exceeds limit".to_string()));
    }

    let mut buf = BytesMut::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| GatewayError::ProxyError(format!("reading upstream body: {e}")))?
    {
        if buf.len() + chunk.len() > MAX_UPSTREAM_BODY {
            return Err(GatewayError::ProxyError("upstream body exceeds limit".to_string()));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Forward `req` to `target_url` and relay the upstream answer.
pub async fn proxy_request(
    client: &reqwest::Client,
    req: &HttpRequest,
    target_url: &str,
    body: Bytes,
) -> Result<HttpResponse, GatewayError> {
    let response = build_upstream_request(client, req, target_url, body)?
        .send()
        .await
        .map_err(|e| GatewayError::ProxyError(format!("upstream unreachable: {e}")))?;

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = response.headers().clone();
    let payload = read_capped(response).await?;

    let mut relay = HttpResponse::build(status);
    for (name, value) in headers.iter().filter(|(n, _)| is_passthrough(n.as_str())) {
        if let Ok(value) = value.to_str() {
            relay.insert_header((name.as_str(), value));
        }
    }
    Ok(relay.body(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_survives_hop_filtering() {
        assert!(!is_hop_header("Authorization"));
        assert!(is_hop_header("Host"));
        assert!(is_hop_header("proxy-authorization"));
        assert!(!is_hop_header("content-type"));
    }

    #[test]
    fn upstream_identity_headers_are_dropped() {
        assert!(is_passthrough("Content-Type"));
        assert!(!is_passthrough("server"));
        assert!(!is_passthrough("x-powered-by"));
        assert!(!is_passthrough("set-cookie"));
    }
}
