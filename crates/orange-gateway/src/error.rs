use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orange::error::{AuthError, VerifyError};
use std::fmt;

#[derive(Debug)]
pub enum GatewayError {
    /// No bearer token on a protected path
    TokenMissing,
    /// Malformed header or token, or a signature no trusted key verifies
    TokenInvalid(String),
    /// Outside the token's validity window
    TokenExpired(String),
    /// Verified token whose jti is on the denylist
    TokenRevoked,
    /// Verified token lacking the scope a route requires
    InsufficientScope(String),
    /// Client address is on the block list
    IpBlocked { retry_after_secs: u64 },
    /// Request path that could resolve outside its literal prefix
    InvalidPath(String),
    /// Signing keys could not be obtained
    KeysUnavailable(String),
    /// Proxy error
    ProxyError(String),
    /// Internal error
    Internal(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::TokenMissing => write!(f, "bearer token missing"),
            GatewayError::TokenInvalid(msg) => write!(f, "invalid token: {}", msg),
            GatewayError::TokenExpired(msg) => write!(f, "token outside validity window: {}", msg),
            GatewayError::TokenRevoked => write!(f, "token has been revoked"),
            GatewayError::InsufficientScope(scope) => write!(f, "missing required scope {}", scope),
            GatewayError::IpBlocked { retry_after_secs } => {
                write!(f, "client address blocked for {}s", retry_after_secs)
            }
            GatewayError::InvalidPath(msg) => write!(f, "invalid request path: {}", msg),
            GatewayError::KeysUnavailable(msg) => write!(f, "signing keys unavailable: {}", msg),
            GatewayError::ProxyError(msg) => write!(f, "proxy error: {}", msg),
            GatewayError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Token(VerifyError::ExpiredOrNotYetValid(msg)) => {
                GatewayError::TokenExpired(msg)
            }
            AuthError::Token(e) => GatewayError::TokenInvalid(e.to_string()),
            AuthError::KeyMaterial(e) => GatewayError::KeysUnavailable(e.to_string()),
        }
    }
}

impl GatewayError {
    /// Short machine-readable code, also used as a metric label.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::TokenMissing => "token_missing",
            GatewayError::TokenInvalid(_) => "token_invalid",
            GatewayError::TokenExpired(_) => "token_expired",
            GatewayError::TokenRevoked => "token_revoked",
            GatewayError::InsufficientScope(_) => "insufficient_scope",
            GatewayError::IpBlocked { .. } => "ip_blocked",
            GatewayError::InvalidPath(_) => "invalid_path",
            GatewayError::KeysUnavailable(_) | GatewayError::Internal(_) => "internal_error",
            GatewayError::ProxyError(_) => "proxy_error",
        }
    }

    fn unauthorized(&self, message: &str) -> HttpResponse {
        HttpResponse::Unauthorized()
            .insert_header((header::WWW_AUTHENTICATE, "Bearer"))
            .json(serde_json::json!({
                "error": self.code(),
                "message": message
            }))
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::TokenMissing
            | GatewayError::TokenInvalid(_)
            | GatewayError::TokenExpired(_)
            | GatewayError::TokenRevoked => StatusCode::UNAUTHORIZED,
            GatewayError::InsufficientScope(_) | GatewayError::IpBlocked { .. } => {
                StatusCode::FORBIDDEN
            }
            GatewayError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            GatewayError::ProxyError(_) => StatusCode::BAD_GATEWAY,
            GatewayError::KeysUnavailable(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            GatewayError::TokenMissing => self.unauthorized("Bearer token required"),
            GatewayError::TokenInvalid(msg) => {
                tracing::debug!("Rejected token: {}", msg);
                self.unauthorized("Invalid token")
            }
            GatewayError::TokenExpired(msg) => {
                tracing::debug!("Rejected token: {}", msg);
                self.unauthorized("Token has expired or is not yet valid")
            }
            GatewayError::TokenRevoked => self.unauthorized("Token has been revoked"),
            GatewayError::InsufficientScope(scope) => HttpResponse::Forbidden()
                .insert_header((
                    header::WWW_AUTHENTICATE,
                    format!("Bearer error=\"insufficient_scope\", scope=\"{scope}\""),
                ))
                .json(serde_json::json!({
                    "error": self.code(),
                    "message": "Token lacks the scope required for this resource"
                })),
            GatewayError::IpBlocked { retry_after_secs } => HttpResponse::Forbidden()
                .insert_header((header::RETRY_AFTER, retry_after_secs.to_string()))
                .json(serde_json::json!({
                    "error": self.code(),
                    "message": "Your IP address has been temporarily blocked due to suspicious activity",
                    "retry_after_seconds": retry_after_secs
                })),
            GatewayError::InvalidPath(msg) => {
                tracing::warn!("Refusing request path: {}", msg);
                HttpResponse::BadRequest().json(serde_json::json!({
                    "error": self.code(),
                    "message": "Invalid request path"
                }))
            }
            GatewayError::ProxyError(msg) => {
                tracing::error!("Proxy error: {}", msg);
                HttpResponse::BadGateway().json(serde_json::json!({
                    "error": self.code(),
                    "message": "Failed to reach upstream service"
                }))
            }
            GatewayError::KeysUnavailable(msg) | GatewayError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": self.code(),
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
