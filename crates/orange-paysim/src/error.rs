use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use orange::error::{AuthError, CallbackError, VerifyError};

/// Failures surfaced by the `/pay` endpoint.
///
/// Bodies carry a short code and a fixed message; the cause is only logged.
#[derive(Debug, thiserror::Error)]
pub enum PaySimError {
    #[error("bearer token missing")]
    TokenMissing,

    #[error("invalid token: {0}")]
    TokenInvalid(String),

    #[error("token outside validity window: {0}")]
    TokenExpired(String),

    #[error("signing keys unavailable: {0}")]
    KeysUnavailable(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("callback emission failed: {0}")]
    CallbackFailed(#[from] CallbackError),
}

impl From<AuthError> for PaySimError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Token(VerifyError::ExpiredOrNotYetValid(msg)) => {
                PaySimError::TokenExpired(msg)
            }
            AuthError::Token(e) => PaySimError::TokenInvalid(e.to_string()),
            AuthError::KeyMaterial(e) => PaySimError::KeysUnavailable(e.to_string()),
        }
    }
}

impl PaySimError {
    pub fn code(&self) -> &'static str {
        match self {
            PaySimError::TokenMissing => "token_missing",
            PaySimError::TokenInvalid(_) => "token_invalid",
            PaySimError::TokenExpired(_) => "token_expired",
            PaySimError::KeysUnavailable(_) => "internal_error",
            PaySimError::MethodNotAllowed => "method_not_allowed",
            PaySimError::InvalidBody(_) => "invalid_request",
            PaySimError::CallbackFailed(_) => "callback_failed",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            PaySimError::TokenMissing => "Bearer token required",
            PaySimError::TokenInvalid(_) => "Invalid token",
            PaySimError::TokenExpired(_) => "Token has expired or is not yet valid",
            PaySimError::KeysUnavailable(_) => "An internal error occurred",
            PaySimError::MethodNotAllowed => "Only POST is allowed",
            PaySimError::InvalidBody(_) => "Invalid request body",
            PaySimError::CallbackFailed(_) => "Failed to process payment callback",
        }
    }
}

impl ResponseError for PaySimError {
    fn status_code(&self) -> StatusCode {
        match self {
            PaySimError::TokenMissing
            | PaySimError::TokenInvalid(_)
            | PaySimError::TokenExpired(_) => StatusCode::UNAUTHORIZED,
            PaySimError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            PaySimError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            PaySimError::KeysUnavailable(_) | PaySimError::CallbackFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            PaySimError::TokenInvalid(_) | PaySimError::TokenExpired(_) => {
                tracing::debug!("Rejected token: {}", self);
            }
            PaySimError::KeysUnavailable(_) | PaySimError::CallbackFailed(_) => {
                tracing::error!("{}", self);
            }
            _ => {}
        }

        let mut builder = HttpResponse::build(self.status_code());
        match self.status_code() {
            StatusCode::UNAUTHORIZED => {
                builder.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
            }
            StatusCode::METHOD_NOT_ALLOWED => {
                builder.insert_header((header::ALLOW, "POST"));
            }
            _ => {}
        }
        builder.json(serde_json::json!({
            "error": self.code(),
            "message": self.message(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (PaySimError::TokenMissing, 401),
            (PaySimError::TokenInvalid("bad".into()), 401),
            (PaySimError::TokenExpired("old".into()), 401),
            (PaySimError::KeysUnavailable("down".into()), 500),
            (PaySimError::MethodNotAllowed, 405),
            (PaySimError::InvalidBody("eof".into()), 400),
            (
                PaySimError::CallbackFailed(CallbackError::Transport("refused".into())),
                500,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn callback_failure_is_opaque() {
        let err = PaySimError::CallbackFailed(CallbackError::NonSuccessStatus {
            status: 400,
            body: "invalid signature for VA 8808123".into(),
        });
        let resp = err.error_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Failed to process payment callback");
    }

    #[test]
    fn method_not_allowed_advertises_post() {
        let resp = PaySimError::MethodNotAllowed.error_response();
        assert_eq!(resp.headers().get(header::ALLOW).unwrap(), "POST");
    }

    #[test]
    fn expired_maps_separately_from_invalid() {
        let expired = PaySimError::from(AuthError::Token(VerifyError::ExpiredOrNotYetValid(
            "token expired".into(),
        )));
        assert_eq!(expired.code(), "token_expired");
        let forged = PaySimError::from(AuthError::Token(VerifyError::BadSignature));
        assert_eq!(forged.code(), "token_invalid");
    }
}
