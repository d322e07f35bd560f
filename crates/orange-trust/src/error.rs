use thiserror::Error;

/// Why a presented bearer token was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// Not three dot-separated segments, undecodable header or claims,
    /// or an unsupported algorithm.
    #[error("malformed token: {0}")]
    MalformedToken(String),

    /// No key in the current key set verifies the signature.
    #[error("token signature does not verify against any trusted key")]
    BadSignature,

    #[error("token is expired or not yet valid: {0}")]
    ExpiredOrNotYetValid(String),
}

/// Failure to obtain the authority's signing keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("key set request failed: {0}")]
    Transport(String),

    #[error("key set endpoint returned status {0}")]
    Status(u16),

    #[error("key set response is not a valid JWK set: {0}")]
    Decode(String),

    #[error("key set contains no usable signing keys")]
    NoUsableKeys,

    #[error("key set has not been loaded")]
    NotInitialized,
}

/// Either half of authenticating a request can fail: the token itself or
/// the key material needed to judge it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error(transparent)]
    Token(#[from] VerifyError),

    #[error(transparent)]
    KeyMaterial(#[from] FetchError),
}

/// Infrastructure failure talking to the revocation store.
///
/// Kept apart from [`VerifyError`] and [`TokenRevoked`] so that callers can
/// never confuse "store unreachable" with "token rejected".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("denylist connection failed: {0}")]
    Connection(String),

    #[error("denylist lookup timed out")]
    Timeout,

    #[error("denylist backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// The token's `jti` is present in the denylist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token has been revoked")]
pub struct TokenRevoked {
    pub jti: String,
}

/// Failure emitting a payment callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("cannot build callback payload: {0}")]
    Build(String),

    #[error("callback delivery failed: {0}")]
    Transport(String),

    #[error("callback receiver returned status {status}: {body}")]
    NonSuccessStatus { status: u16, body: String },
}

/// Why a receiver refused an incoming callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackRejection {
    #[error("missing signature header")]
    MissingSignature,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
