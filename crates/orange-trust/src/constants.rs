use std::time::Duration;

/// Header carrying the hex HMAC-SHA256 signature of a payment callback.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Namespace prepended to a token's `jti` to form its denylist key.
pub const DEFAULT_DENYLIST_PREFIX: &str = "jwt:blacklist:";

/// Denylist endpoint used when none is configured.
pub const DEFAULT_DENYLIST_ENDPOINT: &str = "redis://127.0.0.1:6379";

/// Upper bound on a single denylist lookup before the gate fails open.
pub const DEFAULT_DENYLIST_TIMEOUT: Duration = Duration::from_millis(500);

/// Minimum interval between two fetches of the authority's key set.
pub const DEFAULT_JWKS_MIN_REFRESH: Duration = Duration::from_secs(15 * 60);

/// Timeout for one key set fetch.
pub const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for one payment callback delivery.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of generated payment reference identifiers.
pub const DEFAULT_REFERENCE_PREFIX: &str = "mock-ref-";

/// Allowed distance, in whole minutes, between a callback's timestamp and the
/// receiver's clock.
pub const CALLBACK_MAX_SKEW_MINUTES: i64 = 5;

/// Shortest callback secret accepted without a startup warning.
pub const MIN_CALLBACK_SECRET_LEN: usize = 32;

/// Key namespace of blocked client addresses.
pub const BLOCKED_IP_PREFIX: &str = "security:blocked:ip:";

/// Key namespace of per-address violation counters.
pub const VIOLATION_COUNT_PREFIX: &str = "security:violations:";

/// Key namespace of addresses flagged as suspicious.
pub const SUSPICIOUS_IP_PREFIX: &str = "security:suspicious:ip:";
