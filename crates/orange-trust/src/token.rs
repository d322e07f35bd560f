//! Bearer token verification against the authority's key set.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. structure: three segments, decodable header and claims
//! 2. signature: some key in the snapshot verifies it
//! 3. time: `exp` present and in the future, `nbf` (if any) in the past,
//!    both widened by the configured clock skew

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, Header, Validation};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{AuthError, VerifyError};
use crate::jwks::{HttpKeySource, KeyCache, KeySource, SigningKeySet};

/// Symmetric algorithms are never accepted: the key set only holds public keys.
const FORBIDDEN_ALGORITHMS: &[Algorithm] = &[Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

/// Claims carried by an Orange Wallet access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub exp: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub nbf: Option<i64>,
    #[serde(
        default,
        deserialize_with = "numeric_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub iat: Option<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// NumericDate: whole or fractional seconds since the epoch, truncated.
fn numeric_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let Some(value) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(secs) = value.as_i64() {
        return Ok(Some(secs));
    }
    match value.as_f64() {
        Some(secs) if secs.is_finite() => Ok(Some(secs.trunc() as i64)),
        _ => Err(D::Error::custom(format!("invalid NumericDate {value}"))),
    }
}

/// A token that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedToken {
    pub claims: Claims,
    pub key_id: Option<String>,
    pub algorithm: Algorithm,
    pub expires_at: DateTime<Utc>,
}

impl VerifiedToken {
    /// The token identifier; an empty `jti` counts as absent.
    pub fn jti(&self) -> Option<&str> {
        self.claims.jti.as_deref().filter(|j| !j.is_empty())
    }

    pub fn subject(&self) -> Option<&str> {
        self.claims.sub.as_deref()
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claims.iss.as_deref()
    }

    /// Granted scopes from the `scope` claim, given either as a space or
    /// comma separated string or as an array of strings.
    pub fn scopes(&self) -> Vec<&str> {
        match self.claims.extra.get("scope") {
            Some(serde_json::Value::String(list)) => list
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::Array(items)) => {
                items.iter().filter_map(serde_json::Value::as_str).collect()
            }
            _ => Vec::new(),
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().contains(&scope)
    }
}

/// Verify `token` against `keys` at the current time.
pub fn verify(
    token: &str,
    keys: &SigningKeySet,
    leeway: Duration,
) -> Result<VerifiedToken, VerifyError> {
    verify_at(token, keys, leeway, Utc::now().timestamp())
}

/// Verify `token` as of the Unix time `now`.
pub fn verify_at(
    token: &str,
    keys: &SigningKeySet,
    leeway: Duration,
    now: i64,
) -> Result<VerifiedToken, VerifyError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| VerifyError::MalformedToken(format!("header: {e}")))?;
    let claims = decode_claims(token)?;

    let key_id = check_signature(token, &header, keys)?;
    let expires_at = check_validity_window(&claims, leeway, now)?;

    Ok(VerifiedToken {
        claims,
        key_id,
        algorithm: header.alg,
        expires_at,
    })
}

fn decode_claims(token: &str) -> Result<Claims, VerifyError> {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(VerifyError::MalformedToken(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| VerifyError::MalformedToken(format!("claims encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::MalformedToken(format!("claims: {e}")))
}

fn check_signature(
    token: &str,
    header: &Header,
    keys: &SigningKeySet,
) -> Result<Option<String>, VerifyError> {
    if FORBIDDEN_ALGORITHMS.contains(&header.alg) {
        tracing::warn!(alg = ?header.alg, "rejecting token signed with symmetric algorithm");
        return Err(VerifyError::BadSignature);
    }

    // Time and audience are checked separately so that their failures are
    // reported as such and not as a bad signature.
    let mut validation = Validation::new(header.alg);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    for key in keys.candidates(header.kid.as_deref(), header.alg) {
        match jsonwebtoken::decode::<serde_json::Value>(token, key.decoding_key(), &validation) {
            Ok(_) => return Ok(key.kid.clone()),
            Err(e) => tracing::trace!(kid = ?key.kid, error = %e, "key did not verify token"),
        }
    }
    Err(VerifyError::BadSignature)
}

fn check_validity_window(
    claims: &Claims,
    leeway: Duration,
    now: i64,
) -> Result<DateTime<Utc>, VerifyError> {
    let skew = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

    let exp = claims
        .exp
        .ok_or_else(|| VerifyError::ExpiredOrNotYetValid("missing exp claim".to_string()))?;
    if now >= exp.saturating_add(skew) {
        return Err(VerifyError::ExpiredOrNotYetValid("token expired".to_string()));
    }
    if let Some(nbf) = claims.nbf {
        if now.saturating_add(skew) < nbf {
            return Err(VerifyError::ExpiredOrNotYetValid(
                "token not yet valid".to_string(),
            ));
        }
    }

    DateTime::from_timestamp(exp, 0)
        .ok_or_else(|| VerifyError::ExpiredOrNotYetValid("exp out of range".to_string()))
}

/// Verifies bearer tokens against a self-refreshing key cache.
pub struct TokenVerifier<S = HttpKeySource> {
    keys: KeyCache<S>,
    leeway: Duration,
}

impl<S: KeySource> TokenVerifier<S> {
    pub fn new(keys: KeyCache<S>, leeway: Duration) -> Self {
        Self { keys, leeway }
    }

    pub fn keys(&self) -> &KeyCache<S> {
        &self.keys
    }

    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Verify `token` with the current key snapshot.
    ///
    /// [`AuthError::KeyMaterial`] means the keys are unavailable, not that the
    /// token is bad.
    pub fn authenticate(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let keys = self.keys.get_keys()?;
        Ok(verify(token, &keys, self.leeway)?)
    }
}
