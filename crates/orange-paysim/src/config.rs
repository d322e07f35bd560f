use std::env;
use std::time::Duration;

use orange::constants::{
    DEFAULT_CALLBACK_TIMEOUT, DEFAULT_JWKS_MIN_REFRESH, DEFAULT_REFERENCE_PREFIX,
    MIN_CALLBACK_SECRET_LEN,
};
use url::Url;

const DEFAULT_PORT: u16 = 8090;

#[derive(Clone)]
pub struct PaySimConfig {
    pub port: u16,
    pub jwks_url: String,
    pub jwks_min_refresh: Duration,
    pub clock_skew: Duration,
    /// Receiver of the signed top-up callback
    pub callback_url: String,
    /// Shared HMAC secret; never logged
    pub callback_secret: String,
    pub callback_timeout: Duration,
    pub reference_prefix: String,
    /// Bearer token required for /metrics (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for PaySimConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaySimConfig")
            .field("port", &self.port)
            .field("jwks_url", &self.jwks_url)
            .field("jwks_min_refresh", &self.jwks_min_refresh)
            .field("clock_skew", &self.clock_skew)
            .field("callback_url", &self.callback_url)
            .field("callback_secret", &"[REDACTED]")
            .field("callback_timeout", &self.callback_timeout)
            .field("reference_prefix", &self.reference_prefix)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl PaySimConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwks_url = var("JWKS_URL").ok_or(ConfigError::MissingRequired("JWKS_URL"))?;
        Url::parse(&jwks_url).map_err(|_| ConfigError::InvalidUrl(jwks_url.clone()))?;

        let callback_url =
            var("CALLBACK_URL").ok_or(ConfigError::MissingRequired("CALLBACK_URL"))?;
        Url::parse(&callback_url).map_err(|_| ConfigError::InvalidUrl(callback_url.clone()))?;

        let callback_secret =
            var("CALLBACK_SECRET").ok_or(ConfigError::MissingRequired("CALLBACK_SECRET"))?;
        if callback_secret.len() < MIN_CALLBACK_SECRET_LEN {
            tracing::warn!(
                "CALLBACK_SECRET is shorter than {} bytes; use a longer random secret in production",
                MIN_CALLBACK_SECRET_LEN
            );
        }

        let port = parse_or("PORT", var("PORT"), DEFAULT_PORT)?;
        let jwks_min_refresh = Duration::from_secs(parse_or(
            "JWKS_MIN_REFRESH_SECS",
            var("JWKS_MIN_REFRESH_SECS"),
            DEFAULT_JWKS_MIN_REFRESH.as_secs(),
        )?);
        let clock_skew = Duration::from_secs(parse_or(
            "JWT_CLOCK_SKEW_SECS",
            var("JWT_CLOCK_SKEW_SECS"),
            0,
        )?);
        let callback_timeout = Duration::from_secs(parse_or(
            "CALLBACK_TIMEOUT_SECS",
            var("CALLBACK_TIMEOUT_SECS"),
            DEFAULT_CALLBACK_TIMEOUT.as_secs(),
        )?);
        if callback_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "CALLBACK_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        let reference_prefix =
            var("REFERENCE_PREFIX").unwrap_or_else(|| DEFAULT_REFERENCE_PREFIX.to_string());
        let metrics_token = var("METRICS_TOKEN");

        Ok(Self {
            port,
            jwks_url,
            jwks_min_refresh,
            clock_skew,
            callback_url,
            callback_secret,
            callback_timeout,
            reference_prefix,
            metrics_token,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("JWKS_URL", "http://auth:9000/oauth2/jwks"),
            ("CALLBACK_URL", "http://transactions:8084/api/v1/topup/callback/bni"),
            ("CALLBACK_SECRET", SECRET),
        ]
    }

    #[test]
    fn defaults_apply() {
        let config = PaySimConfig::from_lookup(lookup(&required())).unwrap();
        assert_eq!(config.port, 8090);
        assert_eq!(config.jwks_min_refresh, Duration::from_secs(900));
        assert_eq!(config.clock_skew, Duration::ZERO);
        assert_eq!(config.callback_timeout, Duration::from_secs(10));
        assert_eq!(config.reference_prefix, "mock-ref-");
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn each_required_variable_is_enforced() {
        for missing in ["JWKS_URL", "CALLBACK_URL", "CALLBACK_SECRET"] {
            let pairs: Vec<_> = required().into_iter().filter(|(k, _)| *k != missing).collect();
            match PaySimConfig::from_lookup(lookup(&pairs)) {
                Err(ConfigError::MissingRequired(key)) => assert_eq!(key, missing),
                other => panic!("expected MissingRequired({missing}), got {other:?}"),
            }
        }
    }

    #[test]
    fn blank_secret_counts_as_missing() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "CALLBACK_SECRET");
        pairs.push(("CALLBACK_SECRET", "   "));
        assert!(matches!(
            PaySimConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::MissingRequired("CALLBACK_SECRET"))
        ));
    }

    #[test]
    fn short_secret_is_accepted() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "CALLBACK_SECRET");
        pairs.push(("CALLBACK_SECRET", "secret-key-for-dev"));
        let config = PaySimConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.callback_secret, "secret-key-for-dev");
    }

    #[test]
    fn invalid_callback_url_is_rejected() {
        let mut pairs = required();
        pairs.retain(|(k, _)| *k != "CALLBACK_URL");
        pairs.push(("CALLBACK_URL", "not a url"));
        assert!(matches!(
            PaySimConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn zero_callback_timeout_is_rejected() {
        let mut pairs = required();
        pairs.push(("CALLBACK_TIMEOUT_SECS", "0"));
        assert!(matches!(
            PaySimConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::InvalidValue { key: "CALLBACK_TIMEOUT_SECS", .. })
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut pairs = required();
        pairs.push(("METRICS_TOKEN", "metrics-secret"));
        let config = PaySimConfig::from_lookup(lookup(&pairs)).unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains(SECRET));
        assert!(!rendered.contains("metrics-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
