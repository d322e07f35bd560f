//! Signing keys of the token authority and the cache that keeps them fresh.
//!
//! The authority publishes a JWK set. [`KeyCache`] fetches it once at startup
//! (a failure there is fatal for the caller) and afterwards refreshes it in the
//! background at most once per configured interval. A failed refresh keeps the
//! previous set in service; readers always see one complete set, never a mix
//! of old and new keys.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};

use crate::constants::JWKS_FETCH_TIMEOUT;
use crate::error::FetchError;

/// Where the key set comes from.
pub trait KeySource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<JwkSet, FetchError>> + Send;
}

/// Fetches the key set from the authority's JWKS endpoint.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(JWKS_FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, FetchError> {
        let resp = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        resp.json::<JwkSet>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

/// One public key usable for signature verification.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: Option<String>,
    /// Algorithm the key is published for, when the JWK declares one.
    pub algorithm: Option<Algorithm>,
    key: DecodingKey,
}

impl VerificationKey {
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    fn accepts(&self, kid: Option<&str>, alg: Algorithm) -> bool {
        if self.algorithm.is_some_and(|declared| declared != alg) {
            return false;
        }
        match (self.kid.as_deref(), kid) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => true,
        }
    }
}

impl std::fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// An immutable snapshot of the authority's public keys.
#[derive(Debug, Clone)]
pub struct SigningKeySet {
    keys: Vec<VerificationKey>,
    loaded_at: DateTime<Utc>,
}

impl SigningKeySet {
    /// Build a snapshot from a fetched JWK set.
    ///
    /// Symmetric (`oct`) keys and keys that cannot be turned into a decoding
    /// key are skipped. A set left with no usable key is an error so that a
    /// broken publication never replaces a working snapshot.
    pub fn from_jwks(set: &JwkSet) -> Result<Self, FetchError> {
        let keys: Vec<VerificationKey> = set.keys.iter().filter_map(convert_jwk).collect();
        if keys.is_empty() {
            return Err(FetchError::NoUsableKeys);
        }
        Ok(Self {
            keys,
            loaded_at: Utc::now(),
        })
    }

    /// Keys that may have produced a token with the given header `kid` and `alg`.
    ///
    /// `kid` is matched only when both the token and the key carry one.
    pub fn candidates<'a>(
        &'a self,
        kid: Option<&'a str>,
        alg: Algorithm,
    ) -> impl Iterator<Item = &'a VerificationKey> + 'a {
        self.keys.iter().filter(move |k| k.accepts(kid, alg))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().filter_map(|k| k.kid.as_deref()).collect()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

fn convert_jwk(jwk: &Jwk) -> Option<VerificationKey> {
    let kid = jwk.common.key_id.clone();
    if matches!(jwk.algorithm, AlgorithmParameters::OctetKey(_)) {
        tracing::warn!(kid = ?kid, "ignoring symmetric key in published key set");
        return None;
    }
    match DecodingKey::from_jwk(jwk) {
        Ok(key) => Some(VerificationKey {
            kid,
            algorithm: jwk.common.key_algorithm.as_ref().and_then(signing_algorithm),
            key,
        }),
        Err(e) => {
            tracing::warn!(kid = ?kid, error = %e, "ignoring unusable key in published key set");
            None
        }
    }
}

fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Shared, self-refreshing holder of the current [`SigningKeySet`].
///
/// Cloning is cheap; all clones share one snapshot.
pub struct KeyCache<S = HttpKeySource> {
    inner: Arc<CacheInner<S>>,
}

struct CacheInner<S> {
    source: S,
    min_refresh: Duration,
    current: RwLock<Option<Arc<SigningKeySet>>>,
    last_attempt: Mutex<Option<Instant>>,
    refreshing: AtomicBool,
}

impl<S> Clone for KeyCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: KeySource> KeyCache<S> {
    /// An empty cache. Call [`KeyCache::initialize`] before serving traffic.
    pub fn new(source: S, min_refresh: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                min_refresh,
                current: RwLock::new(None),
                last_attempt: Mutex::new(None),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// A cache seeded with an already loaded snapshot. The next refresh is
    /// due one full interval from now.
    pub fn with_keys(source: S, min_refresh: Duration, keys: SigningKeySet) -> Self {
        let cache = Self::new(source, min_refresh);
        cache.install(Arc::new(keys));
        cache.mark_attempt();
        cache
    }

    /// Synchronous first fetch. Callers treat an error as fatal.
    pub async fn initialize(&self) -> Result<Arc<SigningKeySet>, FetchError> {
        let keys = self.refresh().await?;
        tracing::info!(
            keys = keys.len(),
            kids = ?keys.key_ids(),
            "Loaded signing key set"
        );
        Ok(keys)
    }

    /// Current snapshot. Schedules a background refresh when one is due.
    pub fn get_keys(&self) -> Result<Arc<SigningKeySet>, FetchError> {
        let keys = self.current().ok_or(FetchError::NotInitialized)?;
        if self.refresh_due() {
            self.trigger_refresh();
        }
        Ok(keys)
    }

    /// Fetch the key set now and swap it in.
    ///
    /// On failure the previous snapshot, if any, stays in service.
    pub async fn refresh(&self) -> Result<Arc<SigningKeySet>, FetchError> {
        self.mark_attempt();
        let fetched = match self.inner.source.fetch().await {
            Ok(set) => SigningKeySet::from_jwks(&set),
            Err(e) => Err(e),
        };
        match fetched {
            Ok(keys) => {
                let keys = Arc::new(keys);
                self.install(Arc::clone(&keys));
                tracing::debug!(keys = keys.len(), "Signing key set refreshed");
                Ok(keys)
            }
            Err(e) => {
                if self.current().is_some() {
                    tracing::warn!(error = %e, "Key set refresh failed, keeping previous keys");
                }
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Option<Arc<SigningKeySet>> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn min_refresh_interval(&self) -> Duration {
        self.inner.min_refresh
    }

    fn install(&self, keys: Arc<SigningKeySet>) {
        let mut slot = self
            .inner
            .current
            .write()
            .unwrap_or_else(|p| p.into_inner());
        *slot = Some(keys);
    }

    fn mark_attempt(&self) {
        let mut last = self
            .inner
            .last_attempt
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        *last = Some(Instant::now());
    }

    fn refresh_due(&self) -> bool {
        let last = self
            .inner
            .last_attempt
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match *last {
            Some(at) => at.elapsed() >= self.inner.min_refresh,
            None => true,
        }
    }

    fn trigger_refresh(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        if self
            .inner
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let cache = self.clone();
        handle.spawn(async move {
            // refresh() logs its own failure; the stale set keeps serving
            let _ = cache.refresh().await;
            cache.inner.refreshing.store(false, Ordering::Release);
        });
    }
}
