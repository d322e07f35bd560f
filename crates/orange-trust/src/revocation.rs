//! Revocation gate backed by a shared denylist.
//!
//! The authority writes `<prefix><jti>` into a key-value store with a TTL when
//! it revokes a token. The gate only asks whether that key exists. A store
//! that is slow or unreachable never causes a rejection: the gate logs the
//! failure and lets the request through.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, IntoConnectionInfo};

use crate::constants::{
    DEFAULT_DENYLIST_ENDPOINT, DEFAULT_DENYLIST_PREFIX, DEFAULT_DENYLIST_TIMEOUT,
};
use crate::error::StoreError;

/// Read side of the denylist.
pub trait DenylistStore: Send + Sync {
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;
}

/// Counters and expiring markers kept next to the denylist. Used by the IP
/// block list; token revocations are never written through this trait.
pub trait CounterStore: DenylistStore {
    /// Increment `key`. The first increment starts its `window` expiry.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Current value of a counter; 0 when absent.
    fn count(&self, key: &str) -> impl Future<Output = Result<u64, StoreError>> + Send;

    fn set_expiring(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove `keys`, returning how many existed.
    fn delete(&self, keys: &[String]) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Remaining lifetime of `key`; `None` when absent or without expiry.
    fn time_to_live(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Duration>, StoreError>> + Send;
}

/// Where the denylist lives and how its keys are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenylistConfig {
    /// `redis://host:port` or bare `host:port`.
    pub denylist_endpoint: String,
    pub key_namespace_prefix: String,
    /// Logical database index; `None` keeps whatever the endpoint selects.
    pub revocation_db_index: Option<i64>,
    pub lookup_timeout: Duration,
}

impl Default for DenylistConfig {
    fn default() -> Self {
        Self {
            denylist_endpoint: DEFAULT_DENYLIST_ENDPOINT.to_string(),
            key_namespace_prefix: DEFAULT_DENYLIST_PREFIX.to_string(),
            revocation_db_index: None,
            lookup_timeout: DEFAULT_DENYLIST_TIMEOUT,
        }
    }
}

impl DenylistConfig {
    /// Endpoint with a `redis://` scheme added when the operator gave a bare
    /// `host:port`.
    pub fn endpoint_url(&self) -> String {
        if self.denylist_endpoint.contains("://") {
            self.denylist_endpoint.clone()
        } else {
            format!("redis://{}", self.denylist_endpoint)
        }
    }
}

/// Denylist in a Redis-compatible store.
#[derive(Clone)]
pub struct RedisDenylist {
    conn: ConnectionManager,
}

impl RedisDenylist {
    pub async fn connect(config: &DenylistConfig) -> Result<Self, StoreError> {
        let mut info = config
            .endpoint_url()
            .as_str()
            .into_connection_info()
            .map_err(|e| StoreError::Connection(format!("invalid denylist endpoint: {e}")))?;
        if let Some(db) = config.revocation_db_index {
            info.redis.db = db;
        }

        let client = redis::Client::open(info)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

impl DenylistStore for RedisDenylist {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }
}

impl CounterStore for RedisDenylist {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.incr(key, 1u64).await?;
        if count == 1 {
            let secs = i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX);
            let _: () = conn.expire(key, secs).await?;
        }
        Ok(count)
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<u64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_expiring(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(keys).await?;
        Ok(removed)
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut conn = self.conn.clone();
        // -2: no such key, -1: no expiry
        let secs: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(secs).ok().map(Duration::from_secs))
    }
}

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    count: u64,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local denylist with per-entry expiry.
///
/// Serves local development and tests. [`InMemoryDenylist::set_available`]
/// simulates an outage of the store.
#[derive(Debug, Default)]
pub struct InMemoryDenylist {
    entries: DashMap<String, MemoryEntry>,
    unavailable: AtomicBool,
}

impl InMemoryDenylist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key`; `ttl` of `None` keeps it until removed.
    pub fn insert(&self, key: impl Into<String>, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.into(), MemoryEntry { count: 1, expires_at });
    }

    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.live(now));
        before - self.entries.len()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection(
                "in-memory denylist marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn live_entry(&self, key: &str) -> Option<MemoryEntry> {
        let entry = *self.entries.get(key)?;
        entry.live(Instant::now()).then_some(entry)
    }
}

impl DenylistStore for InMemoryDenylist {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.ensure_available()?;
        Ok(self.live_entry(key).is_some())
    }
}

impl CounterStore for InMemoryDenylist {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(MemoryEntry {
            count: 0,
            expires_at: None,
        });
        if !entry.live(now) {
            *entry = MemoryEntry {
                count: 0,
                expires_at: None,
            };
        }
        entry.count += 1;
        if entry.count == 1 {
            entry.expires_at = Some(now + window);
        }
        Ok(entry.count)
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        self.ensure_available()?;
        Ok(self.live_entry(key).map_or(0, |entry| entry.count))
    }

    async fn set_expiring(&self, key: &str, _value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.insert(key, Some(ttl));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.ensure_available()?;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| entry.live(now))
            .count();
        Ok(removed as u64)
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.ensure_available()?;
        Ok(self
            .live_entry(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }
}

/// Configured denylist backend.
pub enum DenylistBackend {
    Redis(RedisDenylist),
    Memory(InMemoryDenylist),
}

impl DenylistStore for DenylistBackend {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.exists(key).await,
            DenylistBackend::Memory(store) => store.exists(key).await,
        }
    }
}

impl CounterStore for DenylistBackend {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.increment(key, window).await,
            DenylistBackend::Memory(store) => store.increment(key, window).await,
        }
    }

    async fn count(&self, key: &str) -> Result<u64, StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.count(key).await,
            DenylistBackend::Memory(store) => store.count(key).await,
        }
    }

    async fn set_expiring(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.set_expiring(key, value, ttl).await,
            DenylistBackend::Memory(store) => store.set_expiring(key, value, ttl).await,
        }
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.delete(keys).await,
            DenylistBackend::Memory(store) => store.delete(keys).await,
        }
    }

    async fn time_to_live(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        match self {
            DenylistBackend::Redis(store) => store.time_to_live(key).await,
            DenylistBackend::Memory(store) => store.time_to_live(key).await,
        }
    }
}

/// Outcome of consulting the denylist for one `jti`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    Reject,
    /// The store could not answer; the request is admitted anyway.
    FailOpen(StoreError),
}

/// Asks the denylist whether a token id has been revoked.
pub struct RevocationGate<S = DenylistBackend> {
    store: S,
    prefix: String,
    timeout: Duration,
}

impl<S: DenylistStore> RevocationGate<S> {
    pub fn new(store: S, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            timeout,
        }
    }

    pub fn from_config(store: S, config: &DenylistConfig) -> Self {
        Self::new(
            store,
            config.key_namespace_prefix.clone(),
            config.lookup_timeout,
        )
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key_for(&self, jti: &str) -> String {
        format!("{}{}", self.prefix, jti)
    }

    /// Whether `jti` is on the denylist. Store failures and timeouts are
    /// returned as [`StoreError`], never as `true`.
    pub async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        let key = self.key_for(jti);
        match tokio::time::timeout(self.timeout, self.store.exists(&key)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }

    pub async fn check(&self, jti: &str) -> GateDecision {
        match self.is_revoked(jti).await {
            Ok(true) => {
                tracing::info!(jti, "Rejecting revoked token");
                GateDecision::Reject
            }
            Ok(false) => GateDecision::Admit,
            Err(e) => {
                tracing::warn!(jti, error = %e, "Denylist lookup failed, admitting request");
                GateDecision::FailOpen(e)
            }
        }
    }
}

impl RevocationGate<InMemoryDenylist> {
    /// Record `jti` as revoked for `ttl`, the way the authority does when a
    /// session is logged out.
    pub fn revoke(&self, jti: &str, ttl: Duration) {
        self.store.insert(self.key_for(jti), Some(ttl));
    }
}
