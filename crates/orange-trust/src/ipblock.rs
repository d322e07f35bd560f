//! Client address block list.
//!
//! Requests refused by the rate limiter count as violations of the client
//! address. Violations are counted in a window; crossing the suspicious
//! threshold flags the address and crossing the violation threshold blocks
//! it for a fixed duration. Blocks live in the same store as the token
//! denylist, so every gateway instance sees them.
//!
//! Like the revocation gate, a lookup the store cannot answer lets the
//! request through.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;

use crate::constants::{
    BLOCKED_IP_PREFIX, DEFAULT_DENYLIST_TIMEOUT, SUSPICIOUS_IP_PREFIX, VIOLATION_COUNT_PREFIX,
};
use crate::error::StoreError;
use crate::revocation::{CounterStore, DenylistBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpBlockConfig {
    pub enabled: bool,
    /// Loopback addresses are exempt unless this is set.
    pub allow_localhost_blocking: bool,
    pub violation_threshold: u64,
    pub violation_window: Duration,
    pub block_duration: Duration,
    pub suspicious_threshold: u64,
    pub suspicious_duration: Duration,
    /// Addresses never checked nor counted.
    pub whitelisted_ips: Vec<String>,
    pub lookup_timeout: Duration,
}

impl Default for IpBlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_localhost_blocking: false,
            violation_threshold: 10,
            violation_window: Duration::from_secs(5 * 60),
            block_duration: Duration::from_secs(60 * 60),
            suspicious_threshold: 5,
            suspicious_duration: Duration::from_secs(30 * 60),
            whitelisted_ips: Vec::new(),
            lookup_timeout: DEFAULT_DENYLIST_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpDecision {
    Allow,
    Blocked { retry_after: Duration },
}

/// What recording one violation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationOutcome {
    /// Blocking disabled, or the address is exempt.
    Ignored,
    Counted(u64),
    Suspicious(u64),
    Blocked(u64),
}

pub fn is_localhost(ip: &str) -> bool {
    matches!(ip, "127.0.0.1" | "::1" | "0:0:0:0:0:0:0:1") || ip.eq_ignore_ascii_case("localhost")
}

pub struct IpBlocker<S = DenylistBackend> {
    store: S,
    config: IpBlockConfig,
}

impl<S: CounterStore> IpBlocker<S> {
    pub fn new(store: S, config: IpBlockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &IpBlockConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_whitelisted(&self, ip: &str) -> bool {
        self.config.whitelisted_ips.iter().any(|w| w == ip)
    }

    fn exempt(&self, ip: &str) -> bool {
        ip.trim().is_empty() || (is_localhost(ip) && !self.config.allow_localhost_blocking)
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.config.lookup_timeout, op)
            .await
            .unwrap_or(Err(StoreError::Timeout))
    }

    /// Whether requests from `ip` may proceed.
    pub async fn check(&self, ip: &str) -> IpDecision {
        if !self.config.enabled || self.is_whitelisted(ip) || self.exempt(ip) {
            return IpDecision::Allow;
        }
        match self.bounded(self.store.exists(&blocked_key(ip))).await {
            Ok(true) => {
                let retry_after = self
                    .block_time_remaining(ip)
                    .await
                    .ok()
                    .filter(|left| !left.is_zero())
                    .unwrap_or(self.config.block_duration);
                tracing::warn!(ip, retry_after_secs = retry_after.as_secs(), "Blocked IP attempted access");
                IpDecision::Blocked { retry_after }
            }
            Ok(false) => IpDecision::Allow,
            Err(e) => {
                tracing::warn!(ip, error = %e, "IP block lookup failed, admitting request");
                IpDecision::Allow
            }
        }
    }

    pub async fn is_suspicious(&self, ip: &str) -> Result<bool, StoreError> {
        if ip.trim().is_empty() {
            return Ok(false);
        }
        self.bounded(self.store.exists(&suspicious_key(ip))).await
    }

    /// Count one violation by `ip`, flagging or blocking it when a threshold
    /// is reached.
    pub async fn record_violation(&self, ip: &str) -> Result<ViolationOutcome, StoreError> {
        if !self.config.enabled || self.is_whitelisted(ip) || self.exempt(ip) {
            return Ok(ViolationOutcome::Ignored);
        }

        let count = self
            .bounded(
                self.store
                    .increment(&violation_key(ip), self.config.violation_window),
            )
            .await?;
        tracing::info!(
            ip,
            count,
            threshold = self.config.violation_threshold,
            "Violation recorded"
        );

        if count >= self.config.violation_threshold {
            self.block(ip, &format!("Exceeded rate limit violations: {count}"))
                .await?;
            Ok(ViolationOutcome::Blocked(count))
        } else if count >= self.config.suspicious_threshold {
            self.mark_suspicious(ip).await?;
            Ok(ViolationOutcome::Suspicious(count))
        } else {
            Ok(ViolationOutcome::Counted(count))
        }
    }

    /// Block `ip` for the configured duration. Returns `false` for an
    /// exempt address.
    pub async fn block(&self, ip: &str, reason: &str) -> Result<bool, StoreError> {
        if self.exempt(ip) {
            tracing::warn!(ip, "Refusing to block exempt address");
            return Ok(false);
        }
        tracing::error!(ip, reason, "Blocking IP");
        self.bounded(
            self.store
                .set_expiring(&blocked_key(ip), reason, self.config.block_duration),
        )
        .await?;
        self.bounded(self.store.delete(&[suspicious_key(ip)])).await?;
        Ok(true)
    }

    pub async fn mark_suspicious(&self, ip: &str) -> Result<(), StoreError> {
        if self.exempt(ip) {
            return Ok(());
        }
        let key = suspicious_key(ip);
        if self.bounded(self.store.exists(&key)).await? {
            return Ok(());
        }
        tracing::warn!(ip, "Marking IP as suspicious");
        let flagged_at = Utc::now().timestamp_millis().to_string();
        self.bounded(
            self.store
                .set_expiring(&key, &flagged_at, self.config.suspicious_duration),
        )
        .await
    }

    /// Lift a block and forget the address's history.
    pub async fn unblock(&self, ip: &str) -> Result<bool, StoreError> {
        if ip.trim().is_empty() {
            return Ok(false);
        }
        tracing::info!(ip, "Unblocking IP");
        let keys = [blocked_key(ip), violation_key(ip), suspicious_key(ip)];
        let removed = self.bounded(self.store.delete(&keys)).await?;
        Ok(removed > 0)
    }

    pub async fn violation_count(&self, ip: &str) -> Result<u64, StoreError> {
        self.bounded(self.store.count(&violation_key(ip))).await
    }

    pub async fn block_time_remaining(&self, ip: &str) -> Result<Duration, StoreError> {
        let left = self
            .bounded(self.store.time_to_live(&blocked_key(ip)))
            .await?;
        Ok(left.unwrap_or(Duration::ZERO))
    }
}

fn blocked_key(ip: &str) -> String {
    format!("{BLOCKED_IP_PREFIX}{ip}")
}

fn violation_key(ip: &str) -> String {
    format!("{VIOLATION_COUNT_PREFIX}{ip}")
}

fn suspicious_key(ip: &str) -> String {
    format!("{SUSPICIOUS_IP_PREFIX}{ip}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::{DenylistStore, InMemoryDenylist};

    const CLIENT: &str = "203.0.113.7";

    fn memory_blocker(config: IpBlockConfig) -> IpBlocker<InMemoryDenylist> {
        IpBlocker::new(InMemoryDenylist::new(), config)
    }

    fn strict() -> IpBlockConfig {
        IpBlockConfig {
            violation_threshold: 3,
            suspicious_threshold: 2,
            ..IpBlockConfig::default()
        }
    }

    #[tokio::test]
    async fn violations_escalate_to_a_block() {
        let blocker = memory_blocker(strict());

        assert_eq!(
            blocker.record_violation(CLIENT).await.unwrap(),
            ViolationOutcome::Counted(1)
        );
        assert_eq!(
            blocker.record_violation(CLIENT).await.unwrap(),
            ViolationOutcome::Suspicious(2)
        );
        assert!(blocker.is_suspicious(CLIENT).await.unwrap());
        assert_eq!(blocker.check(CLIENT).await, IpDecision::Allow);

        assert_eq!(
            blocker.record_violation(CLIENT).await.unwrap(),
            ViolationOutcome::Blocked(3)
        );
        // a block replaces the suspicious flag
        assert!(!blocker.is_suspicious(CLIENT).await.unwrap());
        match blocker.check(CLIENT).await {
            IpDecision::Blocked { retry_after } => {
                assert!(retry_after > Duration::from_secs(59 * 60));
                assert!(retry_after <= Duration::from_secs(60 * 60));
            }
            other => panic!("expected a block, got {other:?}"),
        }
        assert_eq!(blocker.check("198.51.100.1").await, IpDecision::Allow);
    }

    #[tokio::test]
    async fn block_uses_its_own_namespace() {
        let blocker = memory_blocker(IpBlockConfig::default());
        assert!(blocker.block(CLIENT, "manual").await.unwrap());

        assert!(blocker
            .store()
            .exists("security:blocked:ip:203.0.113.7")
            .await
            .unwrap());
        assert!(!blocker.store().exists("jwt:blacklist:203.0.113.7").await.unwrap());
    }

    #[tokio::test]
    async fn unblock_clears_history() {
        let blocker = memory_blocker(strict());
        for _ in 0..3 {
            blocker.record_violation(CLIENT).await.unwrap();
        }
        assert!(matches!(blocker.check(CLIENT).await, IpDecision::Blocked { .. }));

        assert!(blocker.unblock(CLIENT).await.unwrap());
        assert_eq!(blocker.check(CLIENT).await, IpDecision::Allow);
        assert_eq!(blocker.violation_count(CLIENT).await.unwrap(), 0);
        assert!(!blocker.unblock(CLIENT).await.unwrap());
    }

    #[tokio::test]
    async fn localhost_is_exempt_by_default() {
        let blocker = memory_blocker(strict());
        for _ in 0..5 {
            assert_eq!(
                blocker.record_violation("127.0.0.1").await.unwrap(),
                ViolationOutcome::Ignored
            );
        }
        assert!(!blocker.block("::1", "manual").await.unwrap());
        assert_eq!(blocker.check("127.0.0.1").await, IpDecision::Allow);

        let blocker = memory_blocker(IpBlockConfig {
            allow_localhost_blocking: true,
            ..strict()
        });
        assert!(blocker.block("127.0.0.1", "manual").await.unwrap());
        assert!(matches!(blocker.check("127.0.0.1").await, IpDecision::Blocked { .. }));
    }

    #[tokio::test]
    async fn whitelisted_address_is_never_counted_or_blocked() {
        let blocker = memory_blocker(IpBlockConfig {
            whitelisted_ips: vec![CLIENT.to_string()],
            ..strict()
        });
        blocker.store().insert(blocked_key(CLIENT), None);

        assert_eq!(blocker.check(CLIENT).await, IpDecision::Allow);
        assert_eq!(
            blocker.record_violation(CLIENT).await.unwrap(),
            ViolationOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn disabled_blocking_allows_everyone() {
        let blocker = memory_blocker(IpBlockConfig {
            enabled: false,
            ..strict()
        });
        blocker.store().insert(blocked_key(CLIENT), None);

        assert_eq!(blocker.check(CLIENT).await, IpDecision::Allow);
        assert_eq!(
            blocker.record_violation(CLIENT).await.unwrap(),
            ViolationOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn store_outage_allows_and_reports_recording_failure() {
        let blocker = memory_blocker(strict());
        blocker.store().insert(blocked_key(CLIENT), None);
        blocker.store().set_available(false);

        assert_eq!(blocker.check(CLIENT).await, IpDecision::Allow);
        assert!(matches!(
            blocker.record_violation(CLIENT).await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn block_without_expiry_reports_full_duration() {
        let blocker = memory_blocker(IpBlockConfig::default());
        blocker.store().insert(blocked_key(CLIENT), None);

        assert_eq!(
            blocker.check(CLIENT).await,
            IpDecision::Blocked {
                retry_after: Duration::from_secs(60 * 60)
            }
        );
    }
}
