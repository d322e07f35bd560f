//! Per-request admission decision for the edge gateway.

use crate::error::TokenRevoked;
use crate::revocation::{DenylistStore, GateDecision, RevocationGate};
use crate::token::VerifiedToken;

/// What the filter does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nothing to check: no verified claims, or claims without a `jti`.
    PassThrough,
    /// The denylist was consulted (or could not be) and the request may continue.
    PassThroughAfterCheck,
    Reject(TokenRevoked),
}

impl Admission {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Admission::Reject(_))
    }
}

/// Decide whether a request carrying `claims` may proceed.
///
/// Authentication happens before this; a request without verified claims is
/// left to the downstream authorization rules.
pub async fn admit<S: DenylistStore>(
    claims: Option<&VerifiedToken>,
    gate: &RevocationGate<S>,
) -> Admission {
    let Some(token) = claims else {
        return Admission::PassThrough;
    };
    let Some(jti) = token.jti() else {
        tracing::debug!(sub = ?token.subject(), "Token has no jti, skipping revocation check");
        return Admission::PassThrough;
    };

    match gate.check(jti).await {
        GateDecision::Reject => Admission::Reject(TokenRevoked {
            jti: jti.to_string(),
        }),
        GateDecision::Admit | GateDecision::FailOpen(_) => Admission::PassThroughAfterCheck,
    }
}
