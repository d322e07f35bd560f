use std::sync::Arc;

use orange::ipblock::IpBlocker;
use orange::revocation::RevocationGate;
use orange::token::TokenVerifier;

use crate::config::GatewayConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub verifier: Arc<TokenVerifier>,
    pub gate: Arc<RevocationGate>,
    pub ip_blocker: Arc<IpBlocker>,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        verifier: TokenVerifier,
        gate: RevocationGate,
        ip_blocker: IpBlocker,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            gate: Arc::new(gate),
            ip_blocker: Arc::new(ip_blocker),
            http_client,
        })
    }
}
