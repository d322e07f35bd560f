use std::sync::Arc;

use orange::emitter::CallbackEmitter;
use orange::token::TokenVerifier;

use crate::config::PaySimConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<PaySimConfig>,
    pub verifier: Arc<TokenVerifier>,
    pub emitter: CallbackEmitter,
}

impl AppState {
    pub fn new(config: PaySimConfig, verifier: TokenVerifier, emitter: CallbackEmitter) -> Self {
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            emitter,
        }
    }
}
