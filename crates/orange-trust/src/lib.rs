//! Edge trust primitives for Orange Wallet.
//!
//! - [`jwks`]: the token authority's signing keys, fetched and refreshed in
//!   the background
//! - [`token`]: bearer token verification against those keys
//! - [`revocation`] and [`admission`]: the denylist gate applied to every
//!   authenticated request at the edge
//! - [`ipblock`]: client addresses blocked after repeated rate limit
//!   violations, kept in the same store
//! - [`callback`] and [`emitter`]: HMAC-signed payment callbacks, sending and
//!   receiving side
//!
//! # Admitting a request
//!
//! ```no_run
//! use std::time::Duration;
//! use orange::admission::{admit, Admission};
//! use orange::jwks::{HttpKeySource, KeyCache};
//! use orange::revocation::{InMemoryDenylist, RevocationGate};
//! use orange::token::TokenVerifier;
//!
//! # async fn run(bearer: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let keys = KeyCache::new(
//!     HttpKeySource::new("https://auth.example.com/oauth2/jwks")?,
//!     Duration::from_secs(900),
//! );
//! keys.initialize().await?;
//! let verifier = TokenVerifier::new(keys, Duration::ZERO);
//! let gate = RevocationGate::new(InMemoryDenylist::new(), "jwt:blacklist:", Duration::from_millis(500));
//!
//! let token = verifier.authenticate(bearer)?;
//! if let Admission::Reject(revoked) = admit(Some(&token), &gate).await {
//!     println!("revoked: {}", revoked.jti);
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod callback;
pub mod constants;
pub mod emitter;
pub mod error;
pub mod hmac;
pub mod ipblock;
pub mod jwks;
pub mod revocation;
pub mod security;
pub mod token;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use admission::{admit, Admission};
pub use callback::{verify_callback, Amount, CallbackPayload, PaymentEvent};
pub use emitter::{CallbackEmitter, CallbackReceipt};
pub use error::{
    AuthError, CallbackError, CallbackRejection, FetchError, StoreError, TokenRevoked, VerifyError,
};
pub use ipblock::{IpBlockConfig, IpBlocker, IpDecision, ViolationOutcome};
pub use jwks::{HttpKeySource, KeyCache, KeySource, SigningKeySet};
pub use revocation::{
    CounterStore, DenylistBackend, DenylistConfig, DenylistStore, GateDecision, InMemoryDenylist,
    RedisDenylist, RevocationGate,
};
pub use token::{verify, Claims, TokenVerifier, VerifiedToken};
