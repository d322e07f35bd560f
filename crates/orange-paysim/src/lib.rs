//! Orange payment simulator: stands in for a bank's virtual-account rail.
//!
//! A caller holding a valid bearer token asks for a payment via `POST /pay`;
//! the simulator then notifies the transaction service through an
//! HMAC-signed callback, forwarding the caller's token.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (pay, health, metrics)
//! - [`config`]: environment configuration
//! - [`state`]: shared [`AppState`](state::AppState)
//! - [`metrics`]: Prometheus counters for payments and callbacks

pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod state;
