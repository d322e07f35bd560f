pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod state;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use state::AppState;
