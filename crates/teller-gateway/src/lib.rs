//! # Teller Gateway
//!
//! HTTP surface for Teller authentication: login, registration and logout
//! forms, cookie-carried sessions, flash messages and permission queries.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Request context extractors and API errors.
pub mod context;
/// Cookie parsing and `Set-Cookie` values.
pub mod cookies;
mod handlers;
mod middleware;
/// Post-login redirect targets.
pub mod redirect;
mod server;
/// First-run administrator seeding.
pub mod setup;

pub use context::{ApiError, RequireAuth, SessionContext, client_ip};
pub use middleware::GatewayRateLimiter;
pub use redirect::RedirectPolicy;
pub use server::{Gateway, GatewayState, router};

use teller_core::TellerConfig;

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: TellerConfig) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
