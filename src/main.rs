//! mail-oauth-gateway-rs: HTTP gateway for Microsoft OAuth2 mailboxes
//!
//! Exchanges per-request refresh tokens for access tokens and performs
//! mailbox operations (clear, delete, send, capability report) over the
//! Graph API, falling back to an IMAP XOAUTH2 session when the granted
//! scope does not permit Graph.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and HTTP serving
//! - [`config`]: Environment-driven configuration for endpoints and timeouts
//! - [`errors`]: Application error model with HTTP status mapping
//! - [`oauth`]: Token exchange and fail-open capability probing
//! - [`graph`]: Graph REST backend (paginated listing, delete, send)
//! - [`imap`]: IMAP fallback with a typed session state machine
//! - [`completion`]: One-shot response guard racing sessions against budgets
//! - [`server`]: Router, handlers, and response assembly
//! - [`models`]: Request parameter extraction and response DTOs

mod completion;
mod config;
mod errors;
mod graph;
mod imap;
mod models;
mod oauth;
mod server;

use config::GatewayConfig;
use tracing_subscriber::EnvFilter;

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the HTTP
/// gateway until interrupted.
///
/// # Environment Variables
///
/// See [`GatewayConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```sh
/// MAIL_GATEWAY_BIND=0.0.0.0:3000 \
/// MAIL_GATEWAY_PASSWORD=shared-secret \
/// cargo run
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = GatewayConfig::load_from_env()?;
    let bind = config.bind;
    let app = server::router(server::AppState::new(config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "mail gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
