//! Configuration module for gateway and upstream settings
//!
//! All configuration is loaded from environment variables with the prefix
//! `MAIL_GATEWAY_`. Every value has a sensible default; the gateway starts
//! with zero configuration and talks to the Microsoft consumer endpoints.

use std::env;
use std::env::VarError;
use std::net::SocketAddr;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default OAuth2 token endpoint for Microsoft consumer accounts
pub const DEFAULT_TOKEN_URL: &str =
    "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";

/// Default Microsoft Graph API base URL
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

/// Gateway-wide configuration
///
/// Loaded once at startup and shared with request handlers via `Arc`.
/// The shared secret is stored as `SecretString` to prevent accidental
/// logging.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address for the HTTP server
    pub bind: SocketAddr,
    /// Optional shared secret checked against the `password` parameter
    pub password: Option<SecretString>,
    /// OAuth2 token endpoint URL
    pub token_url: String,
    /// Graph API base URL (no trailing slash)
    pub graph_base: String,
    /// IMAP server hostname
    pub imap_host: String,
    /// IMAP server port (TLS)
    pub imap_port: u16,
    /// TCP connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// TLS handshake / greeting / authentication timeout in milliseconds
    pub greeting_timeout_ms: u64,
    /// Per-command IMAP socket timeout in milliseconds
    pub socket_timeout_ms: u64,
    /// Wall-clock budget for bulk IMAP operations in seconds
    pub bulk_timeout_secs: u64,
    /// Wall-clock budget for single-item IMAP operations in seconds
    pub single_timeout_secs: u64,
}

impl GatewayConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a variable is set but malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_GATEWAY_BIND=0.0.0.0:3000
    /// MAIL_GATEWAY_PASSWORD=shared-secret
    /// MAIL_GATEWAY_IMAP_HOST=outlook.office365.com
    /// MAIL_GATEWAY_BULK_TIMEOUT_SECS=60
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let bind_raw = optional_env("MAIL_GATEWAY_BIND")?
            .unwrap_or_else(|| "0.0.0.0:3000".to_owned());
        let bind: SocketAddr = bind_raw.parse().map_err(|_| {
            AppError::InvalidInput(format!("invalid MAIL_GATEWAY_BIND address: '{bind_raw}'"))
        })?;

        Ok(Self {
            bind,
            password: optional_env("MAIL_GATEWAY_PASSWORD")?
                .map(|v| SecretString::new(v.into())),
            token_url: optional_env("MAIL_GATEWAY_TOKEN_URL")?
                .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_owned()),
            graph_base: optional_env("MAIL_GATEWAY_GRAPH_BASE")?
                .map(|v| v.trim_end_matches('/').to_owned())
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_owned()),
            imap_host: optional_env("MAIL_GATEWAY_IMAP_HOST")?
                .unwrap_or_else(|| "outlook.office365.com".to_owned()),
            imap_port: parse_u16_env("MAIL_GATEWAY_IMAP_PORT", 993)?,
            connect_timeout_ms: parse_u64_env("MAIL_GATEWAY_CONNECT_TIMEOUT_MS", 30_000)?,
            greeting_timeout_ms: parse_u64_env("MAIL_GATEWAY_GREETING_TIMEOUT_MS", 15_000)?,
            socket_timeout_ms: parse_u64_env("MAIL_GATEWAY_SOCKET_TIMEOUT_MS", 30_000)?,
            bulk_timeout_secs: parse_u64_env("MAIL_GATEWAY_BULK_TIMEOUT_SECS", 60)?,
            single_timeout_secs: parse_u64_env("MAIL_GATEWAY_SINGLE_TIMEOUT_SECS", 30)?,
        })
    }

    /// Default configuration without touching the environment
    ///
    /// Used by tests that need a router but never reach an upstream.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            bind: "127.0.0.1:0".parse().expect("literal address"),
            password: None,
            token_url: DEFAULT_TOKEN_URL.to_owned(),
            graph_base: DEFAULT_GRAPH_BASE.to_owned(),
            imap_host: "outlook.office365.com".to_owned(),
            imap_port: 993,
            connect_timeout_ms: 30_000,
            greeting_timeout_ms: 15_000,
            socket_timeout_ms: 30_000,
            bulk_timeout_secs: 60,
            single_timeout_secs: 30,
        }
    }
}

/// Read an optional environment variable, treating empty values as unset
fn optional_env(key: &str) -> AppResult<Option<String>> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v)),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match optional_env(key)? {
        Some(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match optional_env(key)? {
        Some(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_microsoft_consumer_endpoints() {
        let config = GatewayConfig::for_tests();
        assert_eq!(config.token_url, DEFAULT_TOKEN_URL);
        assert_eq!(config.graph_base, DEFAULT_GRAPH_BASE);
        assert_eq!(config.imap_host, "outlook.office365.com");
        assert_eq!(config.imap_port, 993);
    }

    #[test]
    fn bulk_budget_exceeds_single_item_budget() {
        let config = GatewayConfig::for_tests();
        assert!(config.bulk_timeout_secs > config.single_timeout_secs);
    }

    #[test]
    fn parse_u64_env_rejects_garbage() {
        // SAFETY: test-local variable name, no other test reads it.
        unsafe { std::env::set_var("MAIL_GATEWAY_TEST_U64", "sixty") };
        let err = parse_u64_env("MAIL_GATEWAY_TEST_U64", 1).expect_err("must fail");
        assert!(err.to_string().contains("MAIL_GATEWAY_TEST_U64"));
        unsafe { std::env::remove_var("MAIL_GATEWAY_TEST_U64") };
    }
}
