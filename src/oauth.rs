//! OAuth2 token exchange and backend capability probing
//!
//! The gateway never stores credentials: every request carries a refresh
//! token and client id, which are exchanged here for a short-lived access
//! token. The granted scope string decides which backend is legal.
//!
//! The Graph probe is deliberately fail-open: any transport or parse
//! failure yields [`GraphSupport::Unsupported`] so callers fall back to
//! IMAP instead of failing the whole request.

use serde::Deserialize;

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult};

/// Elevated scope requested when probing Graph API support
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Scope that permits mailbox mutation via Graph
pub const GRAPH_MAIL_READWRITE: &str = "https://graph.microsoft.com/Mail.ReadWrite";

/// Scope that permits read-only Graph mail access
pub const GRAPH_MAIL_READ: &str = "https://graph.microsoft.com/Mail.Read";

/// Scope that permits reading the signed-in user's profile
pub const GRAPH_USER_READ: &str = "https://graph.microsoft.com/User.Read";

/// Scope that permits IMAP access to the mailbox
pub const IMAP_ACCESS_SCOPE: &str = "https://outlook.office.com/IMAP.AccessAsUser.All";

/// Scope that permits POP access to the mailbox
pub const POP_ACCESS_SCOPE: &str = "https://outlook.office.com/POP.AccessAsUser.All";

/// Successful token endpoint response
///
/// The consumer endpoint always returns `scope`, but it is optional here so
/// a missing field downgrades capability rather than failing the exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// Short-lived bearer token
    pub access_token: String,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: String,
}

/// Outcome of the Graph capability probe
///
/// Typed so a probe failure cannot be confused with a fatal error: callers
/// match on this and fall back to the IMAP path for `Unsupported`.
#[derive(Debug, Clone)]
pub enum GraphSupport {
    /// Granted scope includes `Mail.ReadWrite`; token is Graph-capable
    Supported {
        /// Access token from the elevated-scope exchange
        access_token: String,
    },
    /// Probe failed or scope was not granted; use the IMAP path
    Unsupported {
        /// Why the Graph path is unavailable (logged, never surfaced as an error)
        reason: String,
    },
}

/// Exchange a refresh token for an access token
///
/// Form-encoded POST to the configured token endpoint with
/// `grant_type=refresh_token`. An elevated scope may be requested to probe
/// capability.
///
/// # Errors
///
/// - `Upstream` for non-2xx responses or unparseable bodies, with the
///   upstream response text attached
pub async fn exchange_refresh_token(
    http: &reqwest::Client,
    config: &GatewayConfig,
    refresh_token: &str,
    client_id: &str,
    scope: Option<&str>,
) -> AppResult<TokenResponse> {
    let mut form = vec![
        ("client_id", client_id),
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
    ];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let response = http
        .post(&config.token_url)
        .form(&form)
        .send()
        .await
        .map_err(|e| AppError::Upstream(format!("token endpoint request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| AppError::Upstream(format!("token endpoint read failed: {e}")))?;

    if !status.is_success() {
        return Err(AppError::Upstream(format!(
            "token endpoint returned status {status}: {body}"
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| AppError::Upstream(format!("token endpoint JSON parse failed: {e}: {body}")))
}

/// Probe whether the credential supports the Graph API path
///
/// Requests the elevated `.default` scope and checks the granted scope for
/// `Mail.ReadWrite`. Never returns an error: failures are swallowed into
/// [`GraphSupport::Unsupported`] so the caller falls back to IMAP.
pub async fn probe_graph_support(
    http: &reqwest::Client,
    config: &GatewayConfig,
    refresh_token: &str,
    client_id: &str,
) -> GraphSupport {
    match exchange_refresh_token(
        http,
        config,
        refresh_token,
        client_id,
        Some(GRAPH_DEFAULT_SCOPE),
    )
    .await
    {
        Ok(token) if scope_grants(&token.scope, GRAPH_MAIL_READWRITE) => GraphSupport::Supported {
            access_token: token.access_token,
        },
        Ok(token) => GraphSupport::Unsupported {
            reason: format!("granted scope lacks Mail.ReadWrite: '{}'", token.scope),
        },
        Err(e) => {
            tracing::debug!(error = %e, "graph capability probe failed");
            GraphSupport::Unsupported {
                reason: e.to_string(),
            }
        }
    }
}

/// Capability report for one backend, used by the token-info endpoint
#[derive(Debug, Clone)]
pub struct BackendProbe {
    /// Whether the backend may be used with this credential
    pub supported: bool,
    /// Granted scope string, if the exchange succeeded
    pub scope: Option<String>,
    /// Per-permission breakdown of the granted scope, if the exchange succeeded
    pub permissions: Option<serde_json::Value>,
    /// Failure detail, if the probe failed
    pub error: Option<String>,
}

/// Break a granted Graph scope string into individual permission flags
fn graph_permissions(scope: &str) -> serde_json::Value {
    serde_json::json!({
        "mailReadWrite": scope_grants(scope, GRAPH_MAIL_READWRITE),
        "mailRead": scope_grants(scope, GRAPH_MAIL_READ),
        "userRead": scope_grants(scope, GRAPH_USER_READ),
    })
}

/// Break a granted legacy-protocol scope string into permission flags
fn imap_permissions(scope: &str) -> serde_json::Value {
    serde_json::json!({
        "imapAccess": scope_grants(scope, IMAP_ACCESS_SCOPE),
        "popAccess": scope_grants(scope, POP_ACCESS_SCOPE),
    })
}

/// Probe Graph support and report scope detail (token-info endpoint)
pub async fn probe_graph_detail(
    http: &reqwest::Client,
    config: &GatewayConfig,
    refresh_token: &str,
    client_id: &str,
) -> BackendProbe {
    match exchange_refresh_token(
        http,
        config,
        refresh_token,
        client_id,
        Some(GRAPH_DEFAULT_SCOPE),
    )
    .await
    {
        Ok(token) => BackendProbe {
            supported: scope_grants(&token.scope, GRAPH_MAIL_READWRITE),
            permissions: Some(graph_permissions(&token.scope)),
            scope: Some(token.scope),
            error: None,
        },
        Err(e) => BackendProbe {
            supported: false,
            scope: None,
            permissions: None,
            error: Some(e.to_string()),
        },
    }
}

/// Probe IMAP support via a plain (non-elevated) token exchange
///
/// The consumer endpoint grants the originally-consented scopes; IMAP is
/// usable when either the IMAP or POP access scope is present.
pub async fn probe_imap_detail(
    http: &reqwest::Client,
    config: &GatewayConfig,
    refresh_token: &str,
    client_id: &str,
) -> BackendProbe {
    match exchange_refresh_token(http, config, refresh_token, client_id, None).await {
        Ok(token) => BackendProbe {
            supported: scope_grants(&token.scope, IMAP_ACCESS_SCOPE)
                || scope_grants(&token.scope, POP_ACCESS_SCOPE),
            permissions: Some(imap_permissions(&token.scope)),
            scope: Some(token.scope),
            error: None,
        },
        Err(e) => BackendProbe {
            supported: false,
            scope: None,
            permissions: None,
            error: Some(e.to_string()),
        },
    }
}

/// Check whether a space-delimited scope string grants a permission
pub fn scope_grants(scope: &str, permission: &str) -> bool {
    scope.split_ascii_whitespace().any(|s| s == permission)
}

/// Build the XOAUTH2 SASL initial response (before base64 encoding)
///
/// Format: `user={user}\x01auth=Bearer {access_token}\x01\x01`.
/// `async-imap` base64-encodes the authenticator response itself.
pub fn xoauth2_response(user: &str, access_token: &str) -> String {
    format!("user={user}\x01auth=Bearer {access_token}\x01\x01")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use axum::routing::post;
    use axum::{Json, Router};

    /// Loopback token endpoint granting a fixed scope
    async fn stub_token_endpoint(scope: &str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub must bind");
        let addr = listener.local_addr().expect("stub addr");
        let scope = scope.to_owned();
        let app = Router::new().route(
            "/token",
            post(move || {
                let scope = scope.clone();
                async move {
                    Json(serde_json::json!({ "access_token": "stub-token", "scope": scope }))
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("stub must serve");
        });
        format!("http://{addr}/token")
    }

    #[tokio::test]
    async fn probe_selects_graph_when_readwrite_granted() {
        let mut config = GatewayConfig::for_tests();
        config.token_url = stub_token_endpoint(
            "https://graph.microsoft.com/Mail.ReadWrite https://graph.microsoft.com/User.Read",
        )
        .await;
        match probe_graph_support(&reqwest::Client::new(), &config, "rt", "cid").await {
            GraphSupport::Supported { access_token } => assert_eq!(access_token, "stub-token"),
            GraphSupport::Unsupported { reason } => panic!("expected graph support: {reason}"),
        }
    }

    #[tokio::test]
    async fn probe_falls_back_when_readwrite_missing() {
        let mut config = GatewayConfig::for_tests();
        config.token_url =
            stub_token_endpoint("https://outlook.office.com/IMAP.AccessAsUser.All").await;
        match probe_graph_support(&reqwest::Client::new(), &config, "rt", "cid").await {
            GraphSupport::Supported { .. } => panic!("scope must not grant graph"),
            GraphSupport::Unsupported { reason } => {
                assert!(reason.contains("Mail.ReadWrite"), "got: {reason}");
            }
        }
    }

    #[tokio::test]
    async fn probe_is_fail_open_when_endpoint_unreachable() {
        let mut config = GatewayConfig::for_tests();
        config.token_url = "http://127.0.0.1:1/token".to_owned();
        let support = probe_graph_support(&reqwest::Client::new(), &config, "rt", "cid").await;
        assert!(matches!(support, GraphSupport::Unsupported { .. }));
    }

    #[test]
    fn graph_permissions_reflect_granted_scope() {
        let perms = graph_permissions(
            "https://graph.microsoft.com/Mail.ReadWrite https://graph.microsoft.com/User.Read",
        );
        assert_eq!(perms["mailReadWrite"], true);
        assert_eq!(perms["mailRead"], false);
        assert_eq!(perms["userRead"], true);
    }

    #[test]
    fn imap_permissions_reflect_granted_scope() {
        let perms = imap_permissions("https://outlook.office.com/POP.AccessAsUser.All");
        assert_eq!(perms["imapAccess"], false);
        assert_eq!(perms["popAccess"], true);
    }

    #[test]
    fn xoauth2_response_matches_wire_format() {
        let raw = xoauth2_response("user@example.com", "EwB4token");
        assert_eq!(raw, "user=user@example.com\x01auth=Bearer EwB4token\x01\x01");
    }

    #[test]
    fn scope_grants_requires_exact_token_match() {
        let scope = "https://graph.microsoft.com/Mail.ReadWrite \
                     https://graph.microsoft.com/User.Read";
        assert!(scope_grants(scope, GRAPH_MAIL_READWRITE));
        assert!(!scope_grants(scope, GRAPH_MAIL_READ));
        assert!(!scope_grants("", GRAPH_MAIL_READWRITE));
    }

    #[test]
    fn scope_grants_is_not_a_substring_check() {
        // A shared prefix must not count as a grant.
        assert!(!scope_grants(
            "https://graph.microsoft.com/Mail.ReadWrite.Shared",
            GRAPH_MAIL_READWRITE
        ));
    }

    #[test]
    fn token_response_tolerates_missing_scope() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc"}"#).expect("must parse");
        assert_eq!(token.access_token, "abc");
        assert!(token.scope.is_empty());
    }

}
