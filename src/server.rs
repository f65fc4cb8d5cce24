//! HTTP surface: router, request handlers, and response assembly
//!
//! Each endpoint follows the same shape: shared-secret check, required
//! parameter validation (both before any upstream call), capability
//! dispatch, then backend execution. Responses are uniform JSON with a
//! `mode` field naming the backend that served the request.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use secrecy::ExposeSecret;
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::completion;
use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult};
use crate::graph::{self, GraphClient, OutgoingMessage};
use crate::imap;
use crate::models::{CapabilityReport, FeatureMatrix, RequestParams, require_params};
use crate::oauth::{self, GraphSupport};

/// Shared state for all handlers
///
/// The reqwest client is cheap to clone and pools connections across
/// requests; everything else is immutable config.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration loaded at startup
    pub config: Arc<GatewayConfig>,
    /// Shared outbound HTTP client (token endpoint, Graph API)
    pub http: reqwest::Client,
}

impl AppState {
    /// Build state from loaded configuration
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}

/// Build the gateway router
///
/// API routes accept GET and POST identically (parameters from query
/// string or body); `/health` is a plain liveness probe. CORS is open to
/// any origin so browser clients can call the gateway directly.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/clear-inbox", any(clear_inbox))
        .route("/api/clear-junk", any(clear_junk))
        .route("/api/delete-mail", any(delete_mail))
        .route("/api/send-mail", any(send_mail))
        .route("/api/token-info", any(token_info))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// RFC 3339 timestamp with millisecond precision
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Check the optional shared secret
///
/// When a secret is configured, every endpoint requires a matching
/// `password` parameter. Runs before parameter validation so a bad secret
/// is always a 401, never a 400.
fn check_password(config: &GatewayConfig, params: &RequestParams) -> AppResult<()> {
    let Some(secret) = &config.password else {
        return Ok(());
    };
    if params.password.as_deref() == Some(secret.expose_secret()) {
        Ok(())
    } else {
        Err(AppError::AuthFailed(
            "Please provide valid credentials or contact the administrator for access".to_owned(),
        ))
    }
}

/// Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK", "timestamp": timestamp() }))
}

/// Clear all mail in the primary folder
async fn clear_inbox(
    State(state): State<AppState>,
    params: RequestParams,
) -> Result<Json<serde_json::Value>, AppError> {
    check_password(&state.config, &params)?;
    let [refresh_token, client_id, email] = require_params([
        ("refresh_token", &params.refresh_token),
        ("client_id", &params.client_id),
        ("email", &params.email),
    ])?;
    run_clear(
        &state,
        refresh_token,
        client_id,
        email,
        graph::INBOX_FOLDER,
        &["INBOX"],
        "Inbox",
    )
    .await
}

/// Clear all mail in the junk folder
async fn clear_junk(
    State(state): State<AppState>,
    params: RequestParams,
) -> Result<Json<serde_json::Value>, AppError> {
    check_password(&state.config, &params)?;
    let [refresh_token, client_id, email] = require_params([
        ("refresh_token", &params.refresh_token),
        ("client_id", &params.client_id),
        ("email", &params.email),
    ])?;
    run_clear(
        &state,
        refresh_token,
        client_id,
        email,
        graph::JUNK_FOLDER,
        imap::JUNK_FOLDER_CANDIDATES,
        "Junk",
    )
    .await
}

/// Shared bulk-clear flow: probe capability, dispatch, assemble stats
async fn run_clear(
    state: &AppState,
    refresh_token: &str,
    client_id: &str,
    email: &str,
    graph_folder: &str,
    imap_candidates: &[&str],
    label: &str,
) -> Result<Json<serde_json::Value>, AppError> {
    match oauth::probe_graph_support(&state.http, &state.config, refresh_token, client_id).await {
        GraphSupport::Supported { access_token } => {
            tracing::info!(mode = "graph", folder = graph_folder, "clearing folder");
            let client = GraphClient::new(
                state.http.clone(),
                state.config.graph_base.clone(),
                access_token,
            );
            let stats = client.clear_folder(graph_folder).await?;
            Ok(Json(json!({
                "message": format!("{label} emails processed successfully via Graph API."),
                "mode": "graph",
                "stats": stats,
            })))
        }
        GraphSupport::Unsupported { reason } => {
            tracing::info!(mode = "imap", %reason, "falling back to IMAP");
            let token = oauth::exchange_refresh_token(
                &state.http,
                &state.config,
                refresh_token,
                client_id,
                None,
            )
            .await?;
            let candidates: Vec<String> =
                imap_candidates.iter().map(|c| (*c).to_owned()).collect();
            let budget = Duration::from_secs(state.config.bulk_timeout_secs);
            let (_, stats) = completion::run_with_budget(
                budget,
                "IMAP bulk clear",
                imap::clear_folder(
                    Arc::clone(&state.config),
                    email.to_owned(),
                    token.access_token,
                    candidates,
                ),
            )
            .await?;
            Ok(Json(json!({
                "message": format!("{label} emails processed successfully via IMAP."),
                "mode": "imap",
                "stats": stats,
            })))
        }
    }
}

/// Delete one message by Graph id / Message-ID header
async fn delete_mail(
    State(state): State<AppState>,
    params: RequestParams,
) -> Result<Response, AppError> {
    check_password(&state.config, &params)?;
    let [refresh_token, client_id, email, message_id] = require_params([
        ("refresh_token", &params.refresh_token),
        ("client_id", &params.client_id),
        ("email", &params.email),
        ("message_id", &params.message_id),
    ])?;
    let folder = params.mailbox.as_deref().unwrap_or("INBOX");

    let (mode, outcome) =
        match oauth::probe_graph_support(&state.http, &state.config, refresh_token, client_id)
            .await
        {
            GraphSupport::Supported { access_token } => {
                tracing::info!(mode = "graph", "deleting message");
                let client = GraphClient::new(
                    state.http.clone(),
                    state.config.graph_base.clone(),
                    access_token,
                );
                ("graph", client.delete_message(message_id).await)
            }
            GraphSupport::Unsupported { reason } => {
                tracing::info!(mode = "imap", folder, %reason, "falling back to IMAP");
                let token = oauth::exchange_refresh_token(
                    &state.http,
                    &state.config,
                    refresh_token,
                    client_id,
                    None,
                )
                .await?;
                let budget = Duration::from_secs(state.config.single_timeout_secs);
                let outcome = completion::run_with_budget(
                    budget,
                    "IMAP single delete",
                    imap::delete_by_message_id(
                        Arc::clone(&state.config),
                        email.to_owned(),
                        token.access_token,
                        folder.to_owned(),
                        message_id.to_owned(),
                    ),
                )
                .await;
                ("imap", outcome)
            }
        };

    match outcome {
        Ok(()) => Ok(Json(json!({
            "success": true,
            "message": format!("Email deleted successfully via {}.",
                if mode == "graph" { "Graph API" } else { "IMAP" }),
            "mode": mode,
            "messageId": message_id,
            "timestamp": timestamp(),
        }))
        .into_response()),
        Err(AppError::NotFound(details)) => {
            tracing::debug!(%details, "message not found");
            Ok((
                StatusCode::NOT_FOUND,
                Json(json!({
                    "success": false,
                    "error": "Email not found",
                    "mode": mode,
                    "messageId": message_id,
                })),
            )
                .into_response())
        }
        Err(e) => {
            let status = e.status_code();
            if status.is_server_error() {
                tracing::error!(error = %e, mode, "delete failed");
            }
            Ok((
                status,
                Json(json!({
                    "success": false,
                    "error": e.category(),
                    "details": e.details(),
                    "mode": mode,
                    "messageId": message_id,
                })),
            )
                .into_response())
        }
    }
}

/// Send one message via the Graph backend
///
/// There is no IMAP fallback for sending; the legacy protocol has no send
/// primitive.
async fn send_mail(
    State(state): State<AppState>,
    params: RequestParams,
) -> Result<Json<serde_json::Value>, AppError> {
    check_password(&state.config, &params)?;
    let [refresh_token, client_id, _email, to, subject] = require_params([
        ("refresh_token", &params.refresh_token),
        ("client_id", &params.client_id),
        ("email", &params.email),
        ("to", &params.to),
        ("subject", &params.subject),
    ])?;
    let message = OutgoingMessage {
        to: to.to_owned(),
        subject: subject.to_owned(),
        text: params.text.clone(),
        html: params.html.clone(),
    };
    // Validates recipients and body presence before any upstream call.
    message.to_graph_payload()?;

    let token =
        oauth::exchange_refresh_token(&state.http, &state.config, refresh_token, client_id, None)
            .await?;
    let client = GraphClient::new(
        state.http.clone(),
        state.config.graph_base.clone(),
        token.access_token,
    );
    client.send_message(&message).await?;

    // Graph sendMail returns no id; generate a receipt for the caller.
    Ok(Json(json!({
        "message": "Email sent successfully",
        "messageId": uuid::Uuid::new_v4().to_string(),
    })))
}

/// Report which backends the credential supports
async fn token_info(
    State(state): State<AppState>,
    params: RequestParams,
) -> Result<Json<serde_json::Value>, AppError> {
    check_password(&state.config, &params)?;
    let [refresh_token, client_id] = require_params([
        ("refresh_token", &params.refresh_token),
        ("client_id", &params.client_id),
    ])?;

    let (graph_probe, imap_probe) = tokio::join!(
        oauth::probe_graph_detail(&state.http, &state.config, refresh_token, client_id),
        oauth::probe_imap_detail(&state.http, &state.config, refresh_token, client_id),
    );

    let mut supported_modes = Vec::new();
    if graph_probe.supported {
        supported_modes.push("graph");
    }
    if imap_probe.supported {
        supported_modes.push("imap");
    }
    let primary_mode = supported_modes.first().copied().unwrap_or("unknown");

    let any_backend = graph_probe.supported || imap_probe.supported;
    let features = FeatureMatrix {
        read_emails: any_backend,
        delete_emails: any_backend,
        send_emails: graph_probe.supported,
        clear_inbox: any_backend,
        clear_junk: any_backend,
    };
    let recommendation = match (graph_probe.supported, imap_probe.supported) {
        (true, true) => "Token supports both Graph API and IMAP; Graph API is preferred.",
        (true, false) => "Token supports Graph API; all features are available.",
        (false, true) => "Token supports IMAP only; sending is unavailable.",
        (false, false) => "Token supports no mail operation; check application permissions.",
    };

    tracing::info!(primary_mode, ?supported_modes, "token capability probe complete");
    Ok(Json(json!({
        "success": true,
        "tokenInfo": {
            "primaryMode": primary_mode,
            "supportedModes": supported_modes,
            "email": params.email.as_deref().unwrap_or("not_provided"),
            "capabilities": {
                "graphApi": capability_report(&graph_probe),
                "imap": capability_report(&imap_probe),
            },
            "features": features,
            "recommendations": [recommendation],
        },
        "timestamp": timestamp(),
    })))
}

fn capability_report(probe: &oauth::BackendProbe) -> CapabilityReport {
    CapabilityReport {
        supported: probe.supported,
        scope: probe.scope.clone(),
        permissions: probe.permissions.clone(),
        error: probe.error.clone(),
    }
}
