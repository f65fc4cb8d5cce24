//! Request/response DTOs and the method-agnostic parameter extractor
//!
//! Every endpoint accepts the same flat parameter bag via GET query string
//! or POST body (JSON or form-encoded). [`RequestParams`] implements
//! `FromRequest` so handlers receive one type regardless of method.

use axum::extract::{FromRequest, Query, Request};
use axum::http::{Method, header};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Flat parameter bag shared by all endpoints
///
/// All fields are optional at the transport layer; each handler names its
/// required subset via [`require_params`] so the 400 body lists exactly
/// what is missing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestParams {
    /// Long-lived refresh credential
    pub refresh_token: Option<String>,
    /// OAuth2 application (client) id
    pub client_id: Option<String>,
    /// Mailbox address, used as the XOAUTH2 user
    pub email: Option<String>,
    /// Shared-secret gate, checked when the gateway has one configured
    pub password: Option<String>,
    /// Graph message id or RFC 5322 Message-ID header value
    pub message_id: Option<String>,
    /// IMAP folder for single delete (defaults to INBOX)
    pub mailbox: Option<String>,
    /// Comma-separated recipient list
    pub to: Option<String>,
    /// Message subject
    pub subject: Option<String>,
    /// Plain-text body
    pub text: Option<String>,
    /// HTML body (preferred over `text` when both are present)
    pub html: Option<String>,
}

impl<S> FromRequest<S> for RequestParams
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if req.method() == Method::GET {
            let Query(params) = Query::<RequestParams>::try_from_uri(req.uri())
                .map_err(|e| AppError::InvalidInput(format!("invalid query string: {e}")))?;
            return Ok(params);
        }

        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(params) = Json::<RequestParams>::from_request(req, state)
                .await
                .map_err(|e| AppError::InvalidInput(format!("invalid JSON body: {e}")))?;
            Ok(params)
        } else {
            let Form(params) = Form::<RequestParams>::from_request(req, state)
                .await
                .map_err(|e| AppError::InvalidInput(format!("invalid form body: {e}")))?;
            Ok(params)
        }
    }
}

/// Validate that the named fields are present and non-empty
///
/// Returns the trimmed field values in declaration order. The error message
/// lists every missing field so a client can fix the request in one round
/// trip.
pub fn require_params<'a, const N: usize>(
    fields: [(&str, &'a Option<String>); N],
) -> AppResult<[&'a str; N]> {
    let mut values = Vec::with_capacity(N);
    let mut missing = Vec::new();
    for (name, value) in fields {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => values.push(v),
            _ => missing.push(name),
        }
    }
    if !missing.is_empty() {
        return Err(AppError::InvalidInput(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }
    values
        .try_into()
        .map_err(|_| AppError::Internal("parameter arity mismatch".to_owned()))
}

/// Batch outcome counts for bulk operations
///
/// `total` is the number of matched items; `deleted + failed` accounts for
/// every item that was attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Items matched by the listing/search
    pub total: usize,
    /// Items successfully deleted
    pub deleted: usize,
    /// Items whose delete failed (batch continues regardless)
    pub failed: usize,
}

impl BatchStats {
    /// Stats for an empty folder (reported as success, not an error)
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Backend capability detail in the token-info response
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityReport {
    /// Whether this backend may be used with the supplied credential
    pub supported: bool,
    /// Granted scope string, when the probe exchange succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Per-permission flags derived from the granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<serde_json::Value>,
    /// Probe failure detail, when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Feature availability matrix derived from the two capability probes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMatrix {
    pub read_emails: bool,
    pub delete_emails: bool,
    /// Sending requires Graph; there is no IMAP send primitive here
    pub send_emails: bool,
    pub clear_inbox: bool,
    pub clear_junk: bool,
}
