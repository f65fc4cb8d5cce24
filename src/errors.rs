//! Application error model with HTTP response mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error
//! handling, and maps each variant to an HTTP status with a uniform JSON
//! `{error, details}` body via axum's `IntoResponse`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the gateway may encounter. Each variant maps to an
/// HTTP status code in [`IntoResponse`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (missing parameters, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Shared-secret or upstream authentication failure
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Resource not found (message, folder)
    #[error("not found: {0}")]
    NotFound(String),
    /// Upstream failure (token endpoint, Graph API, IMAP server)
    #[error("upstream error: {0}")]
    Upstream(String),
    /// Operation timeout (wall-clock budget, TCP connect, TLS handshake)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status code for this error
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → 400
    /// - `AuthFailed` → 401
    /// - `NotFound` → 404
    /// - `Upstream`, `Timeout`, `Internal` → 500
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) | Self::Timeout(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short category label used as the `error` field of the JSON body
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "Missing or invalid parameters",
            Self::AuthFailed(_) => "Authentication failed",
            Self::NotFound(_) => "Not found",
            Self::Upstream(_) => "Upstream error",
            Self::Timeout(_) => "Operation timeout",
            Self::Internal(_) => "Internal error",
        }
    }

    /// Human-readable detail text sourced from the underlying failure
    pub fn details(&self) -> &str {
        match self {
            Self::InvalidInput(msg)
            | Self::AuthFailed(msg)
            | Self::NotFound(msg)
            | Self::Upstream(msg)
            | Self::Timeout(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": self.category(),
            "details": self.details(),
        });
        (status, Json(body)).into_response()
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;
    use axum::http::StatusCode;

    #[test]
    fn variants_map_to_expected_status_codes() {
        let cases = [
            (AppError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (AppError::AuthFailed("x".into()), StatusCode::UNAUTHORIZED),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                AppError::Upstream("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Timeout("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_code(), status);
        }
    }

    #[test]
    fn details_carry_the_underlying_message() {
        let err = AppError::Upstream("token endpoint said no".into());
        assert_eq!(err.details(), "token endpoint said no");
    }
}
