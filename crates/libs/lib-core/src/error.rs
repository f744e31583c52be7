//! # Centralized Error Handling
//!
//! This module defines the relay-wide error type [`AppError`]. Every boundary
//! (store, registry, generator, socket driver) returns [`Result`] so each call site
//! decides whether a failure is fatal, degraded or ignorable.
//!
//! ## Error Categories
//!
//! 1. **Client Errors** (4xx)
//!    - [`InvalidInput`](AppError::InvalidInput) → 400 Bad Request (malformed frame, bad session id)
//!
//! 2. **External Service Errors**
//!    - [`Ai`](AppError::Ai) → 502 Bad Gateway (provider, network, quota, empty response)
//!
//! 3. **Server Errors** (5xx)
//!    - [`Config`](AppError::Config), [`Database`](AppError::Database),
//!      [`Transport`](AppError::Transport), [`Internal`](AppError::Internal) → 500
//!
//! ## Usage Example
//!
//! ```rust
//! use lib_core::error::{AppError, Result};
//!
//! fn check_username(name: &str) -> Result<&str> {
//!     if name.trim().is_empty() {
//!         return Err(AppError::InvalidInput("username must not be empty".to_string()));
//!     }
//!     Ok(name)
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Convenience type alias for `Result<T, AppError>`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Relay-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration error during startup or environment loading.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage engine failure (connection, query, pool closed).
    #[error("Database error: {0}")]
    Database(String),

    /// Malformed or invalid client input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// External AI service failure.
    #[error("AI service error: {0}")]
    Ai(String),

    /// A frame could not be delivered to a connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Ai(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Transport(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing message that does not leak internals.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidInput(msg) => msg.clone(),
            AppError::Ai(_) => "Service temporarily unavailable".to_string(),
            AppError::Config(_)
            | AppError::Database(_)
            | AppError::Transport(_)
            | AppError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "Config",
            AppError::Database(_) => "Database",
            AppError::InvalidInput(_) => "InvalidInput",
            AppError::Ai(_) => "Ai",
            AppError::Transport(_) => "Transport",
            AppError::Internal(_) => "Internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_client_error() {
            tracing::debug!("Client error: {}", self);
        } else {
            tracing::error!("Server error: {}", self);
        }

        let body = Json(json!({
            "error": self.user_message(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => AppError::Database(db_err.message().to_string()),
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("Malformed JSON: {}", err))
    }
}
