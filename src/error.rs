//! Error types for API and realtime access
//!
//! Errors are classified by how the client should react:
//! - Retryable: network failures, timeouts, rate limits, server errors
//! - Reauth: expired or rejected credentials (handled by forced logout)
//! - Surfaced: everything else becomes the owning store's error message

use serde_json::Value;
use thiserror::Error;

/// Shown when neither a structured API message nor an exception message exists.
pub const UNKNOWN_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Defaults used when an error response body is not the `{code, message}` shape.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN_ERROR";
pub const UNKNOWN_ERROR_BODY_MESSAGE: &str = "An unknown error occurred";

/// Error type for everything that goes through the transport layer
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http {
        status: u16,
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Session expired")]
    AuthExpired,

    #[error("Realtime connection is not open")]
    NotConnected,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ApiError {
    /// Build a structured error from a non-2xx response body.
    ///
    /// Accepts `{code, message, details}` or the same shape nested under
    /// `error`. Anything else falls back to the generic unknown-error shape.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let payload = parsed.as_ref().map(|value| match value.get("error") {
            Some(inner) if inner.is_object() => inner,
            _ => value,
        });

        let code = payload
            .and_then(|p| p.get("code"))
            .and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string());

        let message = payload
            .and_then(|p| p.get("message").or_else(|| p.get("error")))
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_ERROR_BODY_MESSAGE.to_string());

        let details = payload
            .and_then(|p| p.get("details"))
            .filter(|d| !d.is_null())
            .cloned();

        ApiError::Http {
            status,
            code,
            message,
            details,
        }
    }

    /// HTTP status for structured errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if repeating the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) => true,
            ApiError::Http { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    /// Returns true if the user has to sign in again
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ApiError::AuthExpired | ApiError::Http { status: 401, .. })
    }

    /// Human-readable message for a store's error field.
    ///
    /// Prefers the server-supplied message, then the error's own text, then
    /// [`UNKNOWN_ERROR_MESSAGE`].
    pub fn user_message(&self) -> String {
        let text = match self {
            ApiError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        };
        if text.trim().is_empty() {
            UNKNOWN_ERROR_MESSAGE.to_string()
        } else {
            text
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Parse(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}

impl From<crate::storage::StorageError> for ApiError {
    fn from(err: crate::storage::StorageError) -> Self {
        ApiError::Storage(err.to_string())
    }
}
