//! Error types for backend requests.
//!
//! Provides structured error classification and the message shown to the
//! user for each failure.

use thiserror::Error;

use super::validation::ValidationError;
use crate::session::SessionError;

/// Shown when the server gave no usable message.
pub const GENERIC_NETWORK_MESSAGE: &str = "Network error. Please try again.";

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input rejected before any request was sent
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Session precondition failed (busy, not signed in)
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Failed to reach the server
    #[error("Connection to '{endpoint}' failed: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded total timeout
    #[error("Request to '{endpoint}' timed out after {duration}s")]
    Timeout { endpoint: String, duration: u64 },

    /// Server answered with a non-2xx status
    #[error("Server returned {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Status { status: u16, message: Option<String> },

    /// Server answered 2xx but flagged `success: false`
    #[error("Request rejected: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected { message: Option<String> },

    /// Response body did not match the expected shape
    #[error("Failed to decode response from '{endpoint}': {reason}")]
    Decode { endpoint: String, reason: String },

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Get error type string for logs and presentation
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Session(_) => "session_error",
            ApiError::Network { .. } => "network_error",
            ApiError::Timeout { .. } => "timeout",
            ApiError::Status { .. } => "status_error",
            ApiError::Rejected { .. } => "rejected",
            ApiError::Decode { .. } => "decode_error",
            ApiError::InvalidRequest(_) => "invalid_request",
        }
    }

    /// Message for a transient notice.
    ///
    /// Server-provided text wins; transport failures get the generic fallback.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Validation(e) => e.to_string(),
            ApiError::Session(e) => e.to_string(),
            ApiError::Status {
                message: Some(message),
                ..
            }
            | ApiError::Rejected {
                message: Some(message),
            } if !message.trim().is_empty() => message.clone(),
            _ => GENERIC_NETWORK_MESSAGE.to_string(),
        }
    }

    /// True when the server looked at the request and refused it.
    ///
    /// Transport failures, timeouts and 5xx answers are not rejections.
    pub fn is_rejection(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => (400..500).contains(status),
            ApiError::Rejected { .. } => true,
            _ => false,
        }
    }
}
