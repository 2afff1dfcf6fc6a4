// Error handling module
// Defines the error taxonomy surfaced by the request pipeline and services

use thiserror::Error;

/// Errors that can occur while talking to the classroom API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Server rejected the session (401). Tokens have been cleared.
    #[error("Unauthorized: session expired, please log in again")]
    Unauthorized,

    /// Session was taken over by another device (generic 403). Tokens have been cleared.
    #[error("Session replaced: logged in on another device")]
    SessionReplaced,

    /// Step-up verification succeeded but the replayed request was rejected again
    #[error("Step-up verification required again after retry")]
    StepUpExhausted,

    /// Step-up verification failed
    #[error("Step-up verification failed: {0}")]
    StepUpFailed(String),

    /// User dismissed the step-up verification
    #[error("Step-up verification cancelled")]
    StepUpCancelled,

    /// Error response from the classroom API
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Client-side timeout, no response received
    #[error("Request timeout")]
    Timeout,

    /// Connection failure or other transport error
    #[error("Network error: {0}")]
    Network(String),

    /// Request validation error, raised before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Errors after which the user must log in again
    pub fn is_session_terminal(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::SessionReplaced)
    }

    /// Errors raised by the step-up flow
    pub fn is_step_up(&self) -> bool {
        matches!(
            self,
            ApiError::StepUpExhausted | ApiError::StepUpFailed(_) | ApiError::StepUpCancelled
        )
    }

    /// HTTP status associated with the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized => Some(401),
            ApiError::SessionReplaced | ApiError::StepUpExhausted => Some(403),
            ApiError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
