//! Error taxonomy shared by every tracking API backend
//!
//! Only [`ApiError::Unauthorized`] and [`ApiError::Validation`] stop an
//! operation outright. Everything else degrades to a partial or placeholder
//! state at the call site.

use chrono::NaiveDateTime;
use thiserror::Error;

/// Message used when a failure carries no server-provided text
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong, please try again";

#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP 401 from the remote API. The session must be cleared.
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Non-2xx response other than 401
    #[error("{message}")]
    Service { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn service(status: u16, message: Option<String>) -> Self {
        ApiError::Service {
            status,
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE_MESSAGE.to_string()),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Text to show the user for this failure
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized => "Your session has expired, please log in again".to_string(),
            ApiError::Validation(e) => e.to_string(),
            ApiError::Service { message, .. } => message.clone(),
            ApiError::Transport(_) | ApiError::Decode(_) => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// User input that fails a precondition. Never sent to the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select a device")]
    NoDeviceSelected,

    #[error("The start date ({from}) must not be after the end date ({to})")]
    InvertedRange { from: NaiveDateTime, to: NaiveDateTime },

    #[error("Passwords do not match")]
    PasswordMismatch,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}
