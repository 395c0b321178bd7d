//! Error types for the remote protocol client

use thiserror::Error;

use crate::status::RemoteStatus;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur talking to the tax authority
#[derive(Debug, Error)]
pub enum ClientError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] dte_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Connection-level failure of a single attempt
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response envelope could not be understood
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Every attempt failed at the transport level
    #[error("No response from {operation} after {attempts} attempts: {}", .errors.join("; "))]
    NoResponse {
        operation: String,
        attempts: u32,
        errors: Vec<String>,
    },

    /// Well-formed fault returned by the remote service
    #[error("SOAP fault {code}: {message}")]
    SoapFault { code: String, message: String },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Seed or token exchange refused
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The upload receipt carried a non-zero status
    #[error("Upload rejected: {} ({})", .0.description, .0.code)]
    UploadRejected(Box<RemoteStatus>),

    /// Tracking id missing or not numeric
    #[error("Invalid tracking id: {0:?}")]
    InvalidTrackId(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::MalformedResponse(_)
        )
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}
