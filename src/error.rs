// Error handling module
// Defines the error types surfaced to API callers

use reqwest::StatusCode;
use thiserror::Error;

/// Errors from the key-value token storage
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite backend failure
    #[error("SQLite storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Could not serialize a value before writing it
    #[error("Failed to encode stored value: {0}")]
    Encode(#[from] serde_json::Error),

    /// Could not create the storage directory
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage lock was poisoned by a panicking writer
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Errors from the token refresh and login endpoints
///
/// `Clone` so every request waiting on a shared refresh can observe the same outcome.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RefreshError {
    /// Refresh endpoint unreachable
    #[error("Refresh request failed ({kind}): {message}")]
    Transport { kind: &'static str, message: String },

    /// Refresh endpoint answered with a non-2xx status
    #[error("Refresh endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON
    #[error("Failed to parse refresh response: {0}")]
    Decode(String),

    /// Response did not carry `data.accessToken`
    #[error("Refresh response does not contain accessToken")]
    MissingAccessToken,

    /// Login response did not carry `data.refreshToken`
    #[error("Login response does not contain refreshToken")]
    MissingRefreshToken,

    /// Refresh succeeded but the new credentials could not be persisted
    #[error("Failed to persist refreshed credentials: {0}")]
    Storage(String),

    /// Refresh task panicked before settling
    #[error("Token refresh aborted: {0}")]
    Aborted(String),
}

/// API errors returned by [`crate::http_client::ApiClient`]
#[derive(Error, Debug)]
pub enum ApiError {
    /// Network-level failure (DNS, connect, timeout, broken body)
    #[error("HTTP request failed ({kind}): {message}")]
    Transport { kind: &'static str, message: String },

    /// Backend answered with a non-2xx status
    #[error("API error: {status} - {body}")]
    Status { status: u16, body: String },

    /// Response body could not be decoded as requested
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Path could not be joined onto the base URL
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// Local credential storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Login or logout could not be completed
    #[error("Authentication failed: {0}")]
    Auth(String),
}

impl ApiError {
    /// HTTP status carried by this error, if the backend answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// True only for a backend 401 response
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Status { status: 401, .. })
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        ApiError::Auth(err.to_string())
    }
}

/// Categorize a transport error for logs and error messages
pub fn transport_kind(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport {
            kind: transport_kind(&e),
            message: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(e: reqwest::Error) -> Self {
        RefreshError::Transport {
            kind: transport_kind(&e),
            message: e.to_string(),
        }
    }
}

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;
