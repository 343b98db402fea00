use thiserror::Error;

/// Application-wide error types for harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request returned a non-success status.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The target site refused the request (403/429 or a challenge page).
    #[error("Access denied by {host}: {reason}")]
    AccessDenied { host: String, reason: String },

    /// Source disabled or misconfigured. Fatal at construction time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Cache or selector-file I/O failed. Never fatal; callers degrade.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A fetched page could not be parsed into the expected shape.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    ///
    /// Access denials are deliberately not retryable: hammering a host that
    /// just served a challenge page makes the block worse, not better.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("HTTP 5")
                    || msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
            }
            _ => false,
        }
    }
}
