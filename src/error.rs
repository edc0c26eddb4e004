//! Error types for the zipnum read path

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error for '{location}': {message}")]
    Http { location: String, message: String },

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Reader for '{0}' was force-closed")]
    ReaderClosed(String),

    #[error("No location could serve part '{part}': {reason}")]
    LocationUnavailable { part: String, reason: String },
}

impl IndexError {
    /// Stable error code for callers that report errors over a wire or in logs
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Io(_) => "IO_ERROR",
            IndexError::Json(_) => "JSON_ERROR",
            IndexError::Http { .. } => "HTTP_ERROR",
            IndexError::InvalidFormat(_) => "INVALID_FORMAT",
            IndexError::InvalidConfig(_) => "INVALID_CONFIG",
            IndexError::ReaderClosed(_) => "READER_CLOSED",
            IndexError::LocationUnavailable { .. } => "LOCATION_UNAVAILABLE",
        }
    }

    /// True for errors raised while fetching bytes from one location.
    ///
    /// These are the errors the block aggregator fails over on.
    pub fn is_fetch_error(&self) -> bool {
        matches!(
            self,
            IndexError::Io(_) | IndexError::Http { .. } | IndexError::ReaderClosed(_)
        )
    }
}
