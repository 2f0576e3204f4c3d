use thiserror::Error;

/// Main error type for chain operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Layer stopped: {0}")]
    Stopped(String),

    #[error("Flusher not started: {0}")]
    NotStarted(String),

    #[error("Flusher already started: {0}")]
    AlreadyStarted(String),

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Remote rejected request: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl CacheError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::Remote(_) | Self::IOError(_)
        )
    }
}

impl From<bincode::error::EncodeError> for CacheError {
    fn from(e: bincode::error::EncodeError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for CacheError {
    fn from(e: bincode::error::DecodeError) -> Self {
        CacheError::SerializationError(e.to_string())
    }
}

/// Result type alias for chain operations
pub type Result<T> = std::result::Result<T, CacheError>;
