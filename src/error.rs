//! Error types for the viewer core

/// Result type alias using the viewer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during a connection attempt or while connected
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling request failed or returned a non-success status
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Local offer creation or session description commit failed
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Underlying transport reported a terminal failure after connecting
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should trigger an automatic reconnect
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Signaling(_) | Error::Negotiation(_) | Error::Connectivity(_) | Error::Io(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}
