use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("backend not configured")]
    NotConfigured,

    #[error("network error: {0}")]
    Network(String),

    // =========================================================================
    // Acquisition Errors
    // =========================================================================

    #[error("no QR code found")]
    QrNotFound,

    #[error("screen capture permission denied")]
    PermissionDenied,

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("failed to create scanner window: {0}")]
    WindowCreation(String),

    #[error("scanner window is gone: {0}")]
    WindowGone(String),

    #[error("event transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether an in-flight scan attempt may turn this error into another try.
    ///
    /// Only errors that can never resolve by themselves stop the loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::WindowGone(_) | Error::NotConfigured | Error::PermissionDenied
        )
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
