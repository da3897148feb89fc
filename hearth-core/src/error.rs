//! Error types for Hearth operations

use crate::model::ServerKind;

/// Result type for Hearth operations
pub type Result<T> = std::result::Result<T, HearthError>;

/// Error types for the Hearth core
#[derive(Debug, thiserror::Error)]
pub enum HearthError {
    /// No server record exists for the target id
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// No provider is registered for a server kind
    #[error("No provider registered for server kind: {0}")]
    UnsupportedKind(ServerKind),

    /// Upstream service failure (HTTP status, malformed metadata)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Downloaded artifact did not match its published digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Published digest
        expected: String,
        /// Digest of the bytes received
        actual: String,
    },

    /// Installer process failed
    #[error("Installer failed: {0}")]
    Installer(String),

    /// Acquisition was cancelled
    #[error("Cancelled")]
    Cancelled,

    /// Record store error
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Coarse error taxonomy shared by every Hearth crate.
///
/// Outer layers map these onto their own response codes; the core itself
/// never retries on any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Duplicate or conflicting request (already active, port in use, download in progress)
    Conflict,
    /// Unknown target or job
    NotFound,
    /// On-disk installation is unusable
    InvalidInstallation,
    /// Network or integrity failure during acquisition
    Upstream,
    /// Child process failed to spawn or exited unexpectedly
    Process,
    /// Expected, user-initiated cancellation
    Cancelled,
    /// Anything else
    Internal,
}

impl HearthError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            HearthError::ServerNotFound(_) => ErrorKind::NotFound,
            HearthError::Upstream(_)
            | HearthError::ChecksumMismatch { .. }
            | HearthError::Http(_) => ErrorKind::Upstream,
            HearthError::Installer(_) => ErrorKind::Process,
            HearthError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether this error represents a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HearthError::Cancelled)
    }
}

impl From<String> for HearthError {
    fn from(s: String) -> Self {
        HearthError::Other(s)
    }
}

impl From<&str> for HearthError {
    fn from(s: &str) -> Self {
        HearthError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for HearthError {
    fn from(err: anyhow::Error) -> Self {
        HearthError::Other(err.to_string())
    }
}
