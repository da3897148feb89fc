//! Error types for supervisor operations

use hearth_core::error::{ErrorKind, HearthError};
use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Server {0} is already active")]
    AlreadyActive(String),

    #[error("Server {0} is being provisioned")]
    Provisioning(String),

    #[error("Server {0} is not running")]
    NotRunning(String),

    #[error("Server {0} has no active process")]
    NoActiveProcess(String),

    #[error("Port {0} is already in use")]
    PortInUse(u16),

    #[error("Invalid installation: {0}")]
    InvalidInstallation(String),

    #[error("Download {job_id} already in progress for server {target_id}")]
    DownloadInProgress { target_id: String, job_id: String },

    #[error("Download job not found: {0}")]
    JobNotFound(String),

    #[error("Failed to spawn server process: {0}")]
    Spawn(String),

    #[error(transparent)]
    Core(#[from] HearthError),
}

impl SupervisorError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SupervisorError::AlreadyActive(_)
            | SupervisorError::Provisioning(_)
            | SupervisorError::NotRunning(_)
            | SupervisorError::NoActiveProcess(_)
            | SupervisorError::PortInUse(_)
            | SupervisorError::DownloadInProgress { .. } => ErrorKind::Conflict,
            SupervisorError::JobNotFound(_) => ErrorKind::NotFound,
            SupervisorError::InvalidInstallation(_) => ErrorKind::InvalidInstallation,
            SupervisorError::Spawn(_) => ErrorKind::Process,
            SupervisorError::Core(err) => err.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(SupervisorError::PortInUse(25565).kind(), ErrorKind::Conflict);
        assert_eq!(
            SupervisorError::DownloadInProgress {
                target_id: "srv-1".into(),
                job_id: "job".into()
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            SupervisorError::from(HearthError::ServerNotFound("srv-1".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            SupervisorError::InvalidInstallation("no jar".into()).kind(),
            ErrorKind::InvalidInstallation
        );
    }

    #[test]
    fn test_core_errors_are_transparent() {
        let err = SupervisorError::from(HearthError::Cancelled);
        assert_eq!(err.to_string(), "Cancelled");
    }
}
