//! Download job records and the shared handle providers report through

use crate::error::{HearthError, Result};
use crate::model::ServerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Oldest log lines are dropped past this many
pub const MAX_JOB_LOG_LINES: usize = 500;

/// Phase of an acquisition job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Downloading,
    Installing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `completed` and `failed` never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Downloading => 1,
            JobStatus::Installing => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the job moving forward
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Installing => "installing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What to acquire, and for which target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    pub target_id: String,
    pub kind: ServerKind,
    /// Game version; providers resolve "latest" where the upstream supports it
    pub version: String,
    /// Java executable for providers that run an installer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_path: Option<String>,
}

impl DownloadRequest {
    pub fn new(target_id: impl Into<String>, kind: ServerKind, version: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            kind,
            version: version.into(),
            java_path: None,
        }
    }

    pub fn with_java_path(mut self, java_path: impl Into<String>) -> Self {
        self.java_path = Some(java_path.into());
        self
    }
}

/// Snapshot of one acquisition attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub id: String,
    pub target_id: String,
    pub kind: ServerKind,
    pub version: String,
    pub status: JobStatus,
    /// Percentage, 0 to 100
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transferred_bytes: Option<u64>,
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DownloadJob {
    fn new(request: &DownloadRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: request.target_id.clone(),
            kind: request.kind,
            version: request.version.clone(),
            status: JobStatus::Pending,
            progress: 0,
            total_bytes: None,
            transferred_bytes: None,
            log: Vec::new(),
            result_path: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Shared, mutable view of a job handed to providers.
///
/// Providers update status, progress and log through this handle while the
/// orchestrator and pollers read snapshots of it. The embedded cancellation
/// token is tripped by `cancel()`; long-running work must call `checkpoint()`
/// between phases and wrap network calls in `cancellable()`.
#[derive(Debug)]
pub struct JobHandle {
    job: Mutex<DownloadJob>,
    token: CancellationToken,
}

impl JobHandle {
    /// Create a pending job for a request
    pub fn new(request: &DownloadRequest) -> Self {
        Self {
            job: Mutex::new(DownloadJob::new(request)),
            token: CancellationToken::new(),
        }
    }

    fn with_job<T>(&self, f: impl FnOnce(&mut DownloadJob) -> T) -> T {
        let mut job = self.job.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut job)
    }

    /// Copy of the current job state
    pub fn snapshot(&self) -> DownloadJob {
        self.with_job(|job| job.clone())
    }

    pub fn id(&self) -> String {
        self.with_job(|job| job.id.clone())
    }

    pub fn target_id(&self) -> String {
        self.with_job(|job| job.target_id.clone())
    }

    pub fn status(&self) -> JobStatus {
        self.with_job(|job| job.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.with_job(|job| job.created_at)
    }

    /// Advance the status; returns false (and changes nothing) if that would move backwards
    pub fn set_status(&self, status: JobStatus) -> bool {
        self.with_job(|job| {
            if job.status.can_advance_to(status) {
                debug!(job_id = %job.id, from = %job.status, to = %status, "Job status changed");
                job.status = status;
                true
            } else {
                false
            }
        })
    }

    /// Set progress, clamped to 100
    pub fn set_progress(&self, progress: u8) {
        self.with_job(|job| {
            if !job.status.is_terminal() {
                job.progress = progress.min(100);
            }
        });
    }

    /// Record byte counters of the current transfer
    pub fn set_bytes(&self, transferred: u64, total: Option<u64>) {
        self.with_job(|job| {
            job.transferred_bytes = Some(transferred);
            if total.is_some() {
                job.total_bytes = total;
            }
        });
    }

    /// Append a log line
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        self.with_job(|job| {
            debug!(job_id = %job.id, "{}", line);
            job.log.push(line);
            if job.log.len() > MAX_JOB_LOG_LINES {
                let excess = job.log.len() - MAX_JOB_LOG_LINES;
                job.log.drain(..excess);
            }
        });
    }

    /// Mark the job completed with its artifact
    pub fn complete(&self, path: PathBuf) -> bool {
        self.with_job(|job| {
            if job.status.is_terminal() {
                return false;
            }
            job.result_path = Some(path);
            job.status = JobStatus::Completed;
            job.progress = 100;
            true
        })
    }

    /// Mark the job failed
    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        self.with_job(|job| {
            if job.status.is_terminal() {
                return false;
            }
            job.status = JobStatus::Failed;
            job.error = Some(error);
            true
        })
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token observed by in-flight work
    pub fn cancellation(&self) -> &CancellationToken {
        &self.token
    }

    /// Fail fast if cancellation was requested
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(HearthError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `fut`, aborting it as soon as cancellation is requested
    pub async fn cancellable<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(HearthError::Cancelled),
            result = fut => result,
        }
    }
}
