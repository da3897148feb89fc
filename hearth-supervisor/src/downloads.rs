//! Download/install orchestration, one job per target at a time

use crate::error::{Result, SupervisorError};
use crate::manager::ProcessManager;
use chrono::Utc;
use futures::FutureExt;
use hearth_core::config::DownloadSettings;
use hearth_core::error::HearthError;
use hearth_core::jobs::{DownloadJob, DownloadRequest, JobHandle};
use hearth_core::model::ServerUpdate;
use hearth_core::provider::ServerProvider;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Runs provider acquisitions as background jobs.
///
/// While a job runs its target is marked provisioning on the
/// [`ProcessManager`], which refuses lifecycle calls for it.
pub struct DownloadManager {
    manager: Arc<ProcessManager>,
    settings: DownloadSettings,
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
    /// Orders marking a target provisioning against a finished job releasing it
    handoff: Mutex<()>,
}

impl DownloadManager {
    pub fn new(manager: Arc<ProcessManager>, settings: DownloadSettings) -> Arc<Self> {
        Arc::new(Self {
            manager,
            settings,
            jobs: Mutex::new(HashMap::new()),
            handoff: Mutex::new(()),
        })
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<JobHandle>>> {
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn handoff(&self) -> MutexGuard<'_, ()> {
        self.handoff.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin acquiring an artifact for a target; returns the pending job
    pub async fn start_download(self: &Arc<Self>, mut request: DownloadRequest) -> Result<DownloadJob> {
        let record = self.manager.store().get_server(&request.target_id).await?;
        // Installers run on the JDK the server itself is configured with
        if request.java_path.is_none() {
            request.java_path = Some(record.java_path.clone());
        }
        let provider = self.manager.providers().get(request.kind)?;

        let job = {
            let mut jobs = self.jobs();
            if let Some(active) = jobs
                .values()
                .find(|j| j.target_id() == request.target_id && !j.is_terminal())
            {
                return Err(SupervisorError::DownloadInProgress {
                    target_id: request.target_id.clone(),
                    job_id: active.id(),
                });
            }

            jobs.retain(|_, j| !(j.is_terminal() && j.target_id() == request.target_id));

            let job = Arc::new(JobHandle::new(&request));
            jobs.insert(job.id(), job.clone());
            job
        };

        {
            let _handoff = self.handoff();
            self.manager.set_provisioning(&request.target_id);
        }

        let snapshot = job.snapshot();
        info!(
            target_id = %request.target_id,
            job_id = %snapshot.id,
            kind = %request.kind,
            version = %request.version,
            "Download started"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_job(job, provider, record.directory, request).await;
        });

        Ok(snapshot)
    }

    async fn run_job(
        &self,
        job: Arc<JobHandle>,
        provider: Arc<dyn ServerProvider>,
        directory: PathBuf,
        request: DownloadRequest,
    ) {
        let job_id = job.id();
        let acquired = AssertUnwindSafe(provider.acquire_artifact(&request, &directory, &job))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(HearthError::Other("Acquisition task panicked".to_string())));

        let outcome = match acquired {
            Ok(path) => match job.checkpoint() {
                Ok(()) => self.persist(&request, &path).await.map(|_| path),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        // The job turns terminal first, so a cancel racing the finish is
        // refused rather than accepted and then ignored
        match outcome {
            Ok(path) => {
                job.complete(path.clone());
                info!(
                    target_id = %request.target_id,
                    job_id = %job_id,
                    path = %path.display(),
                    "Download completed"
                );
            }
            Err(e) if e.is_cancelled() => {
                job.fail(HearthError::Cancelled.to_string());
                info!(target_id = %request.target_id, job_id = %job_id, "Download cancelled");
            }
            Err(e) => {
                job.log(format!("Error: {}", e));
                job.fail(e.to_string());
                warn!(target_id = %request.target_id, job_id = %job_id, error = %e, "Download failed");
            }
        }

        self.release(&request.target_id, &job_id);
    }

    /// Clear provisioning unless a newer job already owns the target
    fn release(&self, target_id: &str, job_id: &str) {
        let _handoff = self.handoff();
        let superseded = self
            .jobs()
            .values()
            .any(|j| j.target_id() == target_id && j.id() != job_id && !j.is_terminal());
        if superseded {
            debug!(target_id = %target_id, job_id = %job_id, "Target already taken by a newer job");
            return;
        }
        self.manager.clear_provisioning(target_id);
    }

    /// Record the artifact on the server record
    async fn persist(&self, request: &DownloadRequest, path: &std::path::Path) -> hearth_core::error::Result<()> {
        let version = if request.version.is_empty() || request.version.eq_ignore_ascii_case("latest") {
            None
        } else {
            Some(request.version.clone())
        };
        let update = ServerUpdate {
            kind: Some(request.kind),
            version,
            jar_path: Some(path.to_path_buf()),
            ..Default::default()
        };

        self.manager
            .store()
            .update_server(&request.target_id, update)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                warn!(target_id = %request.target_id, error = %e, "Failed to record downloaded artifact");
            })
    }

    /// Request cancellation; false if the job is unknown or already finished
    pub fn cancel_download(&self, job_id: &str) -> bool {
        let Some(job) = self.jobs().get(job_id).cloned() else {
            return false;
        };
        if job.is_terminal() {
            return false;
        }
        info!(job_id = %job_id, target_id = %job.target_id(), "Cancelling download");
        job.cancel();
        true
    }

    /// Drop finished jobs older than the retention window; returns how many
    pub fn cleanup_old_jobs(&self) -> usize {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(retention)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let mut jobs = self.jobs();
        let before = jobs.len();
        jobs.retain(|_, job| !job.is_terminal() || job.created_at() > cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            debug!(removed, "Cleaned up finished download jobs");
        }
        removed
    }

    pub fn get_job(&self, job_id: &str) -> Option<DownloadJob> {
        self.jobs().get(job_id).map(|job| job.snapshot())
    }

    /// Like [`get_job`](Self::get_job), but an unknown id is an error
    pub fn require_job(&self, job_id: &str) -> Result<DownloadJob> {
        self.get_job(job_id)
            .ok_or_else(|| SupervisorError::JobNotFound(job_id.to_string()))
    }

    /// All retained jobs, oldest first
    pub fn list_jobs(&self) -> Vec<DownloadJob> {
        let mut jobs: Vec<DownloadJob> = self.jobs().values().map(|job| job.snapshot()).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    /// The target's running job, else its most recent one
    pub fn job_for_target(&self, target_id: &str) -> Option<DownloadJob> {
        let jobs = self.jobs();
        let mut candidates: Vec<&Arc<JobHandle>> =
            jobs.values().filter(|job| job.target_id() == target_id).collect();
        candidates.sort_by_key(|job| (!job.is_terminal(), job.created_at()));
        candidates.last().map(|job| job.snapshot())
    }

    /// Run [`cleanup_old_jobs`](Self::cleanup_old_jobs) every `interval` until
    /// the handle is aborted or the manager is dropped
    pub fn spawn_cleanup_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else {
                    break;
                };
                this.cleanup_old_jobs();
            }
        })
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("settings", &self.settings)
            .field("jobs", &self.jobs().len())
            .finish()
    }
}
