//! Download orchestration against scripted providers

mod common;

use common::{Acquisition, FakeAcquirer, download_settings, manager_with};
use hearth_core::config::DownloadSettings;
use hearth_core::jobs::{DownloadJob, DownloadRequest, JobStatus};
use hearth_core::model::{ServerKind, ServerRecord, StatusKind};
use hearth_core::store::ServerStore;
use hearth_supervisor::{DownloadManager, ProcessManager, SupervisorError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn record(id: &str, dir: &Path) -> ServerRecord {
    ServerRecord::new(id, ServerKind::Vanilla, "1.20.4", dir)
}

fn paper(id: &str, version: &str) -> DownloadRequest {
    DownloadRequest::new(id, ServerKind::Paper, version)
}

async fn wait_terminal(downloads: &DownloadManager, job_id: &str) -> DownloadJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = downloads.require_job(job_id).unwrap();
        if job.status.is_terminal() {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job {} never finished", job_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Provisioning is released just after the job turns terminal
async fn wait_released(manager: &ProcessManager, target_id: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.is_provisioning(target_id) {
        assert!(tokio::time::Instant::now() < deadline, "{} still provisioning", target_id);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn setup(
    acquisition: Acquisition,
    dir: &Path,
    settings: DownloadSettings,
) -> (
    Arc<hearth_core::store::InMemoryStore>,
    Arc<ProcessManager>,
    Arc<DownloadManager>,
) {
    let (store, manager) = manager_with([record("alpha", dir)], vec![Arc::new(FakeAcquirer(acquisition))]);
    let downloads = DownloadManager::new(manager.clone(), settings);
    (store, manager, downloads)
}

#[tokio::test]
async fn successful_download_records_artifact_on_server() {
    let dir = tempfile::tempdir().unwrap();
    let (store, manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let pending = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
    assert!(manager.is_provisioning("alpha"));

    let job = wait_terminal(&downloads, &pending.id).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.result_path.as_deref(), Some(dir.path().join("server.jar").as_path()));
    assert!(job.error.is_none());
    wait_released(&manager, "alpha").await;

    let stored = store.get_server("alpha").await.unwrap();
    assert_eq!(stored.kind, ServerKind::Paper);
    assert_eq!(stored.version, "1.21.1");
    assert_eq!(stored.jar_path, job.result_path);
}

#[tokio::test]
async fn cancelling_completed_job_leaves_it_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let pending = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    let done = wait_terminal(&downloads, &pending.id).await;
    assert_eq!(done.status, JobStatus::Completed);

    assert!(!downloads.cancel_download(&pending.id));

    let job = downloads.get_job(&pending.id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.error.is_none());
    assert_eq!(job.result_path, done.result_path);
    assert_eq!(job.log, done.log);
    wait_released(&manager, "alpha").await;
}

#[tokio::test]
async fn back_to_back_downloads_keep_target_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    for _ in 0..20 {
        let first = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
        wait_terminal(&downloads, &first.id).await;

        // The first job may still be releasing the target
        let second = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
        assert!(manager.is_provisioning("alpha"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(manager.is_provisioning("alpha"));

        wait_terminal(&downloads, &second.id).await;
        wait_released(&manager, "alpha").await;
    }
}

#[tokio::test]
async fn acquisition_uses_server_java() {
    let dir = tempfile::tempdir().unwrap();
    let mut alpha = record("alpha", dir.path());
    alpha.java_path = "/opt/jdk-21/bin/java".to_string();
    let (_store, manager) = manager_with([alpha], vec![Arc::new(FakeAcquirer(Acquisition::Succeed))]);
    let downloads = DownloadManager::new(manager, download_settings());

    let pending = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    let job = wait_terminal(&downloads, &pending.id).await;
    assert!(job.log.iter().any(|line| line == "Using /opt/jdk-21/bin/java"));

    // An explicit choice on the request wins
    let pending = downloads
        .start_download(paper("alpha", "1.21.1").with_java_path("/usr/bin/java"))
        .await
        .unwrap();
    let job = wait_terminal(&downloads, &pending.id).await;
    assert!(job.log.iter().any(|line| line == "Using /usr/bin/java"));
}

#[tokio::test]
async fn latest_download_keeps_stored_version() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let pending = downloads.start_download(paper("alpha", "latest")).await.unwrap();
    wait_terminal(&downloads, &pending.id).await;

    let stored = store.get_server("alpha").await.unwrap();
    assert_eq!(stored.version, "1.20.4");
    assert!(stored.jar_path.is_some());
}

#[tokio::test]
async fn second_download_for_same_target_names_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, _manager, downloads) = setup(Acquisition::Hang, dir.path(), download_settings());

    let first = downloads.start_download(paper("alpha", "latest")).await.unwrap();
    let err = downloads
        .start_download(paper("alpha", "1.21.1"))
        .await
        .unwrap_err();
    match err {
        SupervisorError::DownloadInProgress { target_id, job_id } => {
            assert_eq!(target_id, "alpha");
            assert_eq!(job_id, first.id);
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(downloads.cancel_download(&first.id));
    wait_terminal(&downloads, &first.id).await;
}

#[tokio::test]
async fn cancel_mid_transfer_fails_job_and_releases_target() {
    let dir = tempfile::tempdir().unwrap();
    let (store, manager, downloads) = setup(Acquisition::Hang, dir.path(), download_settings());

    let job = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    assert_eq!(manager.get_status("alpha").status, StatusKind::Provisioning);
    assert!(matches!(
        manager.start("alpha").await,
        Err(SupervisorError::Provisioning(_))
    ));

    assert!(downloads.cancel_download(&job.id));
    let job = wait_terminal(&downloads, &job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("Cancelled"));
    assert!(job.result_path.is_none());

    wait_released(&manager, "alpha").await;
    assert_eq!(manager.get_status("alpha").status, StatusKind::Stopped);
    assert!(store.get_server("alpha").await.unwrap().jar_path.is_none());

    assert!(!downloads.cancel_download(&job.id));
}

#[tokio::test]
async fn provider_error_fails_job_without_result() {
    let dir = tempfile::tempdir().unwrap();
    let (store, manager, downloads) = setup(Acquisition::CorruptDownload, dir.path(), download_settings());

    let job = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    let job = wait_terminal(&downloads, &job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.as_deref().unwrap().contains("Checksum mismatch"));
    assert!(job.result_path.is_none());
    assert!(job.log.iter().any(|line| line.starts_with("Error:")));
    wait_released(&manager, "alpha").await;

    let stored = store.get_server("alpha").await.unwrap();
    assert_eq!(stored.kind, ServerKind::Vanilla);
    assert!(stored.jar_path.is_none());
}

#[tokio::test]
async fn unknown_target_or_job() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let err = downloads.start_download(paper("ghost", "latest")).await.unwrap_err();
    assert_eq!(err.kind(), hearth_core::error::ErrorKind::NotFound);
    assert!(!manager.is_provisioning("ghost"));

    assert!(downloads.get_job("nope").is_none());
    assert!(matches!(
        downloads.require_job("nope"),
        Err(SupervisorError::JobNotFound(_))
    ));
    assert!(!downloads.cancel_download("nope"));
}

#[tokio::test]
async fn new_download_replaces_finished_job_for_target() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, _manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let first = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    wait_terminal(&downloads, &first.id).await;
    assert_eq!(downloads.job_for_target("alpha").unwrap().id, first.id);

    let second = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    assert!(downloads.get_job(&first.id).is_none());
    assert_eq!(downloads.job_for_target("alpha").unwrap().id, second.id);
    assert_eq!(downloads.list_jobs().len(), 1);

    wait_terminal(&downloads, &second.id).await;
}

#[tokio::test]
async fn cleanup_drops_only_expired_finished_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let expired = DownloadSettings {
        retention: Duration::ZERO,
        ..Default::default()
    };
    let (_store, _manager, downloads) = setup(Acquisition::Succeed, dir.path(), expired);

    let job = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    // Still running: never collected
    assert_eq!(downloads.cleanup_old_jobs(), 0);

    wait_terminal(&downloads, &job.id).await;
    assert_eq!(downloads.cleanup_old_jobs(), 1);
    assert!(downloads.list_jobs().is_empty());
    assert!(downloads.job_for_target("alpha").is_none());
}

#[tokio::test]
async fn retained_jobs_survive_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let (_store, _manager, downloads) = setup(Acquisition::Succeed, dir.path(), download_settings());

    let job = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    wait_terminal(&downloads, &job.id).await;
    assert_eq!(downloads.cleanup_old_jobs(), 0);
    assert_eq!(downloads.list_jobs().len(), 1);
}

#[tokio::test]
async fn cleanup_task_collects_in_background() {
    let dir = tempfile::tempdir().unwrap();
    let expired = DownloadSettings {
        retention: Duration::ZERO,
        ..Default::default()
    };
    let (_store, _manager, downloads) = setup(Acquisition::Succeed, dir.path(), expired);

    let job = downloads.start_download(paper("alpha", "1.21.1")).await.unwrap();
    wait_terminal(&downloads, &job.id).await;

    let task = downloads.spawn_cleanup_task(Duration::from_millis(20));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !downloads.list_jobs().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "cleanup task never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();
}
