//! Shared fixtures for supervisor integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use hearth_core::config::{DownloadSettings, SupervisorSettings};
use hearth_core::error::{HearthError, Result};
use hearth_core::jobs::{DownloadRequest, JobHandle, JobStatus};
use hearth_core::model::{ServerKind, ServerRecord};
use hearth_core::provider::{LaunchParameters, ProviderRegistry, ServerProvider};
use hearth_core::store::InMemoryStore;
use hearth_supervisor::ProcessManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Timers short enough for tests; stop escalation deliberately outlasts shutdown
pub fn settings() -> SupervisorSettings {
    SupervisorSettings {
        console_capacity: 200,
        running_timeout: Duration::from_secs(5),
        stop_grace: Duration::from_secs(2),
        kill_grace: Duration::from_secs(2),
        shutdown_timeout: Duration::from_millis(300),
        restart_margin: Duration::from_millis(500),
    }
}

/// A port nothing is listening on right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("0.0.0.0:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Prints a readiness line, echoes commands and exits on `stop`
pub const WELL_BEHAVED: &str = r#"
echo "[12:00:00] [Server thread/INFO]: Starting minecraft server"
echo "[12:00:01] [Server thread/INFO]: Done (1.5s)! For help, type \"help\""
while read line; do
  if [ "$line" = "stop" ]; then echo "Stopping the server"; exit 0; fi
  echo "[12:00:02] [Server thread/INFO]: ran $line"
done
"#;

/// Becomes ready, then ignores both the stop command and SIGTERM
pub const STUBBORN: &str = r#"
trap '' TERM
echo "[12:00:01] [Server thread/INFO]: Done (0.5s)!"
while :; do sleep 0.05; done
"#;

/// Runs each record's `server_args[0]` as an `sh -c` script
pub struct ShellProvider;

#[async_trait]
impl ServerProvider for ShellProvider {
    fn kind(&self) -> ServerKind {
        ServerKind::Vanilla
    }

    fn validate_installation(&self, record: &ServerRecord) -> Option<String> {
        if record.server_args.is_empty() {
            Some("no script".to_string())
        } else {
            None
        }
    }

    fn launch_parameters(&self, record: &ServerRecord) -> Result<LaunchParameters> {
        Ok(LaunchParameters {
            executable: "sh".to_string(),
            arguments: vec!["-c".to_string(), record.server_args[0].clone()],
            working_dir: record.directory.clone(),
        })
    }

    async fn acquire_artifact(
        &self,
        _request: &DownloadRequest,
        _dest_dir: &Path,
        _job: &JobHandle,
    ) -> Result<PathBuf> {
        Err(HearthError::Other("shell servers are not downloadable".to_string()))
    }
}

/// How a [`FakeAcquirer`] behaves
#[derive(Debug, Clone, Copy)]
pub enum Acquisition {
    /// Report progress over a few short steps, then write `server.jar`
    Succeed,
    /// Fail with a checksum mismatch after starting
    CorruptDownload,
    /// Never finish until cancelled
    Hang,
}

/// Paper provider stand-in whose acquisition is scripted
pub struct FakeAcquirer(pub Acquisition);

#[async_trait]
impl ServerProvider for FakeAcquirer {
    fn kind(&self) -> ServerKind {
        ServerKind::Paper
    }

    fn validate_installation(&self, _record: &ServerRecord) -> Option<String> {
        None
    }

    fn launch_parameters(&self, record: &ServerRecord) -> Result<LaunchParameters> {
        Ok(LaunchParameters {
            executable: "true".to_string(),
            arguments: Vec::new(),
            working_dir: record.directory.clone(),
        })
    }

    async fn acquire_artifact(
        &self,
        request: &DownloadRequest,
        dest_dir: &Path,
        job: &JobHandle,
    ) -> Result<PathBuf> {
        job.set_status(JobStatus::Downloading);
        job.log("Downloading fake artifact");
        if let Some(java) = &request.java_path {
            job.log(format!("Using {}", java));
        }

        match self.0 {
            Acquisition::Succeed => {
                for step in 1..=4u8 {
                    job.cancellable(async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .await?;
                    job.set_progress(step * 20);
                }
                let path = dest_dir.join("server.jar");
                tokio::fs::write(&path, b"jar").await?;
                Ok(path)
            }
            Acquisition::CorruptDownload => Err(HearthError::ChecksumMismatch {
                expected: "aa".to_string(),
                actual: "bb".to_string(),
            }),
            Acquisition::Hang => {
                job.cancellable(std::future::pending::<Result<()>>()).await?;
                unreachable!("pending future completed")
            }
        }
    }
}

/// Record in `dir` that runs `script` through [`ShellProvider`]
pub fn shell_record(id: &str, dir: &Path, script: &str) -> ServerRecord {
    let mut record = ServerRecord::new(id, ServerKind::Vanilla, "1.21.1", dir).with_port(free_port());
    record.server_args = vec![script.to_string()];
    record
}

pub fn manager_with(
    records: impl IntoIterator<Item = ServerRecord>,
    providers: Vec<Arc<dyn ServerProvider>>,
) -> (Arc<InMemoryStore>, Arc<ProcessManager>) {
    let store = Arc::new(InMemoryStore::with_records(records));
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider);
    }
    let manager = Arc::new(ProcessManager::new(store.clone(), registry, settings()));
    (store, manager)
}

pub fn download_settings() -> DownloadSettings {
    DownloadSettings {
        retention: Duration::from_secs(3600),
        ..Default::default()
    }
}
