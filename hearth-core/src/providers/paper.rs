//! PaperMC

use super::{jar_launch, plain_file_name, validate_common, wants_latest};
use crate::error::{HearthError, Result};
use crate::fetch::{self, Checksum, FetchItem};
use crate::jobs::{DownloadRequest, JobHandle, JobStatus};
use crate::model::{ServerKind, ServerRecord};
use crate::provider::{LaunchParameters, ServerProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// PaperMC downloads API for the `paper` project
pub const PAPER_API_URL: &str = "https://api.papermc.io/v2/projects/paper";

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BuildList {
    builds: Vec<Build>,
}

#[derive(Debug, Deserialize)]
struct Build {
    build: u32,
    #[serde(default)]
    channel: String,
    downloads: BuildDownloads,
}

#[derive(Debug, Deserialize)]
struct BuildDownloads {
    application: Application,
}

#[derive(Debug, Deserialize)]
struct Application {
    name: String,
    sha256: String,
}

/// Newest build on the `default` (stable) channel, else the newest build at all
fn pick_build(builds: &[Build]) -> Option<&Build> {
    builds
        .iter()
        .filter(|b| b.channel == "default")
        .max_by_key(|b| b.build)
        .or_else(|| builds.iter().max_by_key(|b| b.build))
}

/// Paper server provider
pub struct PaperProvider {
    client: reqwest::Client,
    api_url: String,
}

impl PaperProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            api_url: PAPER_API_URL.to_string(),
        }
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }
}

#[async_trait]
impl ServerProvider for PaperProvider {
    fn kind(&self) -> ServerKind {
        ServerKind::Paper
    }

    fn validate_installation(&self, record: &ServerRecord) -> Option<String> {
        validate_common(record)
    }

    fn launch_parameters(&self, record: &ServerRecord) -> Result<LaunchParameters> {
        jar_launch(record)
    }

    async fn acquire_artifact(
        &self,
        request: &DownloadRequest,
        dest_dir: &Path,
        job: &JobHandle,
    ) -> Result<PathBuf> {
        job.set_status(JobStatus::Downloading);

        let version = if wants_latest(&request.version) {
            let project: ProjectInfo = fetch::get_json(&self.client, &self.api_url, job).await?;
            project
                .versions
                .last()
                .cloned()
                .ok_or_else(|| HearthError::Upstream("Paper lists no versions".to_string()))?
        } else {
            request.version.clone()
        };

        job.log(format!("Resolving Paper builds for {}", version));
        let builds: BuildList = fetch::get_json(
            &self.client,
            &format!("{}/versions/{}/builds", self.api_url, version),
            job,
        )
        .await?;

        let build = pick_build(&builds.builds).ok_or_else(|| {
            HearthError::Upstream(format!("No Paper builds for Minecraft {}", version))
        })?;
        let application = &build.downloads.application;
        let file_name = plain_file_name(&application.name)?;

        job.log(format!("Downloading Paper {} build {}", version, build.build));
        let item = FetchItem::new(
            format!(
                "{}/versions/{}/builds/{}/downloads/{}",
                self.api_url, version, build.build, file_name
            ),
            dest_dir.join(file_name),
            Checksum::Sha256(application.sha256.clone()),
        );
        job.checkpoint()?;
        fetch::download_file(&self.client, &item, job, true).await?;

        info!(
            target_id = %request.target_id,
            version = %version,
            build = build.build,
            "Paper server downloaded"
        );
        Ok(item.dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{sha256_hex, test_server};
    use std::collections::HashMap;

    fn routes(jar: &[u8], checksum: String) -> HashMap<String, Vec<u8>> {
        let project = serde_json::json!({ "versions": ["1.20.4", "1.21.1"] });
        let builds = serde_json::json!({
            "builds": [
                { "build": 100, "channel": "default",
                  "downloads": { "application": { "name": "paper-1.21.1-100.jar", "sha256": checksum } } },
                { "build": 101, "channel": "experimental",
                  "downloads": { "application": { "name": "paper-1.21.1-101.jar", "sha256": "ff" } } }
            ]
        });
        HashMap::from([
            ("/paper".to_string(), project.to_string().into_bytes()),
            (
                "/paper/versions/1.21.1/builds".to_string(),
                builds.to_string().into_bytes(),
            ),
            (
                "/paper/versions/1.21.1/builds/100/downloads/paper-1.21.1-100.jar".to_string(),
                jar.to_vec(),
            ),
        ])
    }

    #[tokio::test]
    async fn test_acquire_latest_stable_build() {
        let jar = b"paper jar bytes".to_vec();
        let base = test_server::serve(routes(&jar, sha256_hex(&jar))).await;
        let dir = tempfile::tempdir().unwrap();

        let provider =
            PaperProvider::new(reqwest::Client::new()).with_api_url(format!("{}/paper", base));
        let request = DownloadRequest::new("srv-1", ServerKind::Paper, "latest");
        let job = JobHandle::new(&request);

        let path = provider
            .acquire_artifact(&request, dir.path(), &job)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("paper-1.21.1-100.jar"));
        assert_eq!(std::fs::read(&path).unwrap(), jar);
    }

    #[tokio::test]
    async fn test_bad_digest_fails_and_leaves_nothing() {
        let jar = b"paper jar bytes".to_vec();
        let base = test_server::serve(routes(&jar, sha256_hex(b"something else"))).await;
        let dir = tempfile::tempdir().unwrap();

        let provider =
            PaperProvider::new(reqwest::Client::new()).with_api_url(format!("{}/paper", base));
        let request = DownloadRequest::new("srv-1", ServerKind::Paper, "1.21.1");
        let job = JobHandle::new(&request);

        let err = provider
            .acquire_artifact(&request, dir.path(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::ChecksumMismatch { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_build_name_cannot_leave_server_dir() {
        let builds = serde_json::json!({
            "builds": [
                { "build": 9, "channel": "default",
                  "downloads": { "application": { "name": "../escape.jar", "sha256": "00" } } }
            ]
        });
        let base = test_server::serve(HashMap::from([(
            "/paper/versions/1.21.1/builds".to_string(),
            builds.to_string().into_bytes(),
        )]))
        .await;
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("srv");
        std::fs::create_dir(&dir).unwrap();

        let provider =
            PaperProvider::new(reqwest::Client::new()).with_api_url(format!("{}/paper", base));
        let request = DownloadRequest::new("srv-1", ServerKind::Paper, "1.21.1");
        let job = JobHandle::new(&request);

        let err = provider.acquire_artifact(&request, &dir, &job).await.unwrap_err();
        assert!(matches!(err, HearthError::Upstream(_)));
        assert!(!root.path().join("escape.jar").exists());
    }

    #[test]
    fn test_pick_build_prefers_stable_channel() {
        let builds: BuildList = serde_json::from_value(serde_json::json!({
            "builds": [
                { "build": 5, "channel": "default", "downloads": { "application": { "name": "a", "sha256": "" } } },
                { "build": 7, "channel": "experimental", "downloads": { "application": { "name": "b", "sha256": "" } } }
            ]
        }))
        .unwrap();
        assert_eq!(pick_build(&builds.builds).unwrap().build, 5);

        let experimental_only: BuildList = serde_json::from_value(serde_json::json!({
            "builds": [
                { "build": 3, "channel": "experimental", "downloads": { "application": { "name": "c", "sha256": "" } } }
            ]
        }))
        .unwrap();
        assert_eq!(pick_build(&experimental_only.builds).unwrap().build, 3);
        assert!(pick_build(&[]).is_none());
    }
}
