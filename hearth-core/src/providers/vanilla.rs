//! Mojang's vanilla server

use super::{jar_launch, validate_common, wants_latest};
use crate::error::{HearthError, Result};
use crate::fetch::{self, Checksum, FetchItem};
use crate::jobs::{DownloadRequest, JobHandle, JobStatus};
use crate::model::{ServerKind, ServerRecord};
use crate::provider::{LaunchParameters, ServerProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Mojang launcher metadata listing every published version
pub const MOJANG_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// File name the vanilla jar is stored under
pub const SERVER_JAR_NAME: &str = "server.jar";

#[derive(Debug, Deserialize)]
struct VersionManifest {
    latest: LatestVersions,
    versions: Vec<ManifestEntry>,
}

#[derive(Debug, Deserialize)]
struct LatestVersions {
    release: String,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct VersionDocument {
    downloads: VersionDownloads,
}

#[derive(Debug, Deserialize)]
struct VersionDownloads {
    server: Option<ArtifactDownload>,
}

#[derive(Debug, Deserialize)]
struct ArtifactDownload {
    url: String,
    sha1: String,
}

/// Resolve the vanilla server jar of `version` into a fetch item targeting `dest`.
///
/// Returns the concrete version id alongside, so `"latest"` callers learn what they got.
pub(crate) async fn server_jar_item(
    client: &reqwest::Client,
    manifest_url: &str,
    version: &str,
    dest: PathBuf,
    job: &JobHandle,
) -> Result<(String, FetchItem)> {
    let manifest: VersionManifest = fetch::get_json(client, manifest_url, job).await?;

    let wanted = if wants_latest(version) {
        manifest.latest.release.clone()
    } else {
        version.to_string()
    };

    let entry = manifest
        .versions
        .iter()
        .find(|v| v.id == wanted)
        .ok_or_else(|| HearthError::Upstream(format!("Unknown Minecraft version: {}", wanted)))?;

    let document: VersionDocument = fetch::get_json(client, &entry.url, job).await?;
    let server = document.downloads.server.ok_or_else(|| {
        HearthError::Upstream(format!("Minecraft {} has no server download", wanted))
    })?;

    Ok((
        wanted,
        FetchItem::new(server.url, dest, Checksum::Sha1(server.sha1)),
    ))
}

/// Vanilla server provider
pub struct VanillaProvider {
    client: reqwest::Client,
    manifest_url: String,
}

impl VanillaProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            manifest_url: MOJANG_MANIFEST_URL.to_string(),
        }
    }

    /// Point at a different version manifest (mirrors, tests)
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }
}

#[async_trait]
impl ServerProvider for VanillaProvider {
    fn kind(&self) -> ServerKind {
        ServerKind::Vanilla
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
        job.log(format!("Resolving vanilla {}", request.version));

        let dest = dest_dir.join(SERVER_JAR_NAME);
        let (version, item) =
            server_jar_item(&self.client, &self.manifest_url, &request.version, dest, job).await?;

        job.log(format!("Downloading vanilla {} server", version));
        fetch::download_file(&self.client, &item, job, true).await?;

        info!(target_id = %request.target_id, version = %version, "Vanilla server downloaded");
        Ok(item.dest)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetch::{sha1_hex, test_server};
    use std::collections::HashMap;

    /// Routes for a manifest with one release, `1.21.1`, whose server jar is `jar`
    pub fn mojang_routes(base: &str, jar: &[u8]) -> HashMap<String, Vec<u8>> {
        let manifest = serde_json::json!({
            "latest": { "release": "1.21.1", "snapshot": "24w40a" },
            "versions": [
                { "id": "1.21.1", "type": "release", "url": format!("{}/v/1.21.1.json", base) },
                { "id": "1.20.4", "type": "release", "url": format!("{}/v/1.20.4.json", base) }
            ]
        });
        let document = serde_json::json!({
            "downloads": {
                "server": {
                    "url": format!("{}/server.jar", base),
                    "sha1": sha1_hex(jar),
                    "size": jar.len()
                }
            }
        });
        let no_server = serde_json::json!({ "downloads": {} });

        HashMap::from([
            ("/manifest.json".to_string(), manifest.to_string().into_bytes()),
            ("/v/1.21.1.json".to_string(), document.to_string().into_bytes()),
            ("/v/1.20.4.json".to_string(), no_server.to_string().into_bytes()),
            ("/server.jar".to_string(), jar.to_vec()),
        ])
    }

    fn job(version: &str) -> (DownloadRequest, JobHandle) {
        let request = DownloadRequest::new("srv-1", ServerKind::Vanilla, version);
        let job = JobHandle::new(&request);
        (request, job)
    }

    #[tokio::test]
    async fn test_acquire_latest_release() {
        let jar = b"vanilla server jar".to_vec();
        let base = test_server::serve_with(|base| mojang_routes(base, &jar)).await;
        let dir = tempfile::tempdir().unwrap();

        let provider = VanillaProvider::new(reqwest::Client::new())
            .with_manifest_url(format!("{}/manifest.json", base));
        let (request, job) = job("latest");

        let path = provider
            .acquire_artifact(&request, dir.path(), &job)
            .await
            .unwrap();
        assert_eq!(path, dir.path().join(SERVER_JAR_NAME));
        assert_eq!(std::fs::read(&path).unwrap(), jar);
        assert_eq!(job.status(), JobStatus::Downloading);
    }

    #[tokio::test]
    async fn test_unknown_version_is_upstream_error() {
        let base = test_server::serve_with(|base| mojang_routes(base, b"jar")).await;
        let dir = tempfile::tempdir().unwrap();
        let provider = VanillaProvider::new(reqwest::Client::new())
            .with_manifest_url(format!("{}/manifest.json", base));
        let (request, job) = job("0.0.1");

        let err = provider
            .acquire_artifact(&request, dir.path(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Upstream(msg) if msg.contains("0.0.1")));
    }

    #[tokio::test]
    async fn test_version_without_server_download() {
        let base = test_server::serve_with(|base| mojang_routes(base, b"jar")).await;
        let dir = tempfile::tempdir().unwrap();
        let provider = VanillaProvider::new(reqwest::Client::new())
            .with_manifest_url(format!("{}/manifest.json", base));
        let (request, job) = job("1.20.4");

        let err = provider
            .acquire_artifact(&request, dir.path(), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, HearthError::Upstream(msg) if msg.contains("no server download")));
        assert!(!dir.path().join(SERVER_JAR_NAME).exists());
    }
}
