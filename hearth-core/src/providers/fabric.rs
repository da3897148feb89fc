//! Fabric server launcher
//!
//! The launcher jar bootstraps the loader and then runs the vanilla server jar
//! named in `fabric-server-launcher.properties`, so both are fetched together.

use super::vanilla::{server_jar_item, MOJANG_MANIFEST_URL, SERVER_JAR_NAME};
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

/// Fabric meta service
pub const FABRIC_META_URL: &str = "https://meta.fabricmc.net/v2";

pub const LAUNCHER_JAR_NAME: &str = "fabric-server-launch.jar";
pub const LAUNCHER_PROPERTIES: &str = "fabric-server-launcher.properties";

#[derive(Debug, Deserialize)]
struct Versioned {
    version: String,
    #[serde(default)]
    stable: bool,
}

#[derive(Debug, Deserialize)]
struct LoaderEntry {
    loader: Versioned,
}

/// First stable entry, else the first entry; meta lists newest first
fn newest_stable(entries: &[Versioned]) -> Option<&Versioned> {
    entries.iter().find(|v| v.stable).or_else(|| entries.first())
}

/// Fabric server provider
pub struct FabricProvider {
    client: reqwest::Client,
    meta_url: String,
    manifest_url: String,
    batch_width: usize,
}

impl FabricProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            meta_url: FABRIC_META_URL.to_string(),
            manifest_url: MOJANG_MANIFEST_URL.to_string(),
            batch_width: 10,
        }
    }

    pub fn with_meta_url(mut self, url: impl Into<String>) -> Self {
        self.meta_url = url.into();
        self
    }

    /// Mojang manifest used for the vanilla jar the launcher runs
    pub fn with_manifest_url(mut self, url: impl Into<String>) -> Self {
        self.manifest_url = url.into();
        self
    }

    pub fn with_batch_width(mut self, width: usize) -> Self {
        self.batch_width = width.max(1);
        self
    }

    async fn resolve_game_version(&self, requested: &str, job: &JobHandle) -> Result<String> {
        if !wants_latest(requested) {
            return Ok(requested.to_string());
        }
        let games: Vec<Versioned> =
            fetch::get_json(&self.client, &format!("{}/versions/game", self.meta_url), job).await?;
        newest_stable(&games)
            .map(|v| v.version.clone())
            .ok_or_else(|| HearthError::Upstream("Fabric lists no game versions".to_string()))
    }
}

#[async_trait]
impl ServerProvider for FabricProvider {
    fn kind(&self) -> ServerKind {
        ServerKind::Fabric
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

        let game = self.resolve_game_version(&request.version, job).await?;
        job.log(format!("Resolving Fabric loader for {}", game));

        let loaders: Vec<LoaderEntry> = fetch::get_json(
            &self.client,
            &format!("{}/versions/loader/{}", self.meta_url, game),
            job,
        )
        .await?;
        let loaders: Vec<Versioned> = loaders.into_iter().map(|l| l.loader).collect();
        let loader = newest_stable(&loaders).ok_or_else(|| {
            HearthError::Upstream(format!("No Fabric loader supports Minecraft {}", game))
        })?;

        let installers: Vec<Versioned> = fetch::get_json(
            &self.client,
            &format!("{}/versions/installer", self.meta_url),
            job,
        )
        .await?;
        let installer = newest_stable(&installers)
            .ok_or_else(|| HearthError::Upstream("Fabric lists no installers".to_string()))?;

        let (_, vanilla) = server_jar_item(
            &self.client,
            &self.manifest_url,
            &game,
            dest_dir.join(SERVER_JAR_NAME),
            job,
        )
        .await?;
        let launcher = FetchItem::new(
            format!(
                "{}/versions/loader/{}/{}/{}/server/jar",
                self.meta_url, game, loader.version, installer.version
            ),
            dest_dir.join(LAUNCHER_JAR_NAME),
            Checksum::None,
        );

        job.log(format!(
            "Downloading Fabric loader {} with Minecraft {}",
            loader.version, game
        ));
        let items = [launcher, vanilla];
        fetch::download_all(&self.client, &items, self.batch_width, job).await?;

        job.checkpoint()?;
        tokio::fs::write(
            dest_dir.join(LAUNCHER_PROPERTIES),
            format!("serverJar={}\n", SERVER_JAR_NAME),
        )
        .await?;

        info!(
            target_id = %request.target_id,
            game = %game,
            loader = %loader.version,
            "Fabric server downloaded"
        );
        Ok(dest_dir.join(LAUNCHER_JAR_NAME))
    }
}
