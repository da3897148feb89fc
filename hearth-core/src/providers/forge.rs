//! Minecraft Forge
//!
//! Forge ships an installer rather than a server jar. Acquisition downloads
//! the installer, runs it with `--installServer` inside the server directory
//! and records whatever it produced: the `unix_args.txt`/`win_args.txt`
//! argument file on 1.17+ or a plain server jar on older versions.

use super::{installed_jar, jvm_arguments, plain_file_name, validate_common, wants_latest};
use crate::error::{HearthError, Result};
use crate::fetch::{self, Checksum, FetchItem};
use crate::jobs::{DownloadRequest, JobHandle, JobStatus};
use crate::model::{ServerKind, ServerRecord};
use crate::provider::{LaunchParameters, ServerProvider};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub const FORGE_PROMOTIONS_URL: &str =
    "https://files.minecraftforge.net/net/minecraftforge/forge/promotions_slim.json";
pub const FORGE_MAVEN_URL: &str = "https://maven.minecraftforge.net/net/minecraftforge/forge";

/// Forge servers load mods before printing the readiness line
pub const FORGE_RUNNING_TIMEOUT: Duration = Duration::from_secs(300);

/// JVM arguments file the installer leaves for the user to edit
pub const USER_JVM_ARGS: &str = "user_jvm_args.txt";

#[cfg(windows)]
const ARGS_FILE_NAME: &str = "win_args.txt";
#[cfg(not(windows))]
const ARGS_FILE_NAME: &str = "unix_args.txt";

#[derive(Debug, Deserialize)]
struct Promotions {
    promos: HashMap<String, String>,
}

fn numeric_parts(version: &str) -> Vec<u32> {
    version
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect()
}

/// Turn a requested version into `<minecraft>-<forge>`.
///
/// `1.20.1-47.2.0` is taken verbatim; `1.20.1` resolves to the recommended
/// build, then the latest one; `latest` picks the newest Minecraft version
/// that has any promotion.
fn resolve_full_version(requested: &str, promos: &HashMap<String, String>) -> Result<String> {
    if requested.contains('-') {
        return Ok(requested.to_string());
    }

    let minecraft = if wants_latest(requested) {
        promos
            .keys()
            .filter_map(|k| k.rsplit_once('-').map(|(mc, _)| mc))
            .max_by_key(|mc| numeric_parts(mc))
            .ok_or_else(|| HearthError::Upstream("Forge lists no promotions".to_string()))?
            .to_string()
    } else {
        requested.to_string()
    };

    let forge = promos
        .get(&format!("{}-recommended", minecraft))
        .or_else(|| promos.get(&format!("{}-latest", minecraft)))
        .ok_or_else(|| {
            HearthError::Upstream(format!("No Forge build for Minecraft {}", minecraft))
        })?;

    Ok(format!("{}-{}", minecraft, forge))
}

/// Forge server provider
pub struct ForgeProvider {
    client: reqwest::Client,
    promotions_url: String,
    maven_url: String,
    java_path: String,
}

impl ForgeProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            promotions_url: FORGE_PROMOTIONS_URL.to_string(),
            maven_url: FORGE_MAVEN_URL.to_string(),
            java_path: "java".to_string(),
        }
    }

    pub fn with_promotions_url(mut self, url: impl Into<String>) -> Self {
        self.promotions_url = url.into();
        self
    }

    pub fn with_maven_url(mut self, url: impl Into<String>) -> Self {
        self.maven_url = url.into();
        self
    }

    /// Java executable that runs the installer when the request names none
    pub fn with_java_path(mut self, java_path: impl Into<String>) -> Self {
        self.java_path = java_path.into();
        self
    }

    /// Run the installer, streaming its output into the job log
    async fn run_installer(
        &self,
        java_path: &str,
        installer: &Path,
        dest_dir: &Path,
        job: &JobHandle,
    ) -> Result<()> {
        debug!(java = %java_path, installer = %installer.display(), "Launching Forge installer");
        let mut child = Command::new(java_path)
            .arg("-jar")
            .arg(installer)
            .arg("--installServer")
            .current_dir(dest_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HearthError::Installer(format!("Failed to launch installer: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HearthError::Installer("Installer stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HearthError::Installer("Installer stderr unavailable".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                _ = job.cancellation().cancelled() => {
                    let _ = child.kill().await;
                    return Err(HearthError::Cancelled);
                }
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => job.log(line),
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => job.log(line),
                    _ => stderr_open = false,
                },
            }
        }

        let status = job
            .cancellable(async { child.wait().await.map_err(HearthError::from) })
            .await?;
        if !status.success() {
            return Err(HearthError::Installer(format!("Installer exited with {}", status)));
        }
        Ok(())
    }
}

/// Artifact the installer produced for `full_version`, if any
fn installed_artifact(dest_dir: &Path, full_version: &str) -> Option<PathBuf> {
    let args_file = dest_dir
        .join("libraries/net/minecraftforge/forge")
        .join(full_version)
        .join(ARGS_FILE_NAME);
    if args_file.is_file() {
        return Some(args_file);
    }

    [
        format!("forge-{}.jar", full_version),
        format!("forge-{}-universal.jar", full_version),
        format!("forge-{}-shim.jar", full_version),
    ]
    .into_iter()
    .map(|name| dest_dir.join(name))
    .find(|path| path.is_file())
}

fn is_args_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("_args.txt"))
}

#[async_trait]
impl ServerProvider for ForgeProvider {
    fn kind(&self) -> ServerKind {
        ServerKind::Forge
    }

    fn validate_installation(&self, record: &ServerRecord) -> Option<String> {
        validate_common(record)
    }

    fn launch_parameters(&self, record: &ServerRecord) -> Result<LaunchParameters> {
        let artifact = installed_jar(record).ok_or_else(|| {
            HearthError::Other(format!("Server {} has no installed artifact", record.id))
        })?;

        let mut arguments = jvm_arguments(record);
        if is_args_file(&artifact) {
            if record.directory.join(USER_JVM_ARGS).is_file() {
                arguments.push(format!("@{}", USER_JVM_ARGS));
            }
            arguments.push(format!("@{}", artifact.to_string_lossy()));
        } else {
            arguments.push("-jar".to_string());
            arguments.push(artifact.to_string_lossy().into_owned());
        }
        arguments.push("nogui".to_string());
        arguments.extend(record.server_args.iter().cloned());

        Ok(LaunchParameters {
            executable: record.java_path.clone(),
            arguments,
            working_dir: record.directory.clone(),
        })
    }

    fn running_timeout(&self) -> Option<Duration> {
        Some(FORGE_RUNNING_TIMEOUT)
    }

    async fn acquire_artifact(
        &self,
        request: &DownloadRequest,
        dest_dir: &Path,
        job: &JobHandle,
    ) -> Result<PathBuf> {
        job.set_status(JobStatus::Downloading);

        let full_version = if request.version.contains('-') {
            request.version.clone()
        } else {
            let promotions: Promotions =
                fetch::get_json(&self.client, &self.promotions_url, job).await?;
            resolve_full_version(&request.version, &promotions.promos)?
        };
        plain_file_name(&full_version)?;

        job.log(format!("Downloading Forge {} installer", full_version));
        let installer = FetchItem::new(
            format!(
                "{}/{v}/forge-{v}-installer.jar",
                self.maven_url,
                v = full_version
            ),
            dest_dir.join(format!("forge-{}-installer.jar", full_version)),
            Checksum::None,
        );
        fetch::download_file(&self.client, &installer, job, true).await?;

        job.checkpoint()?;
        job.set_status(JobStatus::Installing);
        job.log("Running Forge installer");
        let java_path = request.java_path.as_deref().unwrap_or(&self.java_path);
        let installed = self.run_installer(java_path, &installer.dest, dest_dir, job).await;

        for leftover in [installer.dest.clone(), installer.dest.with_extension("jar.log")] {
            if let Err(e) = tokio::fs::remove_file(&leftover).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %leftover.display(), error = %e, "Failed to remove installer file");
                }
            }
        }
        installed?;

        let artifact = installed_artifact(dest_dir, &full_version).ok_or_else(|| {
            HearthError::Installer(format!(
                "Installer finished but produced no launchable artifact for {}",
                full_version
            ))
        })?;

        info!(
            target_id = %request.target_id,
            version = %full_version,
            artifact = %artifact.display(),
            "Forge server installed"
        );
        Ok(artifact)
    }
}
