//! Per-kind strategy for validating, launching and acquiring servers

use crate::config::DownloadSettings;
use crate::error::{HearthError, Result};
use crate::jobs::{DownloadRequest, JobHandle};
use crate::model::{ServerKind, ServerRecord};
use crate::providers::{FabricProvider, ForgeProvider, PaperProvider, VanillaProvider};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Line a vanilla-derived server prints once it accepts connections,
/// e.g. `[12:00:00] [Server thread/INFO]: Done (3.2s)! For help, type "help"`
pub static DEFAULT_READINESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]: Done \(\d+(?:[.,]\d+)?s\)!").expect("valid readiness pattern"));

/// `]: <name> joined the game`
pub static JOIN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]: (\w+) joined the game").expect("valid join pattern"));

/// `]: <name> left the game`
pub static LEAVE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]: (\w+) left the game").expect("valid leave pattern"));

/// Console command that asks a server to save and exit
pub const DEFAULT_STOP_COMMAND: &str = "stop";

/// Executable, arguments and working directory of a server process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchParameters {
    pub executable: String,
    pub arguments: Vec<String>,
    pub working_dir: PathBuf,
}

/// Strategy for one server kind
#[async_trait]
pub trait ServerProvider: Send + Sync {
    /// Kind this provider serves
    fn kind(&self) -> ServerKind;

    /// Check the on-disk installation; `Some(message)` if it cannot be launched
    fn validate_installation(&self, record: &ServerRecord) -> Option<String>;

    /// Build the command line for a validated record
    fn launch_parameters(&self, record: &ServerRecord) -> Result<LaunchParameters>;

    /// Console line marking the server ready; `None` relies on the fallback timer alone
    fn readiness_pattern(&self) -> Option<Regex> {
        Some(DEFAULT_READINESS_PATTERN.clone())
    }

    fn stop_command(&self) -> Option<String> {
        Some(DEFAULT_STOP_COMMAND.to_string())
    }

    /// Override of the supervisor's fallback running timeout
    fn running_timeout(&self) -> Option<Duration> {
        None
    }

    /// Download (and install) the artifact for `request` into `dest_dir`.
    ///
    /// Progress, log lines and status go through `job`; implementations call
    /// `job.checkpoint()` between phases and route network calls through
    /// [`crate::fetch`] so cancellation is observed promptly.
    async fn acquire_artifact(
        &self,
        request: &DownloadRequest,
        dest_dir: &Path,
        job: &JobHandle,
    ) -> Result<PathBuf>;
}

/// Lookup table from server kind to provider
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ServerKind, Arc<dyn ServerProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the vanilla, paper, fabric and forge providers
    pub fn with_defaults(client: reqwest::Client, settings: &DownloadSettings) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(VanillaProvider::new(client.clone())));
        registry.register(Arc::new(PaperProvider::new(client.clone())));
        registry.register(Arc::new(
            FabricProvider::new(client.clone()).with_batch_width(settings.batch_width),
        ));
        registry.register(Arc::new(ForgeProvider::new(client)));
        registry
    }

    /// Register a provider, replacing any previous one for its kind
    pub fn register(&mut self, provider: Arc<dyn ServerProvider>) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ServerKind) -> Result<Arc<dyn ServerProvider>> {
        self.providers
            .get(&kind)
            .cloned()
            .ok_or(HearthError::UnsupportedKind(kind))
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<ServerKind> {
        self.providers.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
