//! # Hearth core
//!
//! Building blocks for running Minecraft Java Edition servers as supervised
//! child processes:
//! - Server records and the [`store::ServerStore`] persistence contract
//! - Per-kind [`provider::ServerProvider`] strategies (vanilla, Paper, Fabric, Forge)
//! - Download jobs with cooperative cancellation and verified streaming fetches
//! - A bounded console ring buffer and the [`events::EventHub`] observer fan-out
//! - Java runtime discovery
//!
//! Process supervision itself lives in `hearth-supervisor`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hearth_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = HearthConfig::load()?;
//!     let store = JsonFileStore::open(&config.store_path).await?;
//!     let providers =
//!         ProviderRegistry::with_defaults(config.downloads.http_client()?, &config.downloads);
//!
//!     for record in store.list_servers().await? {
//!         let provider = providers.get(record.kind)?;
//!         if let Some(problem) = provider.validate_installation(&record) {
//!             println!("{}: {}", record.id, problem);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod fetch;
pub mod java;
pub mod jobs;
pub mod model;
pub mod provider;
pub mod providers;
pub mod store;

/// HTTP client type taken by [`provider::ProviderRegistry::with_defaults`]
pub use reqwest;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DownloadSettings, HearthConfig, SupervisorSettings};
    pub use crate::console::{ConsoleBuffer, ConsoleLine, DEFAULT_CONSOLE_CAPACITY};
    pub use crate::error::{ErrorKind, HearthError, Result};
    pub use crate::events::{EventHub, ServerEvent};
    pub use crate::java::{JavaInstallation, discover_installations};
    pub use crate::jobs::{DownloadJob, DownloadRequest, JobHandle, JobStatus};
    pub use crate::model::{
        ProcessState, ServerKind, ServerRecord, ServerStatus, ServerUpdate, StatusKind,
    };
    pub use crate::provider::{LaunchParameters, ProviderRegistry, ServerProvider};
    pub use crate::store::{InMemoryStore, JsonFileStore, ServerStore};
}
