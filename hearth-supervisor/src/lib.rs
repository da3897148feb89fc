//! Hearth Supervisor - runs game servers as supervised child processes
//!
//! Provides the two long-running engines of Hearth:
//! - **Process supervision**: spawn a server, follow its console, detect
//!   readiness and joined players, stop it gracefully with SIGTERM/SIGKILL
//!   escalation, and report crashes
//! - **Artifact acquisition**: background download/install jobs with
//!   cancellation, one per server, that block lifecycle calls while they run
//!
//! Persistence and per-kind behaviour come from `hearth-core`
//! ([`ServerStore`](hearth_core::store::ServerStore) and
//! [`ServerProvider`](hearth_core::provider::ServerProvider)).
//!
//! ```rust,no_run
//! use hearth_core::prelude::*;
//! use hearth_supervisor::{DownloadManager, ProcessManager};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = HearthConfig::load()?;
//! let store = Arc::new(JsonFileStore::open(&config.store_path).await?);
//! let providers =
//!     ProviderRegistry::with_defaults(config.downloads.http_client()?, &config.downloads);
//!
//! let manager = Arc::new(ProcessManager::new(store, providers, config.supervisor.clone()));
//! manager.on_console(|id, line| println!("[{}] {}", id, line.text));
//!
//! let downloads = DownloadManager::new(manager.clone(), config.downloads.clone());
//! downloads
//!     .start_download(DownloadRequest::new("survival", ServerKind::Paper, "latest"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod downloads;
mod error;
mod manager;
pub mod port;
mod process;

pub use downloads::DownloadManager;
pub use error::{Result, SupervisorError};
pub use manager::{ProcessManager, ShutdownReport};
pub use process::{LaunchOptions, ServerProcess};
