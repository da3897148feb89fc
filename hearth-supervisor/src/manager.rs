//! Registry of supervised servers and the entry point for lifecycle requests

use crate::error::{Result, SupervisorError};
use crate::port;
use crate::process::{LaunchOptions, ServerProcess};
use futures::future::join_all;
use hearth_core::config::SupervisorSettings;
use hearth_core::console::ConsoleLine;
use hearth_core::events::{EventHub, ServerEvent};
use hearth_core::model::{ProcessState, ServerStatus};
use hearth_core::provider::ProviderRegistry;
use hearth_core::store::ServerStore;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Outcome of [`ProcessManager::shutdown_all`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Servers that exited on their own after the stop request
    pub stopped: Vec<String>,
    /// Servers that had to be force-killed
    pub killed: Vec<String>,
}

/// Removes a target from the in-flight start set when dropped
struct StartGuard<'a> {
    starting: &'a Mutex<HashSet<String>>,
    target_id: String,
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        lock(self.starting).remove(&self.target_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns one [`ServerProcess`] per started target and the provisioning set.
///
/// Construct once and share as `Arc<ProcessManager>`.
pub struct ProcessManager {
    store: Arc<dyn ServerStore>,
    providers: ProviderRegistry,
    settings: SupervisorSettings,
    events: Arc<EventHub>,
    processes: RwLock<HashMap<String, Arc<ServerProcess>>>,
    provisioning: Mutex<HashSet<String>>,
    starting: Mutex<HashSet<String>>,
}

impl ProcessManager {
    pub fn new(
        store: Arc<dyn ServerStore>,
        providers: ProviderRegistry,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            store,
            providers,
            settings,
            events: Arc::new(EventHub::new()),
            processes: RwLock::new(HashMap::new()),
            provisioning: Mutex::new(HashSet::new()),
            starting: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ServerStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Supervisor of a target, if it was ever started
    pub fn process(&self, target_id: &str) -> Option<Arc<ServerProcess>> {
        self.processes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(target_id)
            .cloned()
    }

    fn process_or_create(&self, target_id: &str) -> Arc<ServerProcess> {
        let mut processes = self
            .processes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        processes
            .entry(target_id.to_string())
            .or_insert_with(|| {
                ServerProcess::new(target_id, self.settings.console_capacity, self.events.clone())
            })
            .clone()
    }

    fn all_processes(&self) -> Vec<Arc<ServerProcess>> {
        self.processes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    fn ensure_not_provisioning(&self, target_id: &str) -> Result<()> {
        if self.is_provisioning(target_id) {
            Err(SupervisorError::Provisioning(target_id.to_string()))
        } else {
            Ok(())
        }
    }

    fn begin_start(&self, target_id: &str) -> Result<StartGuard<'_>> {
        if !lock(&self.starting).insert(target_id.to_string()) {
            return Err(SupervisorError::AlreadyActive(target_id.to_string()));
        }
        Ok(StartGuard {
            starting: &self.starting,
            target_id: target_id.to_string(),
        })
    }

    /// Start a server from its stored record
    pub async fn start(&self, target_id: &str) -> Result<()> {
        self.ensure_not_provisioning(target_id)?;
        if let Some(process) = self.process(target_id) {
            if !process.state().is_terminal() {
                return Err(SupervisorError::AlreadyActive(target_id.to_string()));
            }
        }
        let _guard = self.begin_start(target_id)?;

        let record = self.store.get_server(target_id).await?;
        let provider = self.providers.get(record.kind)?;

        if let Some(problem) = provider.validate_installation(&record) {
            return Err(SupervisorError::InvalidInstallation(problem));
        }
        if !port::is_port_free(record.port).await {
            return Err(SupervisorError::PortInUse(record.port));
        }

        let launch = provider.launch_parameters(&record)?;
        let mut options = LaunchOptions::from_settings(&self.settings)
            .with_readiness_pattern(provider.readiness_pattern())
            .with_stop_command(provider.stop_command());
        if let Some(timeout) = provider.running_timeout() {
            options = options.with_running_timeout(timeout);
        }

        // An acquisition may have claimed the target while we awaited
        self.ensure_not_provisioning(target_id)?;

        info!(target_id = %target_id, kind = %record.kind, port = record.port, "Starting server");
        self.process_or_create(target_id).start(launch, options)
    }

    pub fn stop(&self, target_id: &str) -> Result<()> {
        self.ensure_not_provisioning(target_id)?;
        self.process(target_id)
            .ok_or_else(|| SupervisorError::NotRunning(target_id.to_string()))?
            .stop()
    }

    pub fn force_kill(&self, target_id: &str) -> Result<()> {
        self.ensure_not_provisioning(target_id)?;
        self.process(target_id)
            .ok_or_else(|| SupervisorError::NoActiveProcess(target_id.to_string()))?
            .kill()
    }

    /// Write a console command to the server's stdin
    pub async fn send_command(&self, target_id: &str, text: &str) -> Result<()> {
        self.ensure_not_provisioning(target_id)?;
        let process = self
            .process(target_id)
            .ok_or_else(|| SupervisorError::NoActiveProcess(target_id.to_string()))?;
        process.send_command(text).await
    }

    /// Stop (if active), wait for the exit, then start again
    pub async fn restart(&self, target_id: &str) -> Result<()> {
        self.ensure_not_provisioning(target_id)?;

        if let Some(process) = self.process(target_id) {
            if process.state().is_active() {
                process.stop()?;
            }
            if !process.state().is_terminal()
                && !process.wait_for_terminal(self.settings.restart_timeout()).await
            {
                warn!(target_id = %target_id, "Server did not exit before restart timeout");
            }
        }

        self.start(target_id).await
    }

    /// Claim a target for an acquisition; start/stop/kill/command are refused until cleared
    pub fn set_provisioning(&self, target_id: &str) {
        let inserted = lock(&self.provisioning).insert(target_id.to_string());
        if inserted {
            info!(target_id = %target_id, "Server provisioning");
            self.events.publish(ServerEvent::Status {
                target_id: target_id.to_string(),
                status: ServerStatus::provisioning(),
            });
        }
    }

    pub fn clear_provisioning(&self, target_id: &str) {
        let removed = lock(&self.provisioning).remove(target_id);
        if removed {
            let status = self
                .process(target_id)
                .map(|p| p.status())
                .unwrap_or_else(ServerStatus::stopped);
            self.events.publish(ServerEvent::Status {
                target_id: target_id.to_string(),
                status,
            });
        }
    }

    pub fn is_provisioning(&self, target_id: &str) -> bool {
        lock(&self.provisioning).contains(target_id)
    }

    /// Current status; provisioning takes precedence over the process state
    pub fn get_status(&self, target_id: &str) -> ServerStatus {
        if self.is_provisioning(target_id) {
            return ServerStatus::provisioning();
        }
        self.process(target_id)
            .map(|p| p.status())
            .unwrap_or_else(ServerStatus::stopped)
    }

    /// Console history of a target, oldest first
    pub fn console(&self, target_id: &str) -> Vec<ConsoleLine> {
        self.process(target_id)
            .map(|p| p.console_lines())
            .unwrap_or_default()
    }

    /// Targets whose process is starting, running or stopping
    pub fn active_targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self
            .all_processes()
            .into_iter()
            .filter(|p| !p.state().is_terminal())
            .map(|p| p.target_id().to_string())
            .collect();
        targets.sort();
        targets
    }

    /// Stop every live server, force-killing those that outlast `shutdown_timeout`.
    ///
    /// Never fails; individual problems are logged.
    pub async fn shutdown_all(&self) -> ShutdownReport {
        let live: Vec<Arc<ServerProcess>> = self
            .all_processes()
            .into_iter()
            .filter(|p| !p.state().is_terminal())
            .collect();

        if live.is_empty() {
            return ShutdownReport::default();
        }
        info!(servers = live.len(), "Shutting down all servers");

        let shutdown_timeout = self.settings.shutdown_timeout;
        let kill_wait = self.settings.kill_grace;
        let outcomes = join_all(live.into_iter().map(|process| async move {
            if process.state().is_active() {
                if let Err(e) = process.stop() {
                    warn!(target_id = %process.target_id(), error = %e, "Stop during shutdown failed");
                }
            }

            if process.wait_for_terminal(shutdown_timeout).await {
                return (process.target_id().to_string(), false);
            }

            warn!(target_id = %process.target_id(), "Server did not stop in time; killing");
            if let Err(e) = process.kill() {
                warn!(target_id = %process.target_id(), error = %e, "Kill during shutdown failed");
            }
            if !process.wait_for_terminal(kill_wait).await {
                warn!(target_id = %process.target_id(), "Server still alive after SIGKILL");
            }
            (process.target_id().to_string(), true)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (target_id, killed) in outcomes {
            if killed {
                report.killed.push(target_id);
            } else {
                report.stopped.push(target_id);
            }
        }
        report.stopped.sort();
        report.killed.sort();
        info!(
            stopped = report.stopped.len(),
            killed = report.killed.len(),
            "Shutdown complete"
        );
        report
    }

    pub fn on_console<F>(&self, listener: F)
    where
        F: Fn(&str, &ConsoleLine) + Send + Sync + 'static,
    {
        self.events.on_console(listener);
    }

    pub fn on_status<F>(&self, listener: F)
    where
        F: Fn(&str, &ServerStatus) + Send + Sync + 'static,
    {
        self.events.on_status(listener);
    }

    pub fn on_participants<F>(&self, listener: F)
    where
        F: Fn(&str, &[String]) + Send + Sync + 'static,
    {
        self.events.on_participants(listener);
    }

    /// Every event from every target, as a broadcast stream
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Lifecycle state of a target without the status wrapper
    pub fn state(&self, target_id: &str) -> ProcessState {
        self.process(target_id)
            .map(|p| p.state())
            .unwrap_or(ProcessState::Stopped)
    }
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("providers", &self.providers)
            .field("settings", &self.settings)
            .field("active", &self.active_targets())
            .finish()
    }
}
