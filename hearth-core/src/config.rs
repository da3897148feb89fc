//! Configuration types for Hearth

use crate::console::DEFAULT_CONSOLE_CAPACITY;
use crate::error::{HearthError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearthConfig {
    /// Process supervision settings
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Artifact acquisition settings
    #[serde(default)]
    pub downloads: DownloadSettings,

    /// JSON file holding server records
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings::default(),
            downloads: DownloadSettings::default(),
            store_path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
        .join("servers.json")
}

/// Timers and limits for supervised processes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Console lines kept per server
    pub console_capacity: usize,

    /// Fallback delay before a server with no readiness line counts as running
    #[serde(with = "humantime_serde")]
    pub running_timeout: Duration,

    /// Time allowed after the stop command before SIGTERM
    #[serde(with = "humantime_serde")]
    pub stop_grace: Duration,

    /// Time allowed after SIGTERM before SIGKILL
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,

    /// Per-server bound on graceful stop during `shutdown_all`
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Added to the stop escalation ceiling when a restart waits for exit
    #[serde(with = "humantime_serde")]
    pub restart_margin: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            console_capacity: DEFAULT_CONSOLE_CAPACITY,
            running_timeout: Duration::from_secs(120),
            stop_grace: Duration::from_secs(30),
            kill_grace: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(20),
            restart_margin: Duration::from_secs(5),
        }
    }
}

impl SupervisorSettings {
    /// Upper bound on how long a stop can take before the process is gone
    pub fn restart_timeout(&self) -> Duration {
        self.stop_grace + self.kill_grace + self.restart_margin
    }
}

/// Settings for the download orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// How long finished jobs stay queryable
    #[serde(with = "humantime_serde")]
    pub retention: Duration,

    /// Concurrent fetches when a provider downloads several files
    pub batch_width: usize,

    /// Interval of the background cleanup task
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// User-Agent sent to upstream APIs
    pub user_agent: String,

    /// Per-request timeout for metadata calls
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(60 * 60),
            batch_width: 10,
            cleanup_interval: Duration::from_secs(5 * 60),
            user_agent: format!("hearth/{}", crate::VERSION),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl DownloadSettings {
    /// Build the HTTP client providers share
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.request_timeout)
            .build()
            .map_err(HearthError::from)
    }
}

impl HearthConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `hearth.toml` in the working directory
    /// 3. `HEARTH_`-prefixed environment variables (`__` separates sections)
    /// 4. The file named by `HEARTH_CONFIG_PATH`
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is malformed or the result fails validation.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(HearthConfig::default()))
            .merge(Toml::file("hearth.toml"))
            .merge(Env::prefixed("HEARTH_").ignore(&["CONFIG_PATH"]).split("__"));

        if let Ok(path) = std::env::var("HEARTH_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: HearthConfig = figment.extract().map_err(|e| {
            HearthError::Configuration(format!("Failed to load configuration: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: HearthConfig = Figment::from(Serialized::defaults(HearthConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                HearthError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the supervisor and orchestrator cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.supervisor.console_capacity == 0 {
            return Err(HearthError::Configuration(
                "supervisor.console_capacity must be at least 1".to_string(),
            ));
        }
        if self.supervisor.running_timeout.is_zero()
            || self.supervisor.stop_grace.is_zero()
            || self.supervisor.kill_grace.is_zero()
            || self.supervisor.shutdown_timeout.is_zero()
        {
            return Err(HearthError::Configuration(
                "supervisor timeouts must be non-zero".to_string(),
            ));
        }
        if self.downloads.batch_width == 0 {
            return Err(HearthError::Configuration(
                "downloads.batch_width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = HearthConfig::default();
        assert_eq!(config.supervisor.console_capacity, 1000);
        assert_eq!(config.supervisor.running_timeout, Duration::from_secs(120));
        assert_eq!(config.supervisor.stop_grace, Duration::from_secs(30));
        assert_eq!(config.supervisor.kill_grace, Duration::from_secs(10));
        assert_eq!(config.downloads.retention, Duration::from_secs(3600));
        assert_eq!(config.downloads.batch_width, 10);
        assert!(config.store_path.ends_with("hearth/servers.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_restart_timeout_exceeds_escalation() {
        let settings = SupervisorSettings::default();
        assert_eq!(settings.restart_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
store_path = "/var/lib/hearth/servers.json"

[supervisor]
stop_grace = "5s"
console_capacity = 200

[downloads]
retention = "10m"
batch_width = 4
"#
        )
        .unwrap();

        let config = HearthConfig::from_file(file.path()).unwrap();
        assert_eq!(config.supervisor.stop_grace, Duration::from_secs(5));
        assert_eq!(config.supervisor.console_capacity, 200);
        assert_eq!(config.supervisor.kill_grace, Duration::from_secs(10));
        assert_eq!(config.downloads.retention, Duration::from_secs(600));
        assert_eq!(config.downloads.batch_width, 4);
        assert_eq!(
            config.store_path,
            PathBuf::from("/var/lib/hearth/servers.json")
        );
    }

    #[test]
    fn test_from_file_rejects_zero_batch_width() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[downloads]\nbatch_width = 0").unwrap();

        let err = HearthConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, HearthError::Configuration(_)));
    }

    #[test]
    fn test_http_client_builds() {
        assert!(DownloadSettings::default().http_client().is_ok());
    }
}
