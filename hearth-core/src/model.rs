//! Server records and lifecycle status types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of server distribution a record runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// Mojang's vanilla server
    Vanilla,
    /// PaperMC
    Paper,
    /// Fabric server launcher
    Fabric,
    /// Minecraft Forge
    Forge,
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerKind::Vanilla => write!(f, "vanilla"),
            ServerKind::Paper => write!(f, "paper"),
            ServerKind::Fabric => write!(f, "fabric"),
            ServerKind::Forge => write!(f, "forge"),
        }
    }
}

impl std::str::FromStr for ServerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vanilla" => Ok(ServerKind::Vanilla),
            "paper" => Ok(ServerKind::Paper),
            "fabric" => Ok(ServerKind::Fabric),
            "forge" => Ok(ServerKind::Forge),
            other => Err(format!("unknown server kind: {}", other)),
        }
    }
}

/// Persisted configuration of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    /// Target id
    pub id: String,

    /// Display name
    pub name: String,

    /// Distribution kind
    pub kind: ServerKind,

    /// Game version (e.g. "1.21.1")
    pub version: String,

    /// Working directory of the server
    pub directory: PathBuf,

    /// Installed server artifact, once acquired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jar_path: Option<PathBuf>,

    /// Port the server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Java executable
    #[serde(default = "default_java_path")]
    pub java_path: String,

    /// Maximum heap in megabytes
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,

    /// Extra JVM arguments
    #[serde(default)]
    pub jvm_args: Vec<String>,

    /// Extra server arguments
    #[serde(default)]
    pub server_args: Vec<String>,
}

fn default_port() -> u16 {
    25565
}

fn default_java_path() -> String {
    "java".to_string()
}

fn default_memory_mb() -> u32 {
    2048
}

impl ServerRecord {
    /// Create a record with default port, Java and memory settings
    pub fn new(
        id: impl Into<String>,
        kind: ServerKind,
        version: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind,
            version: version.into(),
            directory: directory.into(),
            jar_path: None,
            port: default_port(),
            java_path: default_java_path(),
            memory_mb: default_memory_mb(),
            jvm_args: Vec::new(),
            server_args: Vec::new(),
        }
    }

    /// Builder: set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder: set the installed artifact
    pub fn with_jar_path(mut self, jar_path: impl Into<PathBuf>) -> Self {
        self.jar_path = Some(jar_path.into());
        self
    }

    /// Apply a partial update
    pub fn apply(&mut self, update: ServerUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(kind) = update.kind {
            self.kind = kind;
        }
        if let Some(version) = update.version {
            self.version = version;
        }
        if let Some(jar_path) = update.jar_path {
            self.jar_path = Some(jar_path);
        }
        if let Some(port) = update.port {
            self.port = port;
        }
        if let Some(java_path) = update.java_path {
            self.java_path = java_path;
        }
        if let Some(memory_mb) = update.memory_mb {
            self.memory_mb = memory_mb;
        }
    }
}

/// Partial update to a [`ServerRecord`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub kind: Option<ServerKind>,
    pub version: Option<String>,
    pub jar_path: Option<PathBuf>,
    pub port: Option<u16>,
    pub java_path: Option<String>,
    pub memory_mb: Option<u32>,
}

/// Lifecycle state of a supervised server process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessState {
    /// `stopped` and `crashed` accept a new start
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Crashed)
    }

    /// `starting` and `running` count as active for start guards
    pub fn is_active(&self) -> bool {
        matches!(self, ProcessState::Starting | ProcessState::Running)
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Externally visible status of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
    /// An acquisition job owns the target
    Provisioning,
}

impl From<ProcessState> for StatusKind {
    fn from(state: ProcessState) -> Self {
        match state {
            ProcessState::Stopped => StatusKind::Stopped,
            ProcessState::Starting => StatusKind::Starting,
            ProcessState::Running => StatusKind::Running,
            ProcessState::Stopping => StatusKind::Stopping,
            ProcessState::Crashed => StatusKind::Crashed,
        }
    }
}

/// Status snapshot published to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub status: StatusKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,

    pub participants: Vec<String>,
}

impl ServerStatus {
    /// Status of a target with no supervisor
    pub fn stopped() -> Self {
        Self {
            status: StatusKind::Stopped,
            uptime_seconds: None,
            participants: Vec::new(),
        }
    }

    /// Synthetic status while an acquisition owns the target
    pub fn provisioning() -> Self {
        Self {
            status: StatusKind::Provisioning,
            uptime_seconds: None,
            participants: Vec::new(),
        }
    }
}
