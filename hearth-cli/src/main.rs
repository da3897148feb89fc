//! Hearth CLI - run and provision Minecraft servers from a terminal

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hearth_core::prelude::*;
use hearth_supervisor::{DownloadManager, ProcessManager};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Run Minecraft Java Edition servers as supervised processes", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults: hearth.toml, then HEARTH_* variables)
    #[arg(short, long, env = "HEARTH_CONFIG_PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new server
    Add {
        /// Server ID
        id: String,
        /// Server kind: vanilla, paper, fabric or forge
        #[arg(short, long, default_value = "vanilla")]
        kind: ServerKind,
        /// Game version, or "latest"
        #[arg(short = 'V', long, default_value = "latest")]
        version: String,
        /// Directory the server runs in
        #[arg(short, long)]
        dir: PathBuf,
        /// TCP port the server listens on
        #[arg(short, long, default_value_t = 25565)]
        port: u16,
        /// Heap size in MiB
        #[arg(short, long, default_value_t = 2048)]
        memory: u32,
    },
    /// Start a server and attach to its console
    Run {
        /// Server ID
        id: String,
    },
    /// Download or install the server artifact
    Install {
        /// Server ID
        id: String,
        /// Override the server kind stored on the record
        #[arg(short, long)]
        kind: Option<ServerKind>,
        /// Game version, or "latest"
        #[arg(short = 'V', long, default_value = "latest")]
        version: String,
    },
    /// Show a server record and whether its installation is usable
    Status {
        /// Server ID
        id: String,
    },
    /// List registered servers
    List,
    /// List Java runtimes found on this machine
    Java,
    /// Version information
    Version,
}

struct App {
    config: HearthConfig,
    store: Arc<JsonFileStore>,
    providers: ProviderRegistry,
}

impl App {
    async fn load(path: Option<PathBuf>) -> Result<Self> {
        let config = match path {
            Some(path) => HearthConfig::from_file(path)?,
            None => HearthConfig::load()?,
        };
        let store = Arc::new(JsonFileStore::open(&config.store_path).await?);
        let providers =
            ProviderRegistry::with_defaults(config.downloads.http_client()?, &config.downloads);
        Ok(Self {
            config,
            store,
            providers,
        })
    }

    fn manager(&self) -> Arc<ProcessManager> {
        Arc::new(ProcessManager::new(
            self.store.clone(),
            self.providers.clone(),
            self.config.supervisor.clone(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("hearth {}", env!("CARGO_PKG_VERSION"));
            println!("hearth-core {}", hearth_core::VERSION);
        }
        Commands::Java => {
            let found = discover_installations().await;
            if found.is_empty() {
                println!("No Java runtimes found");
            }
            for java in found {
                println!(
                    "Java {:<3} {:<12} {} ({})",
                    java.major,
                    java.vendor,
                    java.path.display(),
                    java.full_version
                );
            }
        }
        Commands::Add {
            id,
            kind,
            version,
            dir,
            port,
            memory,
        } => {
            let app = App::load(cli.config).await?;
            add(&app, ServerRecord::new(id, kind, version, dir).with_port(port), memory).await?;
        }
        Commands::List => {
            let app = App::load(cli.config).await?;
            list(&app).await?;
        }
        Commands::Status { id } => {
            let app = App::load(cli.config).await?;
            status(&app, &id).await?;
        }
        Commands::Install { id, kind, version } => {
            let app = App::load(cli.config).await?;
            install(&app, &id, kind, version).await?;
        }
        Commands::Run { id } => {
            let app = App::load(cli.config).await?;
            run(&app, &id).await?;
        }
    }

    Ok(())
}

async fn add(app: &App, mut record: ServerRecord, memory: u32) -> Result<()> {
    if app.store.get_server(&record.id).await.is_ok() {
        bail!("Server '{}' already exists", record.id);
    }
    if app.store.is_port_reserved(record.port, None).await? {
        bail!("Port {} is already assigned to another server", record.port);
    }
    record.memory_mb = memory;
    let id = record.id.clone();
    app.store.insert_server(record).await?;
    println!("Added server '{}'", id);
    Ok(())
}

async fn list(app: &App) -> Result<()> {
    let servers = app.store.list_servers().await?;
    if servers.is_empty() {
        println!("No servers registered");
        return Ok(());
    }
    for record in servers {
        let installed = match app.providers.get(record.kind) {
            Ok(provider) => provider.validate_installation(&record).is_none(),
            Err(_) => false,
        };
        println!(
            "{:<20} {:<8} {:<10} port {:<5} {}",
            record.id,
            record.kind.to_string(),
            record.version,
            record.port,
            if installed { "installed" } else { "not installed" }
        );
    }
    Ok(())
}

async fn status(app: &App, id: &str) -> Result<()> {
    let record = app.store.get_server(id).await?;
    let problem = app.providers.get(record.kind)?.validate_installation(&record);
    let installation = match &problem {
        Some(problem) => serde_json::json!({ "ok": false, "problem": problem }),
        None => serde_json::json!({ "ok": true }),
    };
    let report = serde_json::json!({ "server": record, "installation": installation });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn install(app: &App, id: &str, kind: Option<ServerKind>, version: String) -> Result<()> {
    let record = app.store.get_server(id).await?;
    let kind = kind.unwrap_or(record.kind);

    let downloads = DownloadManager::new(app.manager(), app.config.downloads.clone());
    let job = downloads
        .start_download(DownloadRequest::new(id, kind, version))
        .await?;

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut shown_log = 0;
    let mut shown_progress = None;
    let mut cancel_requested = false;

    let finished = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_requested => {
                cancel_requested = true;
                println!("Cancelling...");
                downloads.cancel_download(&job.id);
            }
            _ = ticker.tick() => {
                let snapshot = downloads.require_job(&job.id)?;
                for line in snapshot.log.iter().skip(shown_log) {
                    println!("{}", line);
                }
                shown_log = snapshot.log.len();
                if shown_progress != Some(snapshot.progress) && !snapshot.status.is_terminal() {
                    shown_progress = Some(snapshot.progress);
                    println!("[{}] {}%", snapshot.status, snapshot.progress);
                }
                if snapshot.status.is_terminal() {
                    break snapshot;
                }
            }
        }
    };

    match finished.status {
        JobStatus::Completed => {
            let path = finished
                .result_path
                .context("completed job has no artifact path")?;
            println!("Installed {} {} at {}", kind, finished.version, path.display());
            Ok(())
        }
        _ => bail!(
            "Install failed: {}",
            finished.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}

/// Terminal input lines, read on a dedicated thread so a blocked read never
/// holds up shutdown
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run(app: &App, id: &str) -> Result<()> {
    let manager = app.manager();

    let target = id.to_string();
    manager.on_console(move |target_id, line| {
        if target_id == target {
            println!("{}", line.text);
        }
    });
    let target = id.to_string();
    manager.on_status(move |target_id, status| {
        if target_id == target {
            info!(target_id = %target_id, status = ?status.status, "Status changed");
        }
    });

    manager.start(id).await?;
    let process = manager
        .process(id)
        .context("server has no supervisor after start")?;
    let mut state = process.subscribe_state();
    let mut input = stdin_lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let report = manager.shutdown_all().await;
                info!(stopped = ?report.stopped, killed = ?report.killed, "Shut down");
                break;
            }
            line = input.recv(), if input_open => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = manager.send_command(id, line.trim()).await {
                        warn!(target_id = %id, error = %e, "Command not delivered");
                    }
                }
                None => {
                    input_open = false;
                    if manager.state(id).is_active() {
                        manager.stop(id)?;
                    }
                }
            },
            changed = state.changed() => {
                if changed.is_err() || state.borrow().is_terminal() {
                    break;
                }
            }
        }
    }

    if manager.state(id) == ProcessState::Crashed {
        bail!("Server '{}' crashed", id);
    }
    Ok(())
}
