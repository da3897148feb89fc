//! Supervision of one server child process
//!
//! A [`ServerProcess`] is created the first time a target is started and is
//! reused for every later start, so console history survives restarts. Each
//! spawned child is owned by a single event-loop task that multiplexes its
//! stdout/stderr, control messages from callers, the readiness fallback timer,
//! the stop escalation timers and the child's exit. Callers never touch the
//! child directly; they go through the unbounded control channel.

use crate::error::{Result, SupervisorError};
use chrono::{DateTime, Utc};
use hearth_core::config::SupervisorSettings;
use hearth_core::console::{ConsoleBuffer, ConsoleLine};
use hearth_core::error::HearthError;
use hearth_core::events::{EventHub, ServerEvent};
use hearth_core::model::{ProcessState, ServerStatus, StatusKind};
use hearth_core::provider::{LaunchParameters, DEFAULT_STOP_COMMAND, JOIN_PATTERN, LEAVE_PATTERN};
use regex::Regex;
use std::collections::BTreeSet;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// How long to keep reading buffered output after the child exits
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Prefix of lines the supervisor writes into the console itself
const SYNTHETIC_PREFIX: &str = "[Hearth]";

/// Per-start behaviour of a supervised process
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Line that moves `starting` to `running`
    pub readiness_pattern: Option<Regex>,

    /// Written to stdin on stop; `None` goes straight to SIGTERM
    pub stop_command: Option<String>,

    /// Fallback after which a live process counts as running
    pub running_timeout: Duration,

    /// Wait after the stop command before SIGTERM
    pub stop_grace: Duration,

    /// Wait after SIGTERM before SIGKILL
    pub kill_grace: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from_settings(&SupervisorSettings::default())
    }
}

impl LaunchOptions {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            readiness_pattern: None,
            stop_command: Some(DEFAULT_STOP_COMMAND.to_string()),
            running_timeout: settings.running_timeout,
            stop_grace: settings.stop_grace,
            kill_grace: settings.kill_grace,
        }
    }

    pub fn with_readiness_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.readiness_pattern = pattern;
        self
    }

    pub fn with_stop_command(mut self, command: Option<String>) -> Self {
        self.stop_command = command;
        self
    }

    pub fn with_running_timeout(mut self, timeout: Duration) -> Self {
        self.running_timeout = timeout;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

/// A line for the child's stdin, with an optional delivery receipt
type StdinWrite = (String, Option<oneshot::Sender<std::io::Result<()>>>);

/// Messages from callers to the event loop owning the child
#[derive(Debug)]
enum Control {
    Write(String, oneshot::Sender<std::io::Result<()>>),
    Stop,
    Kill,
}

#[derive(Debug)]
struct Inner {
    state: ProcessState,
    started_at: Option<DateTime<Utc>>,
    participants: BTreeSet<String>,
    console: ConsoleBuffer,
    /// Present exactly while a child is alive
    control: Option<mpsc::UnboundedSender<Control>>,
    pid: Option<u32>,
    /// Set by stop/kill so the exit is not reported as a crash
    intentional: bool,
}

impl Inner {
    fn status(&self) -> ServerStatus {
        let uptime_seconds = match self.state {
            ProcessState::Running | ProcessState::Stopping => self
                .started_at
                .map(|t| (Utc::now() - t).num_seconds().max(0) as u64),
            _ => None,
        };
        ServerStatus {
            status: StatusKind::from(self.state),
            uptime_seconds,
            participants: self.participants.iter().cloned().collect(),
        }
    }
}

/// Supervisor of one target's server process
#[derive(Debug)]
pub struct ServerProcess {
    target_id: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ProcessState>,
    events: Arc<EventHub>,
}

impl ServerProcess {
    /// Create a stopped supervisor
    pub fn new(target_id: impl Into<String>, console_capacity: usize, events: Arc<EventHub>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ProcessState::Stopped);
        Arc::new(Self {
            target_id: target_id.into(),
            inner: Mutex::new(Inner {
                state: ProcessState::Stopped,
                started_at: None,
                participants: BTreeSet::new(),
                console: ConsoleBuffer::new(console_capacity),
                control: None,
                pid: None,
                intentional: false,
            }),
            state_tx,
            events,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, inner: &mut Inner, state: ProcessState) {
        inner.state = state;
        self.state_tx.send_replace(state);
    }

    fn status_event(&self, inner: &Inner) -> ServerEvent {
        ServerEvent::Status {
            target_id: self.target_id.clone(),
            status: inner.status(),
        }
    }

    fn console_event(&self, line: ConsoleLine) -> ServerEvent {
        ServerEvent::Console {
            target_id: self.target_id.clone(),
            line,
        }
    }

    fn participants_event(&self, inner: &Inner) -> ServerEvent {
        ServerEvent::Participants {
            target_id: self.target_id.clone(),
            participants: inner.participants.iter().cloned().collect(),
        }
    }

    /// Publish outside of any lock
    fn publish(&self, events: Vec<ServerEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Spawn the server process.
    ///
    /// Only valid from `stopped` or `crashed`. A spawn failure leaves the
    /// supervisor `crashed` with an explanatory console line and is also
    /// returned here.
    pub fn start(self: &Arc<Self>, launch: LaunchParameters, options: LaunchOptions) -> Result<()> {
        let mut events = Vec::new();

        let spawned = {
            let mut inner = self.lock();
            if !inner.state.is_terminal() {
                return Err(SupervisorError::AlreadyActive(self.target_id.clone()));
            }

            if !inner.participants.is_empty() {
                inner.participants.clear();
                events.push(self.participants_event(&inner));
            }
            inner.started_at = None;
            inner.intentional = false;
            self.set_state(&mut inner, ProcessState::Starting);
            events.push(self.status_event(&inner));

            let spawn = Command::new(&launch.executable)
                .args(&launch.arguments)
                .current_dir(&launch.working_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();

            match spawn {
                Ok(mut child) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    inner.control = Some(tx);
                    inner.pid = child.id();
                    let stdin = child.stdin.take();
                    let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
                    let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
                    Ok((child, stdin, stdout, stderr, rx))
                }
                Err(e) => {
                    let line = inner.console.push(format!(
                        "{} Failed to start server: {}",
                        SYNTHETIC_PREFIX, e
                    ));
                    events.push(self.console_event(line));
                    self.set_state(&mut inner, ProcessState::Crashed);
                    events.push(self.status_event(&inner));
                    Err(e)
                }
            }
        };

        self.publish(events);

        match spawned {
            Ok((child, stdin, stdout, stderr, rx)) => {
                info!(
                    target_id = %self.target_id,
                    pid = ?child.id(),
                    executable = %launch.executable,
                    "Server process spawned"
                );
                let this = Arc::clone(self);
                tokio::spawn(this.run(child, stdin, stdout, stderr, rx, options));
                Ok(())
            }
            Err(e) => {
                warn!(target_id = %self.target_id, error = %e, "Failed to spawn server process");
                Err(SupervisorError::Spawn(e.to_string()))
            }
        }
    }

    /// Ask the server to stop: stop command, then SIGTERM, then SIGKILL
    pub fn stop(&self) -> Result<()> {
        let (control, event) = {
            let mut inner = self.lock();
            if !inner.state.is_active() {
                return Err(SupervisorError::NotRunning(self.target_id.clone()));
            }
            let Some(control) = inner.control.clone() else {
                return Err(SupervisorError::NotRunning(self.target_id.clone()));
            };
            inner.intentional = true;
            self.set_state(&mut inner, ProcessState::Stopping);
            (control, self.status_event(&inner))
        };

        info!(target_id = %self.target_id, "Stopping server");
        self.publish(vec![event]);
        // A closed channel means the child already exited; the exit path owns the state
        let _ = control.send(Control::Stop);
        Ok(())
    }

    /// SIGKILL the process immediately
    pub fn kill(&self) -> Result<()> {
        let control = {
            let mut inner = self.lock();
            let Some(control) = inner.control.clone() else {
                return Err(SupervisorError::NoActiveProcess(self.target_id.clone()));
            };
            inner.intentional = true;
            control
        };

        warn!(target_id = %self.target_id, "Force killing server");
        let _ = control.send(Control::Kill);
        Ok(())
    }

    /// Write `text` followed by a newline to the server's stdin
    pub async fn send_command(&self, text: &str) -> Result<()> {
        let control = self
            .lock()
            .control
            .clone()
            .ok_or_else(|| SupervisorError::NoActiveProcess(self.target_id.clone()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        control
            .send(Control::Write(text.to_string(), reply_tx))
            .map_err(|_| SupervisorError::NoActiveProcess(self.target_id.clone()))?;

        reply_rx
            .await
            .map_err(|_| SupervisorError::NoActiveProcess(self.target_id.clone()))?
            .map_err(|e| SupervisorError::Core(HearthError::Io(e)))
    }

    pub fn status(&self) -> ServerStatus {
        self.lock().status()
    }

    pub fn state(&self) -> ProcessState {
        self.lock().state
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    /// Console history, oldest first
    pub fn console_lines(&self) -> Vec<ConsoleLine> {
        self.lock().console.lines()
    }

    /// Joined participants, sorted
    pub fn participants(&self) -> Vec<String> {
        self.lock().participants.iter().cloned().collect()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessState> {
        self.state_tx.subscribe()
    }

    /// Wait until the process is `stopped` or `crashed`; false on timeout
    pub async fn wait_for_terminal(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe_state();
        tokio::time::timeout(timeout, rx.wait_for(|state| state.is_terminal()))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Record one output line; returns true if it made the server ready
    fn handle_line(&self, text: String, readiness: Option<&Regex>) -> bool {
        let mut events = Vec::new();
        let mut ready = false;

        {
            let mut inner = self.lock();
            let line = inner.console.push(text);
            let text = line.text.clone();
            events.push(self.console_event(line));

            if inner.state == ProcessState::Starting && readiness.is_some_and(|re| re.is_match(&text)) {
                inner.started_at = Some(Utc::now());
                self.set_state(&mut inner, ProcessState::Running);
                events.push(self.status_event(&inner));
                ready = true;
            }

            let changed = if let Some(caps) = JOIN_PATTERN.captures(&text) {
                inner.participants.insert(caps[1].to_string())
            } else if let Some(caps) = LEAVE_PATTERN.captures(&text) {
                inner.participants.remove(&caps[1])
            } else {
                false
            };
            if changed {
                debug!(
                    target_id = %self.target_id,
                    participants = inner.participants.len(),
                    "Participants changed"
                );
                events.push(self.participants_event(&inner));
            }
        }

        if ready {
            info!(target_id = %self.target_id, "Server ready");
        }
        self.publish(events);
        ready
    }

    /// Fallback timer fired with no readiness line
    fn mark_running(&self) {
        let event = {
            let mut inner = self.lock();
            if inner.state != ProcessState::Starting {
                return;
            }
            inner.started_at = Some(Utc::now());
            self.set_state(&mut inner, ProcessState::Running);
            self.status_event(&inner)
        };
        info!(target_id = %self.target_id, "No readiness line seen; assuming server is running");
        self.publish(vec![event]);
    }

    fn handle_exit(&self, status: std::io::Result<ExitStatus>) {
        let mut events = Vec::new();
        let state = {
            let mut inner = self.lock();
            inner.control = None;
            inner.pid = None;
            inner.started_at = None;
            if !inner.participants.is_empty() {
                inner.participants.clear();
                events.push(self.participants_event(&inner));
            }

            let expected = inner.intentional || inner.state == ProcessState::Stopping;
            inner.intentional = false;
            if expected {
                self.set_state(&mut inner, ProcessState::Stopped);
            } else {
                let line = inner.console.push(format!(
                    "{} Server process exited unexpectedly ({})",
                    SYNTHETIC_PREFIX,
                    describe_exit(&status)
                ));
                events.push(self.console_event(line));
                self.set_state(&mut inner, ProcessState::Crashed);
            }
            events.push(self.status_event(&inner));
            inner.state
        };

        match state {
            ProcessState::Crashed => warn!(
                target_id = %self.target_id,
                exit = %describe_exit(&status),
                "Server process crashed"
            ),
            _ => info!(target_id = %self.target_id, "Server process stopped"),
        }
        self.publish(events);
    }

    async fn run(
        self: Arc<Self>,
        mut child: Child,
        stdin: Option<ChildStdin>,
        mut stdout: Option<Lines<BufReader<tokio::process::ChildStdout>>>,
        mut stderr: Option<Lines<BufReader<tokio::process::ChildStderr>>>,
        mut control: mpsc::UnboundedReceiver<Control>,
        options: LaunchOptions,
    ) {
        let readiness = options.readiness_pattern.as_ref();
        let mut fallback = Some(Instant::now() + options.running_timeout);
        let mut term_at: Option<Instant> = None;
        let mut kill_at: Option<Instant> = None;
        let (writer, writer_task) = spawn_stdin_writer(stdin, self.target_id.clone());

        let status = loop {
            tokio::select! {
                line = next_line(&mut stdout) => match line {
                    Some(line) => {
                        if self.handle_line(line, readiness) {
                            fallback = None;
                        }
                    }
                    None => stdout = None,
                },
                line = next_line(&mut stderr) => match line {
                    Some(line) => {
                        if self.handle_line(line, readiness) {
                            fallback = None;
                        }
                    }
                    None => stderr = None,
                },
                Some(message) = control.recv() => match message {
                    Control::Write(text, reply) => {
                        // A dead writer drops the receipt; the caller sees NoActiveProcess
                        let _ = writer.send((text, Some(reply)));
                    }
                    Control::Stop => {
                        fallback = None;
                        match &options.stop_command {
                            Some(command) => {
                                let _ = writer.send((command.clone(), None));
                                term_at = Some(Instant::now() + options.stop_grace);
                            }
                            None => term_at = Some(Instant::now()),
                        }
                    }
                    Control::Kill => {
                        fallback = None;
                        term_at = None;
                        kill_at = None;
                        if let Err(e) = child.start_kill() {
                            warn!(target_id = %self.target_id, error = %e, "Failed to kill server process");
                        }
                    }
                },
                _ = sleep_until_opt(fallback) => {
                    fallback = None;
                    self.mark_running();
                }
                _ = sleep_until_opt(term_at) => {
                    term_at = None;
                    debug!(target_id = %self.target_id, "Stop grace elapsed; sending SIGTERM");
                    terminate(&mut child, &self.target_id);
                    kill_at = Some(Instant::now() + options.kill_grace);
                }
                _ = sleep_until_opt(kill_at) => {
                    kill_at = None;
                    warn!(target_id = %self.target_id, "Server ignored SIGTERM; sending SIGKILL");
                    if let Err(e) = child.start_kill() {
                        warn!(target_id = %self.target_id, error = %e, "Failed to kill server process");
                    }
                }
                status = child.wait() => break status,
            }
        };

        // Output still buffered in the pipes belongs before the exit line
        let drain = async {
            while let Some(line) = next_line(&mut stdout).await {
                self.handle_line(line, None);
            }
            while let Some(line) = next_line(&mut stderr).await {
                self.handle_line(line, None);
            }
        };
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, drain).await;

        drop(writer);
        writer_task.abort();

        self.handle_exit(status);
    }
}

/// Next line of an open reader; pends forever once the reader is gone
async fn next_line<R>(reader: &mut Option<Lines<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match reader {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns the child's stdin so a write blocked on a full pipe never holds up
/// the event loop
fn spawn_stdin_writer(
    mut stdin: Option<ChildStdin>,
    target_id: String,
) -> (mpsc::UnboundedSender<StdinWrite>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<StdinWrite>();
    let task = tokio::spawn(async move {
        while let Some((text, receipt)) = rx.recv().await {
            let result = write_line(&mut stdin, &text).await;
            match receipt {
                Some(receipt) => {
                    let _ = receipt.send(result);
                }
                None => {
                    if let Err(e) = result {
                        warn!(target_id = %target_id, error = %e, "Failed to write to server stdin");
                    }
                }
            }
        }
    });
    (tx, task)
}

async fn write_line(stdin: &mut Option<ChildStdin>, text: &str) -> std::io::Result<()> {
    let Some(stdin) = stdin.as_mut() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "stdin is closed",
        ));
    };
    stdin.write_all(format!("{}\n", text).as_bytes()).await?;
    stdin.flush().await
}

/// SIGTERM on unix; elsewhere there is no gentler signal than a kill
fn terminate(child: &mut Child, target_id: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(target_id = %target_id, pid, error = %e, "Failed to send SIGTERM");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            warn!(target_id = %target_id, error = %e, "Failed to terminate server process");
        }
    }
}

fn describe_exit(status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => {
            if let Some(code) = status.code() {
                return format!("exit code {}", code);
            }
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return format!("signal {}", signal);
                }
            }
            "unknown exit status".to_string()
        }
        Err(e) => format!("wait failed: {}", e),
    }
}
