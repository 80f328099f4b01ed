//! Lifecycle supervision for background plugin daemons
//!
//! Every managed process has one [`ProcessRecord`] in a registry guarded by a
//! tokio `RwLock`. Transitions are short critical sections; nothing waits on
//! I/O or time while holding the lock. Background tasks (exit watcher, health
//! loop, restart loop) carry the record generation they were created for and
//! do nothing once a start, restart attempt or stop has moved it on.

use super::client::check_connection;
use super::health::{spawn_health_monitor, HealthTarget, HealthTracker, HealthVerdict, ProbeSlot};
use super::log_buffer::{LogBuffer, LogLine, OutputStream};
use super::pidfile::{cleanup_orphan, remove_socket_quietly, PidFile};
use super::process::{ProcessConfig, ProcessInfo, ProcessState};
use super::signals::{self, ExitWatch, Signal, Termination};
use crate::clienv;
use crate::config::SupervisorPolicy;
use crate::error::{Result, SupervisorError};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

const OUTPUT_TARGET: &str = "plugin_daemon::output";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorMode {
    Active,
    /// Set once by `stop_all_processes`; never reverts
    ShuttingDown,
}

struct ProcessRecord {
    config: ProcessConfig,
    state: ProcessState,
    generation: u64,
    pid: Option<u32>,
    /// Exit watch of the live child; the child itself is owned by its exit monitor
    exit: Option<ExitWatch>,
    health: HealthTracker,
    health_task: Option<JoinHandle<()>>,
    restart_attempts: u32,
    last_error: Option<String>,
    state_changed_at: SystemTime,
    running_since: Option<Instant>,
}

impl ProcessRecord {
    fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            state: ProcessState::Stopped,
            generation: 0,
            pid: None,
            exit: None,
            health: HealthTracker::new(),
            health_task: None,
            restart_attempts: 0,
            last_error: None,
            state_changed_at: SystemTime::now(),
            running_since: None,
        }
    }

    fn set_state(&mut self, state: ProcessState) {
        self.state = state;
        self.state_changed_at = SystemTime::now();
        if state != ProcessState::Running {
            self.running_since = None;
        }
    }

    /// Reset for a fresh `start_process`; returns the new generation.
    fn begin_start(&mut self, config: ProcessConfig) -> u64 {
        self.config = config;
        self.generation += 1;
        self.pid = None;
        self.exit = None;
        self.restart_attempts = 0;
        self.last_error = None;
        self.halt_health();
        self.set_state(ProcessState::Starting);
        self.generation
    }

    fn halt_health(&mut self) {
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
        self.health = HealthTracker::new();
    }

    fn is_generation(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn to_info(&self, name: &str) -> ProcessInfo {
        ProcessInfo {
            name: name.to_string(),
            state: self.state,
            pid: self.pid,
            socket_path: self.config.socket_path.clone(),
            restart_attempts: self.restart_attempts,
            health_failures: self.health.failures(),
            last_error: self.last_error.clone(),
            state_changed_at_ms: epoch_ms(self.state_changed_at),
            uptime_secs: self.running_since.map(|t| t.elapsed().as_secs()),
        }
    }
}

struct Registry {
    mode: SupervisorMode,
    records: HashMap<String, ProcessRecord>,
}

impl Registry {
    fn current_mut(&mut self, name: &str, generation: u64) -> Option<&mut ProcessRecord> {
        self.records
            .get_mut(name)
            .filter(|rec| rec.is_generation(generation))
    }
}

struct Inner {
    policy: SupervisorPolicy,
    runtime_dir: PathBuf,
    registry: RwLock<Registry>,
    logs: LogBuffer,
}

/// Supervises named background daemons: start, readiness, health checks,
/// crash restarts with linear backoff, and graceful stop.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// `runtime_dir` holds `<name>/daemon.pid` for every managed process.
    pub fn new(policy: SupervisorPolicy, runtime_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                runtime_dir: runtime_dir.into(),
                registry: RwLock::new(Registry {
                    mode: SupervisorMode::Active,
                    records: HashMap::new(),
                }),
                logs: LogBuffer::default(),
            }),
        }
    }

    pub fn policy(&self) -> &SupervisorPolicy {
        &self.inner.policy
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.inner.runtime_dir
    }

    pub fn pid_file_path(&self, name: &str) -> PathBuf {
        self.inner.pid_file_path(name)
    }

    /// Start a daemon and wait until its socket accepts connections.
    ///
    /// Resolves with the pid once the process is RUNNING. On failure the child
    /// is killed, its PID and socket files are removed, and the record is left
    /// in ERROR with the failure message.
    pub async fn start_process(&self, config: ProcessConfig) -> Result<u32> {
        config
            .validate_name()
            .map_err(|reason| SupervisorError::InvalidName {
                name: config.name.clone(),
                reason,
            })?;

        let len = config.socket_path_len();
        let max = self.inner.policy.max_socket_path_len;
        if len > max {
            return Err(SupervisorError::SocketPathTooLong {
                name: config.name.clone(),
                path: config.socket_path.clone(),
                len,
                max,
            });
        }

        let name = config.name.clone();
        let generation = {
            let mut registry = self.inner.registry.write().await;
            if registry.mode == SupervisorMode::ShuttingDown {
                return Err(SupervisorError::ShuttingDown { name });
            }
            let record = registry
                .records
                .entry(name.clone())
                .or_insert_with(|| ProcessRecord::new(config.clone()));
            if record.state.is_active() {
                return Err(SupervisorError::AlreadyActive {
                    name,
                    state: record.state,
                });
            }
            record.begin_start(config.clone())
        };
        self.inner.logs.clear(&name);

        info!("Starting process '{}': {}", name, config.command_line());

        let pid_file = PidFile::new(self.inner.pid_file_path(&name));
        cleanup_orphan(
            &pid_file,
            config.shutdown_grace_period,
            self.inner.policy.kill_wait,
        )
        .await;

        match self.inner.launch(&config, generation).await {
            Ok(pid) => Ok(pid),
            Err(e) => {
                let mut registry = self.inner.registry.write().await;
                match registry.current_mut(&name, generation) {
                    Some(record) if !matches!(e, SupervisorError::Cancelled { .. }) => {
                        error!("Failed to start process '{}': {}", name, e);
                        record.last_error = Some(e.to_string());
                        record.set_state(ProcessState::Error);
                        Err(e)
                    }
                    _ => {
                        info!("Start of '{}' superseded by stop", name);
                        Err(SupervisorError::Cancelled { name })
                    }
                }
            }
        }
    }

    /// Stop a daemon: SIGTERM, wait the grace period, SIGKILL if needed, then
    /// remove its PID and socket files. Unknown, stopped and already-stopping
    /// names return immediately. A pending start or restart is cancelled.
    pub async fn stop_process(&self, name: &str) -> Result<()> {
        let (generation, pid, exit, grace, socket_path) = {
            let mut registry = self.inner.registry.write().await;
            let Some(record) = registry.records.get_mut(name) else {
                debug!("Stop requested for unknown process '{}'", name);
                return Ok(());
            };
            match record.state {
                ProcessState::Stopped | ProcessState::Stopping => return Ok(()),
                ProcessState::Starting | ProcessState::Running | ProcessState::Error => {}
            }

            info!("Stopping process '{}'", name);
            record.generation += 1;
            record.halt_health();
            record.set_state(ProcessState::Stopping);
            (
                record.generation,
                record.pid.take(),
                record.exit.take(),
                record.config.shutdown_grace_period,
                record.config.socket_path.clone(),
            )
        };

        let mut result = Ok(());
        if let (Some(pid), Some(mut exit)) = (pid, exit) {
            match signals::terminate_child(pid, &mut exit, grace, self.inner.policy.kill_wait).await {
                Ok(Termination::Unconfirmed) => {
                    warn!("Process '{}' (PID {}) still present after SIGKILL", name, pid)
                }
                Ok(outcome) => debug!(process = name, pid, ?outcome, "Process terminated"),
                Err(source) => {
                    warn!("Failed to signal process '{}' (PID {}): {}", name, pid, source);
                    result = Err(SupervisorError::Signal { pid, source });
                }
            }
        }

        PidFile::new(self.inner.pid_file_path(name)).remove();
        remove_socket_quietly(&socket_path, "socket file");

        {
            let mut registry = self.inner.registry.write().await;
            if let Some(record) = registry.current_mut(name, generation) {
                record.set_state(ProcessState::Stopped);
            }
        }
        info!("Stopped process '{}'", name);
        result
    }

    /// Refuse further starts and stop every process concurrently. Individual
    /// failures are logged.
    pub async fn stop_all_processes(&self) {
        let names: Vec<String> = {
            let mut registry = self.inner.registry.write().await;
            registry.mode = SupervisorMode::ShuttingDown;
            registry.records.keys().cloned().collect()
        };
        info!("Shutting down {} supervised process(es)", names.len());

        let mut stops = JoinSet::new();
        for name in names {
            let supervisor = self.clone();
            stops.spawn(async move {
                let result = supervisor.stop_process(&name).await;
                (name, result)
            });
        }
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => warn!("Failed to stop process '{}': {}", name, e),
                Err(e) => warn!("Stop task failed: {}", e),
            }
        }
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.get_state(name).await == Some(ProcessState::Running)
    }

    pub async fn get_state(&self, name: &str) -> Option<ProcessState> {
        let registry = self.inner.registry.read().await;
        registry.records.get(name).map(|r| r.state)
    }

    pub async fn get_pid(&self, name: &str) -> Option<u32> {
        let registry = self.inner.registry.read().await;
        registry.records.get(name).and_then(|r| r.pid)
    }

    pub async fn get_process_info(&self, name: &str) -> Option<ProcessInfo> {
        let registry = self.inner.registry.read().await;
        registry.records.get(name).map(|r| r.to_info(name))
    }

    /// Snapshots of every record, sorted by name
    pub async fn list_processes(&self) -> Vec<ProcessInfo> {
        let registry = self.inner.registry.read().await;
        let mut infos: Vec<ProcessInfo> = registry
            .records
            .iter()
            .map(|(name, record)| record.to_info(name))
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Last `lines` lines of captured stdout/stderr
    pub fn get_logs(&self, name: &str, lines: usize) -> Vec<LogLine> {
        self.inner.logs.tail(name, lines)
    }
}

impl Inner {
    fn pid_file_path(&self, name: &str) -> PathBuf {
        clienv::pid_file_path(&self.runtime_dir, name)
    }

    async fn is_current(&self, name: &str, generation: u64) -> bool {
        let registry = self.registry.read().await;
        registry
            .records
            .get(name)
            .is_some_and(|r| r.is_generation(generation))
    }

    /// Spawn, wait for readiness, promote to RUNNING. Shared by the initial
    /// start and each restart attempt; on failure the child is killed and its
    /// artifacts removed, leaving the state transition to the caller.
    async fn launch(self: &Arc<Self>, config: &ProcessConfig, generation: u64) -> Result<u32> {
        let (pid, mut exit) = self.spawn_child(config, generation).await?;

        let outcome = match self.await_ready(config, generation, &mut exit).await {
            Ok(()) => self.promote(config, generation, pid, &exit).await,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            self.abort_launch(config, generation, pid, &mut exit).await;
            return Err(e);
        }
        Ok(pid)
    }

    async fn spawn_child(self: &Arc<Self>, config: &ProcessConfig, generation: u64) -> Result<(u32, ExitWatch)> {
        let name = config.name.as_str();
        if !self.is_current(name, generation).await {
            return Err(SupervisorError::Cancelled {
                name: name.to_string(),
            });
        }

        remove_socket_quietly(&config.socket_path, "stale socket file");

        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            name: name.to_string(),
            command: config.command_line(),
            source,
        })?;
        let Some(pid) = child.id() else {
            return Err(SupervisorError::ExitedDuringStartup {
                name: name.to_string(),
                status: "exited before its pid was read".to_string(),
            });
        };
        info!("Spawned '{}' with PID {} (generation {})", name, pid, generation);

        spawn_log_readers(self, name, &mut child);

        let (tx, rx) = watch::channel(None);
        let recorded = {
            let mut registry = self.registry.write().await;
            match registry.current_mut(name, generation) {
                Some(record) => {
                    record.pid = Some(pid);
                    record.exit = Some(rx.clone());
                    true
                }
                None => false,
            }
        };
        spawn_exit_monitor(Arc::clone(self), name.to_string(), generation, child, tx);

        if !recorded {
            // Stopped between spawn and registration; nobody else knows this pid.
            if let Err(e) = signals::send_signal(pid, Signal::Kill) {
                debug!(pid, "Kill of superseded child failed: {}", e);
            }
            return Err(SupervisorError::Cancelled {
                name: name.to_string(),
            });
        }
        Ok((pid, rx))
    }

    /// Poll the socket until it accepts, the child exits, the deadline passes,
    /// or a stop supersedes this generation.
    async fn await_ready(&self, config: &ProcessConfig, generation: u64, exit: &mut ExitWatch) -> Result<()> {
        let name = config.name.as_str();
        let deadline = Instant::now() + config.startup_timeout;

        loop {
            let exited = exit.borrow().clone();
            if let Some(status) = exited {
                return Err(SupervisorError::ExitedDuringStartup {
                    name: name.to_string(),
                    status,
                });
            }
            if !self.is_current(name, generation).await {
                return Err(SupervisorError::Cancelled {
                    name: name.to_string(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(SupervisorError::StartupTimeout {
                    name: name.to_string(),
                    socket_path: config.socket_path.clone(),
                    timeout_ms: u64::try_from(config.startup_timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }

            let probe_timeout = self.policy.probe_timeout.min(deadline - now);
            match check_connection(&config.socket_path, Some(probe_timeout)).await {
                Ok(()) => return Ok(()),
                Err(e) => trace!(process = name, "Not ready yet: {}", e),
            }

            let pause = self
                .policy
                .readiness_poll_interval
                .min(deadline.saturating_duration_since(Instant::now()));
            signals::wait_for_exit(exit, pause).await;
        }
    }

    /// Write the PID file and move to RUNNING, arming health checks.
    ///
    /// The exit watch is re-checked under the write lock: the exit monitor
    /// publishes before it takes the lock, and an exit seen by `handle_exit`
    /// while still STARTING is left to this path.
    async fn promote(
        self: &Arc<Self>,
        config: &ProcessConfig,
        generation: u64,
        pid: u32,
        exit: &ExitWatch,
    ) -> Result<()> {
        let name = config.name.as_str();
        let mut registry = self.registry.write().await;
        let Some(record) = registry.current_mut(name, generation) else {
            return Err(SupervisorError::Cancelled {
                name: name.to_string(),
            });
        };
        let exited = exit.borrow().clone();
        if let Some(status) = exited {
            return Err(SupervisorError::ExitedDuringStartup {
                name: name.to_string(),
                status,
            });
        }

        let pid_path = self.pid_file_path(name);
        PidFile::new(&pid_path)
            .write(pid)
            .map_err(|source| SupervisorError::PidFile {
                path: pid_path.clone(),
                source,
            })?;

        record.restart_attempts = 0;
        record.last_error = None;
        record.health = HealthTracker::new();
        record.set_state(ProcessState::Running);
        record.running_since = Some(Instant::now());
        if let Some(policy) = record.config.health_check {
            record.health_task = Some(spawn_health_monitor(
                Arc::clone(self),
                name.to_string(),
                generation,
                policy,
                record.config.socket_path.clone(),
            ));
        }

        info!("Process '{}' is running (PID {})", name, pid);
        Ok(())
    }

    /// Kill a child whose launch failed and clear its artifacts, unless a stop
    /// already owns the record.
    async fn abort_launch(&self, config: &ProcessConfig, generation: u64, pid: u32, exit: &mut ExitWatch) {
        let name = config.name.as_str();
        {
            let mut registry = self.registry.write().await;
            let Some(record) = registry.current_mut(name, generation) else {
                return;
            };
            record.pid = None;
            record.exit = None;
            PidFile::new(self.pid_file_path(name)).remove();
            remove_socket_quietly(&config.socket_path, "socket file");
        }

        let already_exited = exit.borrow().is_some();
        if already_exited {
            return;
        }
        match signals::send_signal(pid, Signal::Kill) {
            Ok(()) => {
                if !signals::wait_for_exit(exit, self.policy.kill_wait).await {
                    warn!("Process '{}' (PID {}) still present after SIGKILL", name, pid);
                }
            }
            Err(e) => debug!(process = name, pid, "Kill after failed launch: {}", e),
        }
    }

    /// Called by the exit monitor once a child has been reaped.
    ///
    /// Boxed so the exit → restart → launch → exit monitor chain has a
    /// nameable future type.
    fn handle_exit(
        self: Arc<Self>,
        name: String,
        generation: u64,
        status: String,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let config = {
                let mut registry = self.registry.write().await;
                if registry.mode == SupervisorMode::ShuttingDown {
                    debug!(process = %name, "Exit during shutdown: {}", status);
                    return;
                }
                let Some(record) = registry.current_mut(&name, generation) else {
                    trace!(process = %name, generation, "Exit of superseded child: {}", status);
                    return;
                };
                if record.state != ProcessState::Running {
                    // Startup and stop paths own exits in every other state.
                    debug!(process = %name, state = %record.state, "Exit: {}", status);
                    return;
                }

                warn!(
                    "Process '{}' (PID {:?}) exited unexpectedly: {}",
                    name, record.pid, status
                );
                record.halt_health();
                record.pid = None;
                record.exit = None;
                record.last_error = Some(format!("exited unexpectedly ({status})"));
                record.set_state(ProcessState::Starting);
                PidFile::new(self.pid_file_path(&name)).remove();
                remove_socket_quietly(&record.config.socket_path, "socket file");
                record.config.clone()
            };

            self.restart(config, generation).await;
        })
    }

    /// Restart a crashed process with linear backoff until an attempt reaches
    /// RUNNING, the budget runs out (ERROR), or a stop supersedes it.
    async fn restart(self: &Arc<Self>, config: ProcessConfig, crashed_generation: u64) {
        let name = config.name.as_str();
        let max = self.policy.max_restart_attempts;
        let mut generation = crashed_generation;

        loop {
            let attempt = {
                let mut registry = self.registry.write().await;
                if registry.mode == SupervisorMode::ShuttingDown {
                    return;
                }
                let Some(record) = registry.current_mut(name, generation) else {
                    return;
                };
                if record.restart_attempts >= max {
                    let cause = record.last_error.take().unwrap_or_default();
                    let message = format!("gave up after {max} restart attempt(s); last failure: {cause}");
                    error!("Process '{}' {}", name, message);
                    record.last_error = Some(message);
                    record.set_state(ProcessState::Error);
                    return;
                }
                record.restart_attempts += 1;
                record.generation += 1;
                generation = record.generation;
                record.restart_attempts
            };

            let delay = self.policy.restart_delay(attempt);
            info!(
                "Restarting '{}' in {:?} (attempt {}/{})",
                name, delay, attempt, max
            );
            tokio::time::sleep(delay).await;

            match self.launch(&config, generation).await {
                Ok(pid) => {
                    info!("Process '{}' restarted with PID {}", name, pid);
                    return;
                }
                Err(SupervisorError::Cancelled { .. }) => return,
                Err(e) => {
                    warn!("Restart attempt {} for '{}' failed: {}", attempt, name, e);
                    let mut registry = self.registry.write().await;
                    match registry.current_mut(name, generation) {
                        Some(record) => record.last_error = Some(e.to_string()),
                        None => return,
                    }
                }
            }
        }
    }
}

impl HealthTarget for Inner {
    async fn begin_probe(&self, name: &str, generation: u64) -> ProbeSlot {
        let mut registry = self.registry.write().await;
        match registry.current_mut(name, generation) {
            Some(record) if record.state == ProcessState::Running => {
                if record.health.try_begin() {
                    ProbeSlot::Acquired
                } else {
                    ProbeSlot::Busy
                }
            }
            _ => ProbeSlot::Retired,
        }
    }

    async fn finish_probe(&self, name: &str, generation: u64, healthy: bool) {
        let target = {
            let mut registry = self.registry.write().await;
            let Some(record) = registry.current_mut(name, generation) else {
                return;
            };
            if record.state != ProcessState::Running {
                return;
            }
            let threshold = record
                .config
                .health_check
                .map(|p| p.failure_threshold)
                .unwrap_or(1);
            match record.health.complete(healthy, threshold) {
                HealthVerdict::Healthy { recovered: true } => {
                    info!("Process '{}' is healthy again", name);
                    None
                }
                HealthVerdict::Healthy { recovered: false } => None,
                HealthVerdict::Failing { failures } | HealthVerdict::StillUnhealthy { failures } => {
                    debug!(process = name, failures, threshold, "Health check failed");
                    None
                }
                HealthVerdict::Unhealthy { failures } => {
                    warn!(
                        "Process '{}' failed {} consecutive health checks, terminating",
                        name, failures
                    );
                    record.pid
                }
            }
        };

        // The exit monitor drives the resulting crash/restart transition.
        if let Some(pid) = target {
            if let Err(e) = signals::send_signal(pid, Signal::Terminate) {
                warn!("Failed to terminate unhealthy process '{}' (PID {}): {}", name, pid, e);
            }
        }
    }
}

/// Reap the child, publish its exit on the watch, then report the exit.
fn spawn_exit_monitor(
    inner: Arc<Inner>,
    name: String,
    generation: u64,
    mut child: Child,
    exit_tx: watch::Sender<Option<String>>,
) {
    tokio::spawn(async move {
        let status = match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("wait failed: {e}"),
        };
        debug!(process = %name, generation, "Child exited: {}", status);
        let _ = exit_tx.send(Some(status.clone()));
        inner.handle_exit(name, generation, status).await;
    });
}

/// Forward child stdout/stderr lines to tracing and the log buffer.
fn spawn_log_readers(inner: &Arc<Inner>, name: &str, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let inner = Arc::clone(inner);
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: OUTPUT_TARGET, process = %name, stream = "stdout", "{}", line);
                inner.logs.push(&name, OutputStream::Stdout, line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let inner = Arc::clone(inner);
        let name = name.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: OUTPUT_TARGET, process = %name, stream = "stderr", "{}", line);
                inner.logs.push(&name, OutputStream::Stderr, line);
            }
        });
    }
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
