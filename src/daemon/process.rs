//! Configuration and snapshot types for supervised background processes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a supervised process
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Spawned (or restarting), waiting for the socket to accept connections
    Starting,
    /// Socket accepted a connection; health checks active if configured
    Running,
    /// Graceful termination in progress
    Stopping,
    /// Stopped on request
    Stopped,
    /// Startup failed or restarts were exhausted (check `last_error`)
    Error,
}

impl ProcessState {
    /// States in which a new `start_process` for the same name is rejected
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running | ProcessState::Stopping
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Running => "running",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Error => "error",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Periodic connectivity probe settings
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheckPolicy {
    /// Time between probes
    pub interval: Duration,
    /// Bound on a single connection attempt
    pub timeout: Duration,
    /// Consecutive failures before the process is sent a terminate signal
    pub failure_threshold: u32,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(2),
            failure_threshold: 3,
        }
    }
}

impl HealthCheckPolicy {
    pub fn new(interval: Duration, timeout: Duration, failure_threshold: u32) -> Self {
        Self {
            interval,
            timeout,
            failure_threshold: failure_threshold.max(1),
        }
    }
}

/// Launch configuration for one background daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    /// Unique logical name; also names the PID file directory
    pub name: String,
    /// Executable
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
    /// Local socket the daemon listens on
    pub socket_path: PathBuf,
    pub health_check: Option<HealthCheckPolicy>,
    /// Bound on waiting for the socket to accept connections
    pub startup_timeout: Duration,
    /// Time between SIGTERM and SIGKILL on stop
    pub shutdown_grace_period: Duration,
}

impl ProcessConfig {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        socket_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            socket_path: socket_path.into(),
            health_check: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(|s| s.into()).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn health_check(mut self, policy: HealthCheckPolicy) -> Self {
        self.health_check = Some(policy);
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period = grace;
        self
    }

    /// `command arg1 arg2 …`, for log and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Validate the name for use as a path component.
    pub(crate) fn validate_name(&self) -> Result<(), &'static str> {
        validate_process_name(&self.name)
    }

    pub fn socket_path_len(&self) -> usize {
        self.socket_path.as_os_str().len()
    }
}

/// Process names become a directory under the runtime dir, so they must be a
/// single plain path component.
pub fn validate_process_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name must not be empty");
    }
    if name == "." || name == ".." {
        return Err("name must not be a relative directory reference");
    }
    if name.contains(['/', '\\', '\0']) {
        return Err("name must not contain path separators or NUL");
    }
    Ok(())
}

/// Serializable point-in-time view of a process record
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessInfo {
    pub name: String,
    pub state: ProcessState,
    pub pid: Option<u32>,
    pub socket_path: PathBuf,
    /// Automatic restarts attempted since the last successful start
    pub restart_attempts: u32,
    /// Consecutive failed health probes
    pub health_failures: u32,
    pub last_error: Option<String>,
    /// Unix epoch millis of the last state transition
    pub state_changed_at_ms: u64,
    /// Seconds since the process reached running, while running
    pub uptime_secs: Option<u64>,
}

impl ProcessInfo {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}
