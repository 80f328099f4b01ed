use crate::clienv::{self, EnvVar};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Global supervision tunables shared by every managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    /// Automatic restarts allowed before a crashed process is left in ERROR
    pub max_restart_attempts: u32,
    /// Restart `n` waits `restart_base_delay * n`
    pub restart_base_delay: Duration,
    /// Gap between readiness probes during startup
    pub readiness_poll_interval: Duration,
    /// Bound on each readiness probe
    pub probe_timeout: Duration,
    /// Longest accepted socket path, in bytes
    pub max_socket_path_len: usize,
    /// Bound on waiting for exit after SIGKILL
    pub kill_wait: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_restart_attempts: 3,
            restart_base_delay: Duration::from_secs(1),
            readiness_poll_interval: Duration::from_millis(100),
            probe_timeout: Duration::from_secs(1),
            max_socket_path_len: 104,
            kill_wait: Duration::from_secs(5),
        }
    }
}

/// On-disk form of [`SupervisorPolicy`]; every key is optional, durations in ms.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PolicyFile {
    pub max_restart_attempts: Option<u32>,
    pub restart_base_delay_ms: Option<u64>,
    pub readiness_poll_interval_ms: Option<u64>,
    pub probe_timeout_ms: Option<u64>,
    pub max_socket_path_len: Option<usize>,
    pub kill_wait_ms: Option<u64>,
}

impl SupervisorPolicy {
    /// Load `path` (or the default policy file), then apply environment overrides.
    /// A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let default_path = clienv::policy_path();
        let path = path.unwrap_or(&default_path);
        tracing::trace!(path = %path.display(), "Loading supervisor policy");

        let mut policy = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read policy from {}", path.display()))?;
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse policy from {}", path.display()))?
        } else {
            tracing::trace!("Policy file does not exist, using defaults");
            Self::default()
        };

        policy.apply_env_overrides(
            clienv::env_opt(EnvVar::MaxRestarts),
            clienv::env_opt(EnvVar::RestartDelayMs),
        );
        tracing::debug!(?policy, "Supervisor policy loaded");
        Ok(policy)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(content).context("Invalid supervisor policy TOML")?;
        Ok(Self::default().merged(&file))
    }

    /// Apply whatever keys the file sets on top of `self`.
    pub fn merged(mut self, file: &PolicyFile) -> Self {
        if let Some(n) = file.max_restart_attempts {
            self.max_restart_attempts = n;
        }
        if let Some(ms) = file.restart_base_delay_ms {
            self.restart_base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.readiness_poll_interval_ms {
            self.readiness_poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.probe_timeout_ms {
            self.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(len) = file.max_socket_path_len {
            self.max_socket_path_len = len;
        }
        if let Some(ms) = file.kill_wait_ms {
            self.kill_wait = Duration::from_millis(ms);
        }
        self
    }

    /// Unparsable values are ignored with a warning.
    pub fn apply_env_overrides(&mut self, max_restarts: Option<String>, restart_delay_ms: Option<String>) {
        if let Some(raw) = max_restarts {
            match raw.parse::<u32>() {
                Ok(n) => self.max_restart_attempts = n,
                Err(_) => tracing::warn!(
                    "Ignoring {}={:?}: not a non-negative integer",
                    EnvVar::MaxRestarts.as_str(),
                    raw
                ),
            }
        }
        if let Some(raw) = restart_delay_ms {
            match raw.parse::<u64>() {
                Ok(ms) => self.restart_base_delay = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    "Ignoring {}={:?}: not a millisecond count",
                    EnvVar::RestartDelayMs.as_str(),
                    raw
                ),
            }
        }
    }

    /// Delay before restart attempt `attempt` (1-based)
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        self.restart_base_delay.saturating_mul(attempt)
    }
}
