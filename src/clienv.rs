use std::path::PathBuf;

/// Environment variables read by the supervisor and CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    ConfigDir,
    RuntimeDir,
    MaxRestarts,
    RestartDelayMs,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::ConfigDir => "PLUGIN_DAEMON_CONFIG_DIR",
            EnvVar::RuntimeDir => "PLUGIN_DAEMON_RUNTIME_DIR",
            EnvVar::MaxRestarts => "PLUGIN_DAEMON_MAX_RESTARTS",
            EnvVar::RestartDelayMs => "PLUGIN_DAEMON_RESTART_DELAY_MS",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const APP_SUBDIR: &str = "plugin-daemon";
const RUNTIME_SUBDIR: &str = "run";
const PID_FILE_NAME: &str = "daemon.pid";
const SOCKET_FILE_NAME: &str = "daemon.sock";

/// Non-empty value of an environment variable
pub fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str())
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Config directory ($PLUGIN_DAEMON_CONFIG_DIR or ~/.config/plugin-daemon)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::ConfigDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(APP_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Runtime directory holding per-process PID files and default sockets
/// ($PLUGIN_DAEMON_RUNTIME_DIR or ~/.local/share/plugin-daemon/run)
pub fn runtime_dir() -> PathBuf {
    let dir = env_opt(EnvVar::RuntimeDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
                .join(APP_SUBDIR)
                .join(RUNTIME_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved runtime directory");
    dir
}

/// Policy file path (<config_dir>/supervisor.toml)
pub fn policy_path() -> PathBuf {
    config_dir().join("supervisor.toml")
}

pub fn pid_file_path(runtime_dir: &std::path::Path, name: &str) -> PathBuf {
    runtime_dir.join(name).join(PID_FILE_NAME)
}

/// Socket location used when the caller does not choose one
pub fn default_socket_path(runtime_dir: &std::path::Path, name: &str) -> PathBuf {
    runtime_dir.join(name).join(SOCKET_FILE_NAME)
}
