use clap::{Args, Parser, Subcommand};
use plugin_daemon::daemon::process::validate_process_name;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plugin-daemon")]
#[command(version)]
#[command(
    about = "Supervise background plugin daemons and talk to them over local JSON-RPC",
    long_about = None
)]
pub(crate) struct Cli {
    /// Supervisor policy file (default: $PLUGIN_DAEMON_CONFIG_DIR/supervisor.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Supervise one daemon in the foreground until Ctrl+C or SIGTERM
    Run(RunArgs),

    /// Send a request and print the result
    Call {
        /// Daemon socket path
        #[arg(long)]
        socket: PathBuf,

        /// Method name
        method: String,

        /// Params as a JSON document
        #[arg(long)]
        params: Option<String>,

        /// Bound on the whole exchange (default: 30000)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Send a notification (no response is read)
    Notify {
        #[arg(long)]
        socket: PathBuf,

        method: String,

        #[arg(long)]
        params: Option<String>,
    },

    /// Check that a daemon socket accepts connections
    Ping {
        #[arg(long)]
        socket: PathBuf,

        /// Connect timeout (default: 1000)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Run the reference conversation-monitor daemon
    Serve {
        #[arg(long)]
        socket: PathBuf,
    },
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Logical process name; also names its runtime directory
    #[arg(long, value_parser = parse_process_name)]
    pub name: String,

    /// Socket the daemon listens on (default: <runtime_dir>/<name>/daemon.sock)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Working directory for the daemon
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variable, repeatable
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Enable health checks at this interval
    #[arg(long)]
    pub health_interval_ms: Option<u64>,

    #[arg(long, default_value = "2000")]
    pub health_timeout_ms: u64,

    /// Consecutive failed probes before the daemon is terminated
    #[arg(long, default_value = "3")]
    pub health_threshold: u32,

    #[arg(long, default_value = "10000")]
    pub startup_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL on stop
    #[arg(long, default_value = "5000")]
    pub grace_ms: u64,

    /// Daemon command and its arguments (after `--`)
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

fn parse_process_name(raw: &str) -> Result<String, String> {
    validate_process_name(raw)
        .map(|()| raw.to_string())
        .map_err(|reason| format!("invalid process name '{raw}': {reason}"))
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
