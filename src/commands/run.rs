use crate::args::RunArgs;
use anyhow::{Context, Result};
use plugin_daemon::clienv;
use plugin_daemon::config::SupervisorPolicy;
use plugin_daemon::daemon::{HealthCheckPolicy, ProcessConfig, ProcessSupervisor};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub(crate) async fn cmd_run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let policy = SupervisorPolicy::load(config_path)?;
    let runtime_dir = clienv::runtime_dir();

    let socket = args
        .socket
        .unwrap_or_else(|| clienv::default_socket_path(&runtime_dir, &args.name));
    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create socket directory {}", parent.display()))?;
    }

    let mut command = args.command.into_iter();
    let program = command
        .next()
        .context("No daemon command given (pass it after `--`)")?;

    let mut config = ProcessConfig::new(&args.name, program, &socket)
        .args(command)
        .startup_timeout(Duration::from_millis(args.startup_timeout_ms))
        .shutdown_grace_period(Duration::from_millis(args.grace_ms));
    for (key, value) in args.env {
        config = config.env(key, value);
    }
    if let Some(dir) = args.cwd {
        config = config.working_dir(dir);
    }
    if let Some(interval) = args.health_interval_ms {
        config = config.health_check(HealthCheckPolicy::new(
            Duration::from_millis(interval),
            Duration::from_millis(args.health_timeout_ms),
            args.health_threshold,
        ));
    }

    let supervisor = ProcessSupervisor::new(policy, runtime_dir);
    let pid = supervisor
        .start_process(config)
        .await
        .with_context(|| format!("Failed to start '{}'", args.name))?;

    println!("Started '{}' (PID {})", args.name, pid);
    println!("  Socket: {}", socket.display());
    println!("  PID:    {}", supervisor.pid_file_path(&args.name).display());
    println!("Press Ctrl+C to stop");

    super::wait_for_shutdown().await?;

    info!("Stopping supervised processes");
    supervisor.stop_all_processes().await;

    if let Some(info) = supervisor.get_process_info(&args.name).await {
        println!("'{}' is {}", info.name, info.state);
    }
    Ok(())
}
