mod args;
mod commands;

use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run(args) => commands::run::cmd_run(args, config).await?,
        Commands::Call {
            socket,
            method,
            params,
            timeout_ms,
        } => commands::call::cmd_call(&socket, &method, params.as_deref(), timeout_ms).await?,
        Commands::Notify {
            socket,
            method,
            params,
        } => commands::call::cmd_notify(&socket, &method, params.as_deref()).await?,
        Commands::Ping { socket, timeout_ms } => commands::call::cmd_ping(&socket, timeout_ms).await?,
        Commands::Serve { socket } => commands::serve::cmd_serve(socket).await?,
    }

    Ok(())
}
