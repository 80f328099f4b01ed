use anyhow::Result;
use std::path::PathBuf;

#[cfg(unix)]
pub(crate) async fn cmd_serve(socket: PathBuf) -> Result<()> {
    plugin_daemon::daemon::MonitorServer::new(socket).run().await
}

#[cfg(not(unix))]
pub(crate) async fn cmd_serve(_socket: PathBuf) -> Result<()> {
    anyhow::bail!("serve requires Unix domain sockets")
}
