pub(crate) mod call;
pub(crate) mod run;
pub(crate) mod serve;

use tracing::info;

/// Resolve on SIGTERM or Ctrl+C.
pub(crate) async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

/// Parse an optional `--params` argument as JSON.
pub(crate) fn parse_params(raw: Option<&str>) -> anyhow::Result<Option<serde_json::Value>> {
    use anyhow::Context;
    raw.map(|s| serde_json::from_str(s).with_context(|| format!("--params is not valid JSON: {s}")))
        .transpose()
}
