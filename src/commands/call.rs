use anyhow::{Context, Result};
use plugin_daemon::daemon::RpcClient;
use plugin_daemon::error::RpcErrorKind;
use std::path::Path;
use std::time::Duration;

pub(crate) async fn cmd_call(
    socket: &Path,
    method: &str,
    params: Option<&str>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    let params = super::parse_params(params)?;
    let mut client = RpcClient::new();
    if let Some(ms) = timeout_ms {
        client = client.with_timeout(Duration::from_millis(ms));
    }
    let result = client
        .send_request(socket, method, params, None)
        .await
        .map_err(|e| {
            let hint = hint_for(e.kind());
            anyhow::Error::new(e).context(format!("'{method}' failed ({hint})"))
        })?;

    let pretty = serde_json::to_string_pretty(&result).context("Failed to format result")?;
    println!("{pretty}");
    Ok(())
}

pub(crate) async fn cmd_notify(socket: &Path, method: &str, params: Option<&str>) -> Result<()> {
    let params = super::parse_params(params)?;
    RpcClient::new()
        .send_notification(socket, method, params, None)
        .await
        .with_context(|| format!("Failed to deliver '{method}'"))?;
    Ok(())
}

pub(crate) async fn cmd_ping(socket: &Path, timeout_ms: Option<u64>) -> Result<()> {
    plugin_daemon::daemon::check_connection(socket, timeout_ms.map(Duration::from_millis))
        .await
        .map_err(|e| {
            let hint = hint_for(e.kind());
            anyhow::Error::new(e).context(format!("Daemon unreachable ({hint})"))
        })?;
    println!("{} is accepting connections", socket.display());
    Ok(())
}

fn hint_for(kind: RpcErrorKind) -> &'static str {
    match kind {
        RpcErrorKind::NotFound => "is the daemon started?",
        RpcErrorKind::PermissionDenied => "check socket permissions",
        RpcErrorKind::ConnectionRefused => "stale socket, restart the daemon",
        RpcErrorKind::Timeout => "daemon is busy or hung",
        RpcErrorKind::IncompleteResponse => "daemon closed the connection early",
        RpcErrorKind::Protocol => "daemon sent an invalid response",
        RpcErrorKind::Application => "daemon reported an error",
        RpcErrorKind::Io => "I/O failure",
    }
}
