//! JSON-RPC client for background plugin daemons
//!
//! Every call opens its own connection to the daemon's local socket, writes one
//! envelope and (for requests) reads one correlated response. Nothing is
//! pooled or retried; retry policy belongs to the caller.

use super::protocol::{FrameBuffer, FrameError, RequestId, RpcRequest, RpcResponse};
use crate::error::RpcError;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

#[cfg(unix)]
use tokio::net::UnixStream;

/// Default bound on a full request/response exchange
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a reachability probe
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 8 * 1024;

pub struct RpcClient {
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl RpcClient {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the timeout used when a call does not pass one
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Call `method` on the daemon listening at `socket_path`.
    ///
    /// Resolves with the `result` member of a success envelope. Transport
    /// failures, protocol violations (malformed envelope, id mismatch) and
    /// remote error envelopes each map to a distinct [`RpcError`] variant.
    pub async fn send_request(
        &self,
        socket_path: &Path,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, RpcError> {
        let id = self.next_request_id();
        let timeout = timeout.unwrap_or(self.request_timeout);
        let request = RpcRequest::new(method, params, id.clone());
        let payload = request.encode()?;

        debug!(
            socket = %socket_path.display(),
            method,
            id = %id,
            "Sending RPC request"
        );

        // Dropping the exchange future on expiry drops the stream with it.
        let response = tokio::time::timeout(timeout, exchange(socket_path, method, &id, &payload))
            .await
            .map_err(|_| RpcError::Timeout {
                timeout_ms: duration_ms(timeout),
                path: socket_path.to_path_buf(),
                method: method.to_string(),
                id: id.clone(),
            })??;

        if !id.matches(response.id()) {
            return Err(RpcError::IdMismatch {
                method: method.to_string(),
                expected: id,
                received: response.id().clone(),
            });
        }

        match response {
            RpcResponse::Success { result, .. } => {
                trace!(method, id = %id, "RPC request succeeded");
                Ok(result)
            }
            RpcResponse::Error { error, .. } => {
                debug!(method, id = %id, code = error.code, "RPC request returned error");
                Err(RpcError::Remote {
                    code: error.code,
                    message: error.message,
                    data: error.data,
                })
            }
        }
    }

    /// Deliver a notification (no `id`, no response expected).
    pub async fn send_notification(
        &self,
        socket_path: &Path,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<(), RpcError> {
        let timeout = timeout.unwrap_or(self.request_timeout);
        let payload = RpcRequest::notification(method, params).encode()?;

        debug!(socket = %socket_path.display(), method, "Sending RPC notification");

        tokio::time::timeout(timeout, async {
            let mut stream = connect(socket_path).await?;
            write_all(&mut stream, socket_path, &payload).await?;
            stream.shutdown().await.map_err(|source| RpcError::Io {
                path: socket_path.to_path_buf(),
                source,
            })
        })
        .await
        .map_err(|_| RpcError::ConnectTimeout {
            path: socket_path.to_path_buf(),
            timeout_ms: duration_ms(timeout),
        })?
    }

    /// Reachability probe, see [`check_connection`].
    pub async fn check_connection(
        &self,
        socket_path: &Path,
        timeout: Option<Duration>,
    ) -> Result<(), RpcError> {
        check_connection(socket_path, timeout).await
    }
}

impl Default for RpcClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Open and immediately close a connection to `socket_path`.
///
/// No request is sent. Used both for startup readiness polling and for
/// periodic health probes.
pub async fn check_connection(socket_path: &Path, timeout: Option<Duration>) -> Result<(), RpcError> {
    let timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
    match tokio::time::timeout(timeout, connect(socket_path)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            trace!(socket = %socket_path.display(), "Socket accepted connection");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RpcError::ConnectTimeout {
            path: socket_path.to_path_buf(),
            timeout_ms: duration_ms(timeout),
        }),
    }
}

#[cfg(unix)]
async fn connect(socket_path: &Path) -> Result<UnixStream, RpcError> {
    UnixStream::connect(socket_path)
        .await
        .map_err(|e| RpcError::from_connect(socket_path, e))
}

#[cfg(not(unix))]
async fn connect(socket_path: &Path) -> Result<tokio::net::TcpStream, RpcError> {
    Err(RpcError::Connect {
        path: socket_path.to_path_buf(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "local sockets are only supported on Unix",
        ),
    })
}

async fn write_all<S>(stream: &mut S, socket_path: &Path, payload: &[u8]) -> Result<(), RpcError>
where
    S: AsyncWriteExt + Unpin,
{
    stream.write_all(payload).await.map_err(|source| RpcError::Io {
        path: socket_path.to_path_buf(),
        source,
    })?;
    stream.flush().await.map_err(|source| RpcError::Io {
        path: socket_path.to_path_buf(),
        source,
    })
}

/// Connect, write the request, read until one complete envelope is buffered.
async fn exchange(
    socket_path: &Path,
    method: &str,
    id: &RequestId,
    payload: &[u8],
) -> Result<RpcResponse, RpcError> {
    let mut stream = connect(socket_path).await?;
    write_all(&mut stream, socket_path, payload).await?;

    let mut frame = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await.map_err(|source| RpcError::Io {
            path: socket_path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            return Err(RpcError::IncompleteResponse {
                method: method.to_string(),
                id: id.clone(),
                received: frame.len(),
            });
        }
        trace!(bytes = n, "Read response chunk");

        let decoded = frame.push(&chunk[..n]).map_err(|e| RpcError::MalformedResponse {
            method: method.to_string(),
            message: match e {
                FrameError::Malformed(msg) => format!("invalid JSON: {msg}"),
                too_large @ FrameError::TooLarge(_) => too_large.to_string(),
            },
        })?;

        if let Some(value) = decoded {
            return RpcResponse::from_value(value).map_err(|message| RpcError::MalformedResponse {
                method: method.to_string(),
                message,
            });
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
