use crate::daemon::process::ProcessState;
use crate::daemon::protocol::RequestId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`crate::daemon::ProcessSupervisor`] operations.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Invalid process name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error(
        "Socket path for '{name}' is {len} bytes, exceeding the {max}-byte limit for local sockets: {}",
        .path.display()
    )]
    SocketPathTooLong {
        name: String,
        path: PathBuf,
        len: usize,
        max: usize,
    },

    #[error("Process '{name}' is already {state}")]
    AlreadyActive { name: String, state: ProcessState },

    #[error("Supervisor is shutting down; refusing to start '{name}'")]
    ShuttingDown { name: String },

    #[error("Failed to spawn '{name}' ({command}): {source}")]
    Spawn {
        name: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "Process '{name}' did not accept connections on {} within {timeout_ms} ms",
        .socket_path.display()
    )]
    StartupTimeout {
        name: String,
        socket_path: PathBuf,
        timeout_ms: u64,
    },

    #[error("Process '{name}' exited during startup ({status})")]
    ExitedDuringStartup { name: String, status: String },

    #[error("Start of '{name}' was cancelled by a concurrent stop")]
    Cancelled { name: String },

    #[error("Failed to write PID file {}: {source}", .path.display())]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal PID {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`RpcError`], so callers can pick a remediation
/// (start the daemon, fix permissions, wait and retry, report to the user).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// Socket file does not exist.
    NotFound,
    /// Filesystem permissions prevent connecting.
    PermissionDenied,
    /// Socket file exists but nothing is listening.
    ConnectionRefused,
    /// Connect or exchange exceeded its time bound.
    Timeout,
    /// Peer closed the stream before a full response arrived.
    IncompleteResponse,
    /// Envelope was malformed or carried the wrong id.
    Protocol,
    /// Remote method returned an error envelope.
    Application,
    /// Any other I/O failure.
    Io,
}

/// Errors surfaced by [`crate::daemon::RpcClient`].
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Socket not found at {}: daemon not started or wrong path", .path.display())]
    SocketNotFound { path: PathBuf },

    #[error("Permission denied connecting to {}", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error(
        "Connection refused at {}: socket exists but nothing is listening",
        .path.display()
    )]
    ConnectionRefused { path: PathBuf },

    #[error("Failed to connect to {}: {source}", .path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to {} timed out after {timeout_ms} ms", .path.display())]
    ConnectTimeout { path: PathBuf, timeout_ms: u64 },

    #[error(
        "Request timed out after {timeout_ms} ms (socket: {}, method: {method}, id: {id})",
        .path.display()
    )]
    Timeout {
        timeout_ms: u64,
        path: PathBuf,
        method: String,
        id: RequestId,
    },

    #[error(
        "Connection closed before a complete response was received \
         (method: {method}, id: {id}, {received} bytes read)"
    )]
    IncompleteResponse {
        method: String,
        id: RequestId,
        received: usize,
    },

    #[error("Response id {received} does not match request id {expected} (method: {method})")]
    IdMismatch {
        method: String,
        expected: RequestId,
        received: serde_json::Value,
    },

    #[error("Malformed response for '{method}': {message}")]
    MalformedResponse { method: String, message: String },

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("RPC error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },
}

impl RpcError {
    pub fn kind(&self) -> RpcErrorKind {
        match self {
            Self::SocketNotFound { .. } => RpcErrorKind::NotFound,
            Self::PermissionDenied { .. } => RpcErrorKind::PermissionDenied,
            Self::ConnectionRefused { .. } => RpcErrorKind::ConnectionRefused,
            Self::ConnectTimeout { .. } | Self::Timeout { .. } => RpcErrorKind::Timeout,
            Self::IncompleteResponse { .. } => RpcErrorKind::IncompleteResponse,
            Self::IdMismatch { .. } | Self::MalformedResponse { .. } | Self::Encode(_) => {
                RpcErrorKind::Protocol
            }
            Self::Remote { .. } => RpcErrorKind::Application,
            Self::Connect { .. } | Self::Io { .. } => RpcErrorKind::Io,
        }
    }

    /// True when the daemon answered with an error envelope, as opposed to the
    /// daemon being unreachable or misbehaving on the wire.
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// Classify a connect failure by its OS error kind.
    pub(crate) fn from_connect(path: &std::path::Path, source: std::io::Error) -> Self {
        let path = path.to_path_buf();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::SocketNotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::ConnectionRefused => Self::ConnectionRefused { path },
            _ => Self::Connect { path, source },
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::Path;

    #[test]
    fn test_connect_errors_are_classified_by_kind() {
        let path = Path::new("/tmp/x.sock");
        let cases = [
            (io::ErrorKind::NotFound, RpcErrorKind::NotFound),
            (io::ErrorKind::PermissionDenied, RpcErrorKind::PermissionDenied),
            (io::ErrorKind::ConnectionRefused, RpcErrorKind::ConnectionRefused),
            (io::ErrorKind::Other, RpcErrorKind::Io),
        ];
        for (os_kind, expected) in cases {
            let err = RpcError::from_connect(path, io::Error::new(os_kind, "boom"));
            assert_eq!(err.kind(), expected, "{os_kind:?}");
        }
    }

    #[test]
    fn test_remote_errors_are_application_errors() {
        let err = RpcError::Remote {
            code: -32601,
            message: "Method not found: nope".to_string(),
            data: None,
        };
        assert!(err.is_application());
        assert_eq!(err.kind(), RpcErrorKind::Application);
        assert!(err.to_string().contains("-32601"));

        let transport = RpcError::ConnectionRefused {
            path: PathBuf::from("/tmp/x.sock"),
        };
        assert!(!transport.is_application());
    }

    #[test]
    fn test_timeout_message_names_bound_socket_method_and_id() {
        let err = RpcError::Timeout {
            timeout_ms: 250,
            path: PathBuf::from("/tmp/monitor.sock"),
            method: "get_stats".to_string(),
            id: RequestId::Number(7),
        };
        let msg = err.to_string();
        assert!(msg.contains("250 ms"));
        assert!(msg.contains("/tmp/monitor.sock"));
        assert!(msg.contains("get_stats"));
        assert!(msg.contains("id: 7"));
    }
}
