//! Background plugin daemons: supervision and local JSON-RPC transport
//!
//! [`ProcessSupervisor`] owns the lifecycle of named daemon processes:
//! spawn, readiness polling, PID files, periodic health probes, crash
//! restarts with linear backoff and graceful stop. [`RpcClient`] talks to a
//! running daemon over its local socket, one connection per call.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │               ProcessSupervisor               │
//! ├───────────────────────────────────────────────┤
//! │ registry │ exit monitors │ health │ restarts  │
//! ├───────────────────────────────────────────────┤
//! │   daemon A (socket)   │   daemon B (socket)   │
//! └───────────────────────────────────────────────┘
//!              ▲ check_connection / send_request
//!              └──────────── RpcClient
//! ```

pub mod client;
pub mod health;
pub mod log_buffer;
pub mod pidfile;
pub mod process;
pub mod protocol;
#[cfg(unix)]
pub mod server;
pub mod signals;
pub mod supervisor;

pub use client::{check_connection, RpcClient};
pub use health::{HealthCheckState, HealthTracker, HealthVerdict};
pub use log_buffer::{LogBuffer, LogLine, OutputStream};
pub use pidfile::PidFile;
pub use process::{HealthCheckPolicy, ProcessConfig, ProcessInfo, ProcessState};
pub use protocol::{RequestId, RpcErrorObject, RpcRequest, RpcResponse};
#[cfg(unix)]
pub use server::MonitorServer;
pub use supervisor::ProcessSupervisor;
