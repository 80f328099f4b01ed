pub mod clienv;
pub mod config;
pub mod daemon;
pub mod error;

pub use config::SupervisorPolicy;
pub use daemon::{ProcessConfig, ProcessState, ProcessSupervisor, RpcClient};
pub use error::{Result, RpcError, RpcErrorKind, SupervisorError};
