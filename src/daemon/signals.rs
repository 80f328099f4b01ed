//! Process control: liveness probing and graceful-then-forceful termination

use std::io;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Poll interval while waiting for a non-child process to disappear
const PID_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

/// How a termination request concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Process was already gone before any signal was sent
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Graceful,
    /// Needed SIGKILL
    Forced,
    /// Still present after SIGKILL and the kill wait
    Unconfirmed,
}

/// Exit watch shared between the task reaping a child and anyone who needs to
/// wait for it. `None` until the child has exited; then a short description of
/// the exit status.
pub type ExitWatch = watch::Receiver<Option<String>>;

/// Does a process with this id exist? (signal 0)
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to someone else.
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// Send a signal to a pid. A process that no longer exists is reported as
/// `ErrorKind::NotFound`.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw_pid = i32::try_from(pid)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}")))?;
    let sig = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: plain kill(2) on a validated positive pid.
    let rc = unsafe { libc::kill(raw_pid, sig) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no process with pid {pid}"),
        ));
    }
    Err(err)
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals are only supported on Unix",
    ))
}

/// Wait until the exit watch reports an exit, bounded by `timeout`.
pub async fn wait_for_exit(exit: &mut ExitWatch, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, exit.wait_for(Option::is_some)).await,
        Ok(Ok(_))
    )
}

/// Terminate a child we own: SIGTERM, wait up to `grace`, SIGKILL, wait up to
/// `kill_wait`. Exit is observed through the reaper's watch channel.
pub async fn terminate_child(
    pid: u32,
    exit: &mut ExitWatch,
    grace: Duration,
    kill_wait: Duration,
) -> io::Result<Termination> {
    if exit.borrow().is_some() {
        return Ok(Termination::AlreadyExited);
    }

    match send_signal(pid, Signal::Terminate) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Termination::AlreadyExited),
        Err(e) => return Err(e),
    }
    if wait_for_exit(exit, grace).await {
        debug!(pid, "Process exited after SIGTERM");
        return Ok(Termination::Graceful);
    }

    warn!(pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, force killing");
    match send_signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Termination::Forced),
        Err(e) => return Err(e),
    }
    if wait_for_exit(exit, kill_wait).await {
        Ok(Termination::Forced)
    } else {
        Ok(Termination::Unconfirmed)
    }
}

/// Terminate a process we do not own (an orphan from an earlier supervisor).
/// Exit is observed by polling signal 0.
pub async fn terminate_pid(pid: u32, grace: Duration, kill_wait: Duration) -> io::Result<Termination> {
    if !is_process_running(pid) {
        return Ok(Termination::AlreadyExited);
    }

    match send_signal(pid, Signal::Terminate) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Termination::AlreadyExited),
        Err(e) => return Err(e),
    }
    if poll_until_gone(pid, grace).await {
        return Ok(Termination::Graceful);
    }

    match send_signal(pid, Signal::Kill) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Termination::Forced),
        Err(e) => return Err(e),
    }
    if poll_until_gone(pid, kill_wait).await {
        Ok(Termination::Forced)
    } else {
        Ok(Termination::Unconfirmed)
    }
}

async fn poll_until_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_process_running(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(PID_POLL_INTERVAL).await;
    }
}
