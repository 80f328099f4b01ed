use super::signals::{self, Termination};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Plain-text PID file holding a single decimal process id
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored pid. Missing, empty, or unparsable files read as `None`;
    /// a garbage PID file is stale by definition.
    pub fn read(&self) -> io::Result<Option<u32>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => {
                warn!(path = %self.path.display(), "Ignoring unparsable PID file");
                Ok(None)
            }
        }
    }

    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, pid.to_string())
    }

    /// Remove the file; an already-absent file is not an error.
    pub fn remove(&self) {
        remove_quietly(&self.path, "PID file");
    }
}

/// Remove a file, logging anything other than "already gone".
pub(crate) fn remove_quietly(path: &Path, what: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed {}", what),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Failed to remove {}: {}", what, e),
    }
}

/// Remove a leftover socket at `path`. Anything that is not a socket is left
/// in place with a warning.
pub(crate) fn remove_socket_quietly(path: &Path, what: &str) {
    let file_type = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.file_type(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(path = %path.display(), "Failed to inspect {}: {}", what, e);
            return;
        }
    };

    #[cfg(unix)]
    let is_socket = {
        use std::os::unix::fs::FileTypeExt;
        file_type.is_socket()
    };
    #[cfg(not(unix))]
    let is_socket = {
        let _ = file_type;
        false
    };

    if is_socket {
        remove_quietly(path, what);
    } else {
        warn!(path = %path.display(), "Not removing {}: path is not a socket", what);
    }
}

/// Terminate a process left behind by an earlier supervisor instance and drop
/// its PID file. Failures are logged, never raised: a dead or unkillable
/// orphan does not prevent the new start.
pub async fn cleanup_orphan(pid_file: &PidFile, grace: Duration, kill_wait: Duration) {
    let pid = match pid_file.read() {
        Ok(Some(pid)) => pid,
        Ok(None) => return,
        Err(e) => {
            warn!(path = %pid_file.path().display(), "Failed to read PID file: {}", e);
            pid_file.remove();
            return;
        }
    };

    if pid == std::process::id() {
        warn!(pid, "PID file points at the supervisor itself, discarding");
    } else if signals::is_process_running(pid) {
        info!(pid, path = %pid_file.path().display(), "Terminating orphaned daemon");
        match signals::terminate_pid(pid, grace, kill_wait).await {
            Ok(Termination::Unconfirmed) => {
                warn!(pid, "Orphaned daemon still present after SIGKILL")
            }
            Ok(outcome) => debug!(pid, ?outcome, "Orphaned daemon terminated"),
            Err(e) => warn!(pid, "Failed to terminate orphaned daemon: {}", e),
        }
    } else {
        debug!(pid, "Removing stale PID file for dead process");
    }

    pid_file.remove();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn test_socket_removal_skips_regular_files() {
        let dir = TempDir::new().unwrap();
        let regular = dir.path().join("daemon.sock");
        std::fs::write(&regular, "keep me").unwrap();
        remove_socket_quietly(&regular, "socket file");
        assert_eq!(std::fs::read_to_string(&regular).unwrap(), "keep me");

        let socket = dir.path().join("real.sock");
        let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();
        drop(listener);
        remove_socket_quietly(&socket, "socket file");
        assert!(!socket.exists());

        // Missing path is a no-op.
        remove_socket_quietly(&socket, "socket file");
    }

    #[test]
    fn test_write_read_remove() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("nested").join("daemon.pid"));

        assert_eq!(pid_file.read().unwrap(), None);
        pid_file.write(4242).unwrap();
        assert_eq!(
            std::fs::read_to_string(pid_file.path()).unwrap(),
            "4242",
            "plain decimal, no trailing metadata"
        );
        assert_eq!(pid_file.read().unwrap(), Some(4242));

        pid_file.remove();
        assert!(!pid_file.path().exists());
        // second remove is a no-op
        pid_file.remove();
    }

    #[test]
    fn test_garbage_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("daemon.pid"));
        std::fs::write(pid_file.path(), "not-a-pid").unwrap();
        assert_eq!(pid_file.read().unwrap(), None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_stale_file_for_dead_pid() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("daemon.pid"));
        pid_file.write(i32::MAX as u32).unwrap();

        cleanup_orphan(&pid_file, Duration::from_millis(50), Duration::from_millis(50)).await;
        assert!(!pid_file.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cleanup_terminates_live_orphan() {
        use std::os::unix::process::ExitStatusExt;

        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("daemon.pid"));
        let mut orphan = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        pid_file.write(orphan.id()).unwrap();

        cleanup_orphan(&pid_file, Duration::from_millis(200), Duration::from_millis(200)).await;

        assert!(!pid_file.path().exists());
        let status = orphan.wait().unwrap();
        assert_eq!(status.signal(), Some(libc::SIGTERM));
    }
}
