//! End-to-end supervision of the bundled `serve` daemon.
#![cfg(unix)]

use plugin_daemon::config::SupervisorPolicy;
use plugin_daemon::daemon::signals::{self, Signal};
use plugin_daemon::daemon::{HealthCheckPolicy, ProcessConfig, ProcessState, ProcessSupervisor, RpcClient};
use plugin_daemon::SupervisorError;
use serde_json::json;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

const BIN: &str = env!("CARGO_BIN_EXE_plugin-daemon");

fn fast_policy() -> SupervisorPolicy {
    SupervisorPolicy {
        max_restart_attempts: 3,
        restart_base_delay: Duration::from_millis(10),
        readiness_poll_interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(200),
        kill_wait: Duration::from_secs(2),
        ..SupervisorPolicy::default()
    }
}

fn socket_in(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join(format!("{name}.sock"))
}

fn monitor_config(dir: &TempDir, name: &str) -> ProcessConfig {
    let socket = socket_in(dir, name);
    ProcessConfig::new(name, BIN, &socket)
        .args(["serve".to_string(), "--socket".to_string(), socket.display().to_string()])
        .env("RUST_LOG", "warn")
        .startup_timeout(Duration::from_secs(10))
        .shutdown_grace_period(Duration::from_secs(2))
}

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check().await
}

fn count_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_start_call_and_stop() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(fast_policy(), dir.path().join("run"));
    let socket = socket_in(&dir, "monitor");

    let pid = supervisor.start_process(monitor_config(&dir, "monitor")).await.unwrap();
    assert!(supervisor.is_running("monitor").await);
    assert_eq!(supervisor.get_pid("monitor").await, Some(pid));

    let pid_file = supervisor.pid_file_path("monitor");
    assert_eq!(std::fs::read_to_string(&pid_file).unwrap(), pid.to_string());

    let client = RpcClient::new();
    let health = client
        .send_request(&socket, "health_check", None, None)
        .await
        .unwrap();
    assert_eq!(health, json!({"status": "healthy"}));

    client
        .send_notification(
            &socket,
            "on_event",
            Some(json!({"event_type": "TODO_UPDATE", "event_data": {}})),
            None,
        )
        .await
        .unwrap();
    let (client_ref, socket_ref) = (&client, &socket);
    let counted = wait_until(Duration::from_secs(5), || async move {
        client_ref
            .send_request(socket_ref, "get_stats", None, None)
            .await
            .map(|stats| stats["todo_updates"] == 1)
            .unwrap_or(false)
    })
    .await;
    assert!(counted);

    supervisor.stop_process("monitor").await.unwrap();
    assert_eq!(supervisor.get_state("monitor").await, Some(ProcessState::Stopped));
    assert_eq!(supervisor.get_pid("monitor").await, None);
    assert!(!pid_file.exists());
    assert!(!socket.exists());
    assert!(!signals::is_process_running(pid));

    // Idempotent
    supervisor.stop_process("monitor").await.unwrap();
}

#[tokio::test]
async fn test_restart_after_running_resets_attempts() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(fast_policy(), dir.path().join("run"));
    let mut pid = supervisor.start_process(monitor_config(&dir, "monitor")).await.unwrap();
    let sup = &supervisor;

    // More crashes than the restart budget: each successful restart resets it.
    for round in 0..4 {
        signals::send_signal(pid, Signal::Kill).unwrap();

        let previous = pid;
        let recovered = wait_until(Duration::from_secs(15), || async move {
            matches!(
                sup.get_process_info("monitor").await,
                Some(info) if info.state == ProcessState::Running && info.pid.is_some_and(|p| p != previous)
            )
        })
        .await;
        assert!(recovered, "round {round}: process did not come back");

        let info = supervisor.get_process_info("monitor").await.unwrap();
        assert_eq!(info.restart_attempts, 0);
        pid = info.pid.unwrap();
        assert_eq!(
            std::fs::read_to_string(supervisor.pid_file_path("monitor")).unwrap(),
            pid.to_string()
        );
    }

    supervisor.stop_all_processes().await;
}

#[tokio::test]
async fn test_restart_budget_exhaustion_ends_in_error() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(fast_policy(), dir.path().join("run"));
    let socket = socket_in(&dir, "flaky");
    let spawns = dir.path().join("spawns.log");
    let allow = dir.path().join("allow");
    std::fs::write(&allow, "").unwrap();

    let script = r#"echo spawn >> "$SPAWNS"; if [ -e "$ALLOW" ]; then exec "$BIN" serve --socket "$SOCK"; else exec sleep 30; fi"#;
    let config = ProcessConfig::new("flaky", "sh", &socket)
        .args(["-c", script])
        .env("SPAWNS", spawns.display().to_string())
        .env("ALLOW", allow.display().to_string())
        .env("BIN", BIN)
        .env("SOCK", socket.display().to_string())
        .env("RUST_LOG", "warn")
        .startup_timeout(Duration::from_secs(2))
        .shutdown_grace_period(Duration::from_millis(500));

    let pid = supervisor.start_process(config.clone()).await.unwrap();
    assert_eq!(count_lines(&spawns), 1);

    std::fs::remove_file(&allow).unwrap();
    signals::send_signal(pid, Signal::Kill).unwrap();

    let sup = &supervisor;
    let failed = wait_until(Duration::from_secs(30), || async move {
        sup.get_state("flaky").await == Some(ProcessState::Error)
    })
    .await;
    assert!(failed, "record should end in ERROR");

    // Initial spawn plus three failed restart attempts, then nothing more.
    assert_eq!(count_lines(&spawns), 4);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count_lines(&spawns), 4);

    let info = supervisor.get_process_info("flaky").await.unwrap();
    assert_eq!(info.pid, None);
    assert_eq!(info.restart_attempts, 3);
    assert!(info.last_error.unwrap().contains("gave up after 3"));
    assert!(!supervisor.pid_file_path("flaky").exists());

    // ERROR accepts a fresh start.
    std::fs::write(&allow, "").unwrap();
    supervisor.start_process(config).await.unwrap();
    assert_eq!(count_lines(&spawns), 5);
    supervisor.stop_all_processes().await;
}

#[tokio::test]
async fn test_failed_health_checks_trigger_restart() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(fast_policy(), dir.path().join("run"));
    let socket = socket_in(&dir, "monitor");
    let config = monitor_config(&dir, "monitor").health_check(HealthCheckPolicy::new(
        Duration::from_millis(100),
        Duration::from_millis(200),
        2,
    ));

    let pid = supervisor.start_process(config).await.unwrap();

    // The daemon keeps running but becomes unreachable.
    std::fs::remove_file(&socket).unwrap();

    let sup = &supervisor;
    let restarted = wait_until(Duration::from_secs(15), || async move {
        matches!(
            sup.get_process_info("monitor").await,
            Some(info) if info.state == ProcessState::Running && info.pid.is_some_and(|p| p != pid)
        )
    })
    .await;
    assert!(restarted, "unhealthy daemon should be terminated and restarted");
    assert!(socket.exists());
    assert!(!signals::is_process_running(pid));

    let info = supervisor.get_process_info("monitor").await.unwrap();
    assert_eq!(info.health_failures, 0);

    supervisor.stop_all_processes().await;
}

#[tokio::test]
async fn test_stop_all_stops_everything_and_blocks_starts() {
    let dir = TempDir::new().unwrap();
    let supervisor = ProcessSupervisor::new(fast_policy(), dir.path().join("run"));

    let a = supervisor.start_process(monitor_config(&dir, "alpha")).await.unwrap();
    let b = supervisor.start_process(monitor_config(&dir, "beta")).await.unwrap();

    let err = supervisor
        .start_process(monitor_config(&dir, "alpha"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, SupervisorError::AlreadyActive { state: ProcessState::Running, .. }),
        "{err}"
    );

    supervisor.stop_all_processes().await;

    let infos = supervisor.list_processes().await;
    assert_eq!(
        infos.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
        vec!["alpha", "beta"]
    );
    assert!(infos.iter().all(|i| i.state == ProcessState::Stopped));
    assert!(!signals::is_process_running(a));
    assert!(!signals::is_process_running(b));

    let err = supervisor
        .start_process(monitor_config(&dir, "gamma"))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::ShuttingDown { .. }), "{err}");
}
