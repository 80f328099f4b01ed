//! Reference background daemon: a conversation monitor speaking the
//! newline-framed JSON-RPC protocol on a local socket.
//!
//! Requests carry an `id` and get exactly one response; notifications
//! (`on_event`) update counters and get none. Serves one message per
//! connection.

use super::protocol::{codes, FrameBuffer, RpcErrorObject, RpcResponse, JSONRPC_VERSION};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, trace, warn};

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: Value,
}

/// Counters accumulated from `on_event` notifications
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationStats {
    pub tool_calls_total: u64,
    pub tool_calls_success: u64,
    pub tool_calls_failed: u64,
    pub agent_invocations: u64,
    pub subagent_invocations: u64,
    pub todo_updates: u64,
    pub current_context_usage: Value,
    /// Unix epoch seconds
    pub session_start: f64,
    pub last_event: Option<LastEvent>,
    pub tool_breakdown: BTreeMap<String, u64>,
}

impl ConversationStats {
    fn new() -> Self {
        Self {
            tool_calls_total: 0,
            tool_calls_success: 0,
            tool_calls_failed: 0,
            agent_invocations: 0,
            subagent_invocations: 0,
            todo_updates: 0,
            current_context_usage: json!(0),
            session_start: epoch_secs(),
            last_event: None,
            tool_breakdown: BTreeMap::new(),
        }
    }

    /// Success rate in percent, two decimals; 0.0 with no calls
    pub fn tool_success_rate(&self) -> f64 {
        if self.tool_calls_total == 0 {
            return 0.0;
        }
        let rate = self.tool_calls_success as f64 / self.tool_calls_total as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

/// Thread-safe holder of [`ConversationStats`]
pub struct ConversationMonitor {
    stats: Mutex<ConversationStats>,
}

impl ConversationMonitor {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(ConversationStats::new()),
        }
    }

    pub fn handle_event(&self, event_type: &str, event_data: &Value) {
        let Some(data) = event_data.as_object() else {
            warn!(
                "Malformed event_data for {}: expected object, got {}",
                event_type,
                json_type_name(event_data)
            );
            return;
        };

        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.last_event = Some(LastEvent {
            event_type: event_type.to_string(),
            timestamp: data
                .get("timestamp")
                .cloned()
                .unwrap_or_else(|| json!(epoch_secs())),
        });

        match event_type {
            "TOOL_CALL_START" => {
                stats.tool_calls_total += 1;
                let tool = data
                    .get("toolName")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                *stats.tool_breakdown.entry(tool.to_string()).or_insert(0) += 1;
            }
            "TOOL_CALL_END" => {
                let success = data.get("success").and_then(Value::as_bool).unwrap_or(true);
                let errored = data
                    .get("result")
                    .and_then(|r| r.get("error"))
                    .is_some_and(is_truthy);
                if success && !errored {
                    stats.tool_calls_success += 1;
                } else {
                    stats.tool_calls_failed += 1;
                }
            }
            "AGENT_START" => {
                let specialized = data
                    .get("isSpecializedAgent")
                    .is_some_and(is_truthy);
                if specialized {
                    stats.subagent_invocations += 1;
                } else {
                    stats.agent_invocations += 1;
                }
            }
            "TODO_UPDATE" => stats.todo_updates += 1,
            "CONTEXT_USAGE_UPDATE" => {
                stats.current_context_usage = data.get("contextUsage").cloned().unwrap_or(json!(0));
            }
            other => trace!(event_type = other, "Ignoring event"),
        }
    }

    pub fn snapshot(&self) -> ConversationStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stats plus derived `uptime_seconds` and `tool_success_rate`
    pub fn get_stats(&self) -> Result<Value> {
        let stats = self.snapshot();
        let mut value = serde_json::to_value(&stats).context("Failed to serialize stats")?;
        if let Value::Object(ref mut map) = value {
            map.insert(
                "uptime_seconds".to_string(),
                json!((epoch_secs() - stats.session_start).max(0.0)),
            );
            map.insert("tool_success_rate".to_string(), json!(stats.tool_success_rate()));
        }
        Ok(value)
    }

    pub fn reset_stats(&self) -> Result<Value> {
        let previous = {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *stats, ConversationStats::new())
        };
        let previous = serde_json::to_value(previous).context("Failed to serialize stats")?;
        Ok(json!({ "reset": true, "previous_stats": previous }))
    }
}

impl Default for ConversationMonitor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MonitorServer {
    socket_path: PathBuf,
    monitor: ConversationMonitor,
}

impl MonitorServer {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            monitor: ConversationMonitor::new(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn monitor(&self) -> &ConversationMonitor {
        &self.monitor
    }

    /// Bind the socket, replacing a stale file, owner-only permissions.
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket {}", self.socket_path.display())
            })?;
        }
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind {}", self.socket_path.display()))?;

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict {}", self.socket_path.display()))?;

        info!("Listening on {}", self.socket_path.display());
        Ok(listener)
    }

    /// Bind and serve until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let listener = self.bind()?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let shutdown = async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        };

        Arc::new(self).serve(listener, shutdown).await
    }

    /// Accept connections until `shutdown` resolves, then remove the socket.
    pub async fn serve<F>(self: Arc<Self>, listener: UnixListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                conn = listener.accept() => {
                    match conn {
                        Ok((stream, _)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    error!("Connection handler error: {:#}", e);
                                }
                            });
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }

        drop(listener);
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.socket_path.display(), e),
        }
        Ok(())
    }

    async fn handle_connection(&self, mut stream: UnixStream) -> Result<()> {
        trace!("New connection accepted");

        let mut frame = FrameBuffer::new();
        let mut chunk = [0u8; READ_CHUNK];
        let reply = loop {
            let n = stream.read(&mut chunk).await.context("Failed to read request")?;
            if n == 0 {
                if frame.is_empty() {
                    return Ok(());
                }
                break Some(parse_error("Parse error: incomplete message"));
            }
            match frame.push(&chunk[..n]) {
                Ok(Some(message)) => break self.process_message(message),
                Ok(None) => continue,
                Err(e) => break Some(parse_error(format!("Parse error: {e}"))),
            }
        };

        if let Some(response) = reply {
            let bytes = response.encode().context("Failed to encode response")?;
            stream.write_all(&bytes).await.context("Failed to write response")?;
            stream.flush().await?;
        }
        Ok(())
    }

    /// Handle one decoded message; `None` for notifications.
    pub fn process_message(&self, message: Value) -> Option<RpcResponse> {
        let Value::Object(message) = message else {
            return Some(RpcResponse::error(
                Value::Null,
                RpcErrorObject::new(codes::INVALID_REQUEST, "Invalid Request: expected an object"),
            ));
        };
        let id = message.get("id").cloned().unwrap_or(Value::Null);

        if message.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Some(RpcResponse::error(
                id,
                RpcErrorObject::new(
                    codes::INVALID_REQUEST,
                    "Invalid Request: jsonrpc must be \"2.0\"",
                ),
            ));
        }

        let method = message.get("method").and_then(Value::as_str).unwrap_or_default();
        let params = message.get("params").cloned().unwrap_or_else(|| Value::Object(Map::new()));

        if id.is_null() {
            self.handle_notification(method, &params);
            return None;
        }

        debug!(method, %id, "Handling request");
        let outcome = match method {
            "get_stats" => self.monitor.get_stats(),
            "reset_stats" => self.monitor.reset_stats(),
            "health_check" => Ok(json!({ "status": "healthy" })),
            _ => {
                return Some(RpcResponse::error(
                    id,
                    RpcErrorObject::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}")),
                ))
            }
        };

        Some(match outcome {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => RpcResponse::error(
                id,
                RpcErrorObject::new(codes::INTERNAL_ERROR, format!("Internal error: {e:#}")),
            ),
        })
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "on_event" => {
                let event_type = params.get("event_type").and_then(Value::as_str).unwrap_or_default();
                let empty = Value::Object(Map::new());
                let event_data = params.get("event_data").unwrap_or(&empty);
                trace!(event_type, "Received event");
                self.monitor.handle_event(event_type, event_data);
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }
}

fn parse_error(message: impl Into<String>) -> RpcResponse {
    RpcResponse::error(Value::Null, RpcErrorObject::new(codes::PARSE_ERROR, message))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::client::RpcClient;
    use crate::error::RpcError;
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    fn request(method: &str, id: u64) -> Value {
        json!({"jsonrpc": "2.0", "method": method, "id": id})
    }

    fn event(event_type: &str, data: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": "on_event",
            "params": {"event_type": event_type, "event_data": data}
        })
    }

    fn result_of(response: Option<RpcResponse>) -> Value {
        match response {
            Some(RpcResponse::Success { result, .. }) => result,
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_events_update_counters() {
        let server = MonitorServer::new("/unused.sock");
        let notifications = [
            event("TOOL_CALL_START", json!({"toolName": "read"})),
            event("TOOL_CALL_START", json!({"toolName": "read"})),
            event("TOOL_CALL_START", json!({})),
            event("TOOL_CALL_END", json!({"success": true})),
            event("TOOL_CALL_END", json!({"success": false})),
            event("TOOL_CALL_END", json!({"result": {"error": "boom"}})),
            event("AGENT_START", json!({"isSpecializedAgent": true})),
            event("AGENT_START", json!({})),
            event("TODO_UPDATE", json!({})),
            event("CONTEXT_USAGE_UPDATE", json!({"contextUsage": 42})),
        ];
        for n in notifications {
            assert!(server.process_message(n).is_none());
        }

        let stats = result_of(server.process_message(request("get_stats", 1)));
        assert_eq!(stats["tool_calls_total"], 3);
        assert_eq!(stats["tool_calls_success"], 1);
        assert_eq!(stats["tool_calls_failed"], 2);
        assert_eq!(stats["tool_breakdown"], json!({"read": 2, "unknown": 1}));
        assert_eq!(stats["agent_invocations"], 1);
        assert_eq!(stats["subagent_invocations"], 1);
        assert_eq!(stats["todo_updates"], 1);
        assert_eq!(stats["current_context_usage"], 42);
        assert_eq!(stats["last_event"]["type"], "CONTEXT_USAGE_UPDATE");
        assert_eq!(stats["tool_success_rate"], json!(33.33));
        assert!(stats["uptime_seconds"].as_f64().unwrap() >= 0.0);
    }

    #[test]
    fn test_non_object_event_data_is_ignored() {
        let server = MonitorServer::new("/unused.sock");
        server.process_message(event("TODO_UPDATE", json!("oops")));
        assert_eq!(server.monitor().snapshot().todo_updates, 0);
        assert!(server.monitor().snapshot().last_event.is_none());
    }

    #[test]
    fn test_reset_returns_previous_stats() {
        let server = MonitorServer::new("/unused.sock");
        server.process_message(event("TODO_UPDATE", json!({})));

        let reset = result_of(server.process_message(request("reset_stats", 2)));
        assert_eq!(reset["reset"], true);
        assert_eq!(reset["previous_stats"]["todo_updates"], 1);
        assert_eq!(server.monitor().snapshot().todo_updates, 0);
    }

    #[test]
    fn test_success_rate_without_calls_is_zero() {
        let server = MonitorServer::new("/unused.sock");
        let stats = result_of(server.process_message(request("get_stats", 3)));
        assert_eq!(stats["tool_success_rate"], json!(0.0));
    }

    #[test]
    fn test_error_responses() {
        let server = MonitorServer::new("/unused.sock");

        match server.process_message(request("nope", 4)) {
            Some(RpcResponse::Error { id, error }) => {
                assert_eq!(id, json!(4));
                assert_eq!(error.code, codes::METHOD_NOT_FOUND);
                assert_eq!(error.message, "Method not found: nope");
            }
            other => panic!("unexpected {other:?}"),
        }

        match server.process_message(json!({"jsonrpc": "1.0", "method": "get_stats", "id": 5})) {
            Some(RpcResponse::Error { id, error }) => {
                assert_eq!(id, json!(5));
                assert_eq!(error.code, codes::INVALID_REQUEST);
            }
            other => panic!("unexpected {other:?}"),
        }

        let health = result_of(server.process_message(request("health_check", 6)));
        assert_eq!(health, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_serves_client_over_socket() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("monitor.sock");
        let server = Arc::new(MonitorServer::new(&socket));
        let listener = server.bind().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(Arc::clone(&server).serve(listener, async move {
            let _ = stop_rx.await;
        }));

        let client = RpcClient::new();
        client
            .send_notification(
                &socket,
                "on_event",
                Some(json!({"event_type": "TOOL_CALL_START", "event_data": {"toolName": "grep"}})),
                None,
            )
            .await
            .unwrap();

        // Notifications are handled asynchronously; poll until counted.
        let mut stats = Value::Null;
        for _ in 0..50 {
            stats = client.send_request(&socket, "get_stats", None, None).await.unwrap();
            if stats["tool_calls_total"] == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(stats["tool_breakdown"]["grep"], 1);

        let err = client
            .send_request(&socket, "missing_method", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: codes::METHOD_NOT_FOUND, .. }), "{err}");

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert!(!socket.exists());
    }

    #[tokio::test]
    async fn test_garbage_gets_parse_error() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("monitor.sock");
        let server = Arc::new(MonitorServer::new(&socket));
        let listener = server.bind().unwrap();
        let serving = tokio::spawn(Arc::clone(&server).serve(listener, std::future::pending()));

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream.write_all(b"{not json}\n").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let reply: Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(reply["error"]["code"], codes::PARSE_ERROR);
        assert!(reply["id"].is_null());

        serving.abort();
    }
}
