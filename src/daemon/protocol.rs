//! JSON-RPC 2.0 envelope types and stream framing
//!
//! Requests are written as a single JSON document terminated by `\n`.
//! Responses are read as one JSON value from the accumulated bytes: the first
//! complete value wins and anything after it is ignored. This accepts both
//! newline-terminated and unterminated replies and does not care about
//! newlines embedded inside string payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Protocol tag carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Upper bound on a single buffered message
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Standard JSON-RPC error codes
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Request correlation id, echoed back by the daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
}

impl RequestId {
    /// Exact comparison against the raw `id` member of a response.
    ///
    /// Numbers must match as integers and strings as strings; `1` never
    /// matches `"1"`.
    pub fn matches(&self, raw: &Value) -> bool {
        match (self, raw) {
            (Self::Number(n), Value::Number(v)) => v.as_u64() == Some(*n),
            (Self::String(s), Value::String(v)) => s == v,
            _ => false,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

/// Outgoing request or notification (a notification has no `id`)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Serialize to the wire form: one JSON document plus a trailing newline.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Structured error object of an error envelope
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A validated response envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    Success { id: Value, result: Value },
    Error { id: Value, error: RpcErrorObject },
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self::Success { id, result }
    }

    pub fn error(id: Value, error: RpcErrorObject) -> Self {
        Self::Error { id, error }
    }

    /// The raw echoed id. Kept as a [`Value`] so a mismatching or null id can
    /// be reported verbatim.
    pub fn id(&self) -> &Value {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } => id,
        }
    }

    /// Validate a parsed JSON value as a response envelope.
    ///
    /// `result` may legitimately be `null`, so presence is checked on the
    /// object keys rather than through `Option` deserialization.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut map) = value else {
            return Err("response is not a JSON object".to_string());
        };

        match map.get("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => return Err(format!("unsupported jsonrpc version {other}")),
            None => return Err("missing 'jsonrpc' member".to_string()),
        }

        let id = map
            .remove("id")
            .ok_or_else(|| "missing 'id' member".to_string())?;

        match (map.remove("result"), map.remove("error")) {
            (Some(result), None) => Ok(Self::Success { id, result }),
            (None, Some(error)) => {
                let error: RpcErrorObject = serde_json::from_value(error)
                    .map_err(|e| format!("invalid 'error' member: {e}"))?;
                Ok(Self::Error { id, error })
            }
            (Some(_), Some(_)) => Err("both 'result' and 'error' are present".to_string()),
            (None, None) => Err("neither 'result' nor 'error' is present".to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("jsonrpc".to_string(), Value::from(JSONRPC_VERSION));
        match self {
            Self::Success { id, result } => {
                map.insert("result".to_string(), result.clone());
                map.insert("id".to_string(), id.clone());
            }
            Self::Error { id, error } => {
                let error = serde_json::to_value(error).unwrap_or(Value::Null);
                map.insert("error".to_string(), error);
                map.insert("id".to_string(), id.clone());
            }
        }
        Value::Object(map)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = serde_json::to_vec(&self.to_value())?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Framing failure while accumulating a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Bytes can never become valid JSON
    Malformed(String),
    /// Buffered bytes exceeded [`MAX_MESSAGE_BYTES`]
    TooLarge(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "invalid JSON: {msg}"),
            Self::TooLarge(n) => write!(
                f,
                "message of {n} bytes exceeds the {MAX_MESSAGE_BYTES}-byte limit"
            ),
        }
    }
}

/// Accumulates stream bytes until one complete JSON value is available.
///
/// Object, array and string values are delimited by a single forward scan
/// over the new bytes, and parsed once when their closing byte arrives, so
/// decoding stays linear in the message size. Bare scalars (numbers,
/// literals) are rare and short; they are re-parsed on each push.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    scan: Scan,
}

/// Scanner position within the first top-level value
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
    scalar: bool,
    end: Option<usize>,
}

enum Boundary {
    Pending,
    Complete(usize),
    Scalar,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a chunk and try to decode.
    ///
    /// Returns `Ok(None)` while the message is still incomplete.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Value>, FrameError> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_MESSAGE_BYTES {
            return Err(FrameError::TooLarge(self.buf.len()));
        }
        match self.advance() {
            Boundary::Pending => Ok(None),
            Boundary::Complete(end) => serde_json::from_slice(&self.buf[..end])
                .map(Some)
                .map_err(|e| FrameError::Malformed(e.to_string())),
            Boundary::Scalar => self.try_decode(),
        }
    }

    /// Scan bytes not seen yet, stopping at the end of the first value.
    fn advance(&mut self) -> Boundary {
        if let Some(end) = self.scan.end {
            return Boundary::Complete(end);
        }
        if self.scan.scalar {
            return Boundary::Scalar;
        }

        while self.scan.offset < self.buf.len() {
            let byte = self.buf[self.scan.offset];
            let scan = &mut self.scan;
            scan.offset += 1;

            if scan.in_string {
                if scan.escaped {
                    scan.escaped = false;
                } else if byte == b'\\' {
                    scan.escaped = true;
                } else if byte == b'"' {
                    scan.in_string = false;
                    if scan.depth == 0 {
                        scan.end = Some(scan.offset);
                        return Boundary::Complete(scan.offset);
                    }
                }
                continue;
            }

            match byte {
                b'"' => {
                    scan.in_string = true;
                    scan.started = true;
                }
                b'{' | b'[' => {
                    scan.depth += 1;
                    scan.started = true;
                }
                b'}' | b']' if scan.depth > 0 => {
                    scan.depth -= 1;
                    if scan.depth == 0 {
                        scan.end = Some(scan.offset);
                        return Boundary::Complete(scan.offset);
                    }
                }
                b if b.is_ascii_whitespace() => {}
                // A stray closer or a bare scalar: let the parser judge it.
                _ if !scan.started || scan.depth == 0 => {
                    scan.scalar = true;
                    return Boundary::Scalar;
                }
                _ => {}
            }
        }
        Boundary::Pending
    }

    fn try_decode(&self) -> Result<Option<Value>, FrameError> {
        let mut values = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(FrameError::Malformed(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_encodes_as_newline_terminated_envelope() {
        let request = RpcRequest::new("get_stats", Some(json!({"verbose": true})), 3.into());
        let bytes = request.encode().unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "method": "get_stats", "params": {"verbose": true}, "id": 3})
        );
    }

    #[test]
    fn test_notification_omits_id_and_params_when_absent() {
        let request = RpcRequest::notification("on_event", None);
        assert!(request.is_notification());
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "on_event"}));
    }

    #[test]
    fn test_request_id_matching_is_exact() {
        assert!(RequestId::Number(5).matches(&json!(5)));
        assert!(!RequestId::Number(5).matches(&json!("5")));
        assert!(!RequestId::Number(5).matches(&json!(6)));
        assert!(RequestId::from("abc").matches(&json!("abc")));
        assert!(!RequestId::from("abc").matches(&Value::Null));
    }

    #[test]
    fn test_success_response_accepts_null_result() {
        let response =
            RpcResponse::from_value(json!({"jsonrpc": "2.0", "result": null, "id": 1})).unwrap();
        assert_eq!(response, RpcResponse::success(json!(1), Value::Null));
    }

    #[test]
    fn test_error_response_carries_code_message_and_data() {
        let response = RpcResponse::from_value(json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "Method not found: x", "data": {"hint": 1}},
            "id": "a"
        }))
        .unwrap();
        match response {
            RpcResponse::Error { id, error } => {
                assert_eq!(id, json!("a"));
                assert_eq!(error.code, codes::METHOD_NOT_FOUND);
                assert_eq!(error.data, Some(json!({"hint": 1})));
            }
            other => panic!("expected error envelope, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_envelopes_are_rejected() {
        let cases = [
            json!([1, 2]),
            json!({"result": 1, "id": 1}),
            json!({"jsonrpc": "1.0", "result": 1, "id": 1}),
            json!({"jsonrpc": "2.0", "result": 1}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "result": 1, "error": {"code": 1, "message": "x"}, "id": 1}),
            json!({"jsonrpc": "2.0", "error": {"message": "no code"}, "id": 1}),
        ];
        for case in cases {
            assert!(RpcResponse::from_value(case.clone()).is_err(), "{case}");
        }
    }

    #[test]
    fn test_frame_buffer_waits_for_partial_reads() {
        let mut frame = FrameBuffer::new();
        assert_eq!(frame.push(br#"{"jsonrpc":"2.0","res"#).unwrap(), None);
        assert_eq!(frame.push(br#"ult":"line one\nline two","#).unwrap(), None);
        let value = frame.push(br#""id":1}"#).unwrap().unwrap();
        assert_eq!(value["result"], json!("line one\nline two"));
    }

    #[test]
    fn test_frame_buffer_ignores_trailing_bytes_after_first_value() {
        let mut frame = FrameBuffer::new();
        let value = frame.push(b"{\"a\":1}\n{\"b\":").unwrap().unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn test_frame_buffer_ignores_brackets_inside_strings() {
        let mut frame = FrameBuffer::new();
        assert_eq!(frame.push(br#"{"result":"}]\"}","#).unwrap(), None);
        let value = frame.push(br#""id":1}"#).unwrap().unwrap();
        assert_eq!(value["result"], json!("}]\"}"));
    }

    #[test]
    fn test_frame_buffer_decodes_bare_scalar() {
        let mut frame = FrameBuffer::new();
        assert_eq!(frame.push(b" 42\n").unwrap(), Some(json!(42)));
    }

    #[test]
    fn test_frame_buffer_decodes_multi_megabyte_message_in_small_chunks() {
        let payload = "x".repeat(8 * 1024 * 1024);
        let bytes = serde_json::to_vec(&json!({"jsonrpc": "2.0", "result": payload, "id": 1})).unwrap();

        let started = std::time::Instant::now();
        let mut frame = FrameBuffer::new();
        let mut decoded = None;
        for chunk in bytes.chunks(8 * 1024) {
            if let Some(value) = frame.push(chunk).unwrap() {
                decoded = Some(value);
                break;
            }
        }
        assert!(
            started.elapsed() < std::time::Duration::from_secs(10),
            "decoding took {:?}",
            started.elapsed()
        );
        let value = decoded.unwrap();
        assert_eq!(value["result"].as_str().map(str::len), Some(8 * 1024 * 1024));
    }

    #[test]
    fn test_frame_buffer_reports_garbage_as_malformed() {
        let mut frame = FrameBuffer::new();
        assert!(matches!(
            frame.push(b"HTTP/1.1 400 Bad Request"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn test_frame_buffer_treats_whitespace_as_incomplete() {
        let mut frame = FrameBuffer::new();
        assert_eq!(frame.push(b"  \n").unwrap(), None);
        assert_eq!(frame.len(), 3);
    }

    #[test]
    fn test_response_roundtrips_through_wire_form() {
        let response = RpcResponse::error(json!(9), RpcErrorObject::new(codes::INTERNAL_ERROR, "x"));
        let bytes = response.encode().unwrap();
        let mut frame = FrameBuffer::new();
        let value = frame.push(&bytes).unwrap().unwrap();
        assert_eq!(RpcResponse::from_value(value).unwrap(), response);
    }
}
