//! JSON message types for confplane requests and responses.

use crate::error::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Protocol operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    // Session management
    Hello,
    Auth,
    Ping,
    CloseSession,

    // Data access
    Get,
    GetConfig,
    EditConfig,
    Commit,
    Cancel,

    // Extension operations
    Rpc,
}

/// Request message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Message type, always "request".
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Unique request ID for correlation.
    pub id: String,

    /// Operation to perform.
    pub op: Operation,

    /// Operation-specific parameters.
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<String>, op: Operation) -> Self {
        Self {
            msg_type: "request".to_string(),
            id: id.into(),
            op,
            params: Value::Object(Default::default()),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    /// Stable error code.
    pub code: ErrorCode,

    /// Human-readable error message.
    pub message: String,

    /// Whether this error is retryable.
    pub retryable: bool,

    /// Additional error details.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.is_retryable(),
            code,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Response metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Server timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_time: Option<DateTime<Utc>>,

    /// Session id the response belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,

    /// Store versions after a committing operation, keyed by store name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub versions: HashMap<String, u64>,

    /// Additional metadata fields (for forward compatibility).
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Response message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Message type, always "response".
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Request ID this response correlates to.
    pub id: String,

    /// Response status.
    pub status: ResponseStatus,

    /// Result payload (for successful responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error details (for error responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,

    /// Response metadata.
    #[serde(default, skip_serializing_if = "is_meta_empty")]
    pub meta: ResponseMeta,
}

fn is_meta_empty(meta: &ResponseMeta) -> bool {
    meta.server_time.is_none()
        && meta.session_id.is_none()
        && meta.versions.is_empty()
        && meta.extra.is_empty()
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            msg_type: "response".to_string(),
            id: id.into(),
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            meta: ResponseMeta::default(),
        }
    }

    pub fn error(id: impl Into<String>, error: ResponseError) -> Self {
        Self {
            msg_type: "response".to_string(),
            id: id.into(),
            status: ResponseStatus::Error,
            result: None,
            error: Some(error),
            meta: ResponseMeta::default(),
        }
    }

    pub fn with_meta(mut self, meta: ResponseMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == ResponseStatus::Error
    }
}

// ============================================================================
// Operation-specific parameter types
// ============================================================================

/// Parameters for HELLO request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: u16,
    #[serde(default)]
    pub client_name: Option<String>,
    /// Capability URNs the client implements.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Result for HELLO response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: u16,
    pub session_id: u64,
    pub server_name: String,
    pub server_version: String,
    /// Capability URNs both sides agreed on.
    pub capabilities: Vec<String>,
    /// Every capability URN the server advertises, so a client can see
    /// what it missed when the agreed set is smaller than it offered.
    #[serde(default)]
    pub server_capabilities: Vec<String>,
}

/// Parameters for AUTH request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthParams {
    pub username: String,
    pub password: String,
}

/// Parameters for GET and GET_CONFIG requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetParams {
    /// Data path to read; absent or "/" reads the whole store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// One staged edit inside an EDIT_CONFIG request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EditOperation {
    /// Replace the subtree at `path` with `value`.
    Put { path: String, value: Value },
    /// Deep-merge `value` into the subtree at `path`.
    Merge { path: String, value: Value },
    /// Remove the subtree at `path`.
    Delete { path: String },
}

/// Parameters for EDIT_CONFIG request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditParams {
    pub edits: Vec<EditOperation>,
}

/// Parameters for RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcParams {
    /// Module owning the operation.
    pub module: String,
    /// Operation name within the module.
    pub name: String,
    /// Operation input document.
    #[serde(default)]
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::new("1", Operation::Ping);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""op":"PING""#));
        assert!(json.contains(r#""type":"request""#));
    }

    #[test]
    fn test_operation_wire_names() {
        let json = serde_json::to_string(&Operation::EditConfig).unwrap();
        assert_eq!(json, r#""EDIT_CONFIG""#);
        let json = serde_json::to_string(&Operation::CloseSession).unwrap();
        assert_eq!(json, r#""CLOSE_SESSION""#);
    }

    #[test]
    fn test_response_ok_serialization() {
        let resp = Response::ok("1", serde_json::json!({"pong": true}));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(json.contains(r#""pong":true"#));
    }

    #[test]
    fn test_response_error_serialization() {
        let err = ResponseError::new(ErrorCode::NotFound, "no data at path")
            .with_detail("path", "/system/hostname");
        let resp = Response::error("1", err);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""code":"NOT_FOUND""#));
        assert!(json.contains(r#""retryable":false"#));
    }

    #[test]
    fn test_edit_operation_tagging() {
        let edit = EditOperation::Put {
            path: "/system/hostname".to_string(),
            value: serde_json::json!("gw-1"),
        };
        let json = serde_json::to_string(&edit).unwrap();
        assert!(json.contains(r#""op":"put""#));

        let parsed: EditOperation =
            serde_json::from_str(r#"{"op":"delete","path":"/system"}"#).unwrap();
        assert!(matches!(parsed, EditOperation::Delete { .. }));
    }

    #[test]
    fn test_response_meta_versions() {
        let mut meta = ResponseMeta::default();
        meta.versions.insert("CONFIG-DS".to_string(), 3);
        let resp = Response::ok("1", serde_json::json!({})).with_meta(meta);
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains(r#""CONFIG-DS":3"#));
    }
}
