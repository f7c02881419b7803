//! Control-surface wire protocol: newline-delimited, one frame per line
//!
//! Wire format:
//!
//! Peer → Service (request token, plain text line):
//!   binder
//!   subscribe
//!
//! Service → Peer (handshake reply to `binder`):
//!   { "handle": { "id": "…", "server": "demo_server", "pid": 4242 } }
//!   { "handle": null }
//!
//! Peer → Service (call on a granted handle):
//!   { "id": "1", "method": "queryStatus" }
//!   { "id": "2", "method": "requestStop" }
//!
//! Service → Peer (call reply):
//!   { "id": "1", "result": "running" }
//!   { "id": "2", "error": { "code": -32601, "message": "Method not found: nope" } }
//!
//! Service → Subscriber (notification push, no id):
//!   { "event": "running", "handle": { … } }
//!   { "event": "stopped" }

use crate::types::HandleInfo;
use serde::{Deserialize, Serialize};

/// Token asking for the live control handle.
pub const REQUEST_HANDLE: &str = "binder";

/// Token asking for running/stopped notifications.
pub const REQUEST_SUBSCRIBE: &str = "subscribe";

pub const METHOD_QUERY_STATUS: &str = "queryStatus";
pub const METHOD_REQUEST_STOP: &str = "requestStop";

pub const CODE_METHOD_NOT_FOUND: i32 = -32601;
pub const CODE_HANDLE_REVOKED: i32 = -32001;

/// Request tokens a peer may open a connection with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestToken {
    Handle,
    Subscribe,
}

impl RequestToken {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            REQUEST_HANDLE => Some(Self::Handle),
            REQUEST_SUBSCRIBE => Some(Self::Subscribe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Handle => REQUEST_HANDLE,
            Self::Subscribe => REQUEST_SUBSCRIBE,
        }
    }
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

/// Reply to a `binder` request: the live handle, or nothing when not running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeReply {
    pub handle: Option<HandleInfo>,
}

impl HandshakeReply {
    pub fn granted(handle: HandleInfo) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    pub fn absent() -> Self {
        Self { handle: None }
    }
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Call issued on a granted handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: serde_json::Value::Null,
        }
    }
}

/// Reply to an [`RpcRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Successful response with a result value.
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn err(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Shorthand for a method-not-found error.
    pub fn method_not_found(id: impl Into<String>, method: &str) -> Self {
        Self::err(id, CODE_METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// The handle the peer holds is no longer published.
    pub fn handle_revoked(id: impl Into<String>) -> Self {
        Self::err(id, CODE_HANDLE_REVOKED, "control handle revoked")
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// RPC error detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Pushed to subscribers whenever the service starts or stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Notification {
    Running { handle: HandleInfo },
    Stopped,
}

impl Notification {
    pub fn handle(&self) -> Option<&HandleInfo> {
        match self {
            Self::Running { handle } => Some(handle),
            Self::Stopped => None,
        }
    }
}

/// Serialize a frame followed by the line terminator.
pub fn encode_line<T: Serialize>(frame: &T) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    Ok(line)
}
