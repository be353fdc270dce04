//! JSON-RPC 2.0 codec for relay messages.
//!
//! Every message on a pairing topic is a JSON-RPC request, result, or
//! error. The untagged [`JsonRpcPayload`] covers classification of inbound
//! traffic without a second parse.

use serde::{Deserialize, Serialize};

/// JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code for method-not-found per JSON-RPC 2.0.
pub const ERROR_CODE_METHOD_NOT_FOUND: i64 = -32601;

/// Implementation-defined server error code used for protocol rejections.
pub const ERROR_CODE_SERVER: i64 = -32000;

/// A JSON-RPC request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Build a request with a fresh payload id.
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: payload_id(),
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub jsonrpc: String,
    pub result: serde_json::Value,
}

impl JsonRpcResponse {
    pub fn new(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
        }
    }
}

/// The error member of a JSON-RPC error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i64,
    pub message: String,
}

/// A JSON-RPC error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub id: u64,
    pub jsonrpc: String,
    pub error: ErrorData,
}

impl JsonRpcErrorResponse {
    pub fn new(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorData {
                code,
                message: message.into(),
            },
        }
    }
}

/// Any JSON-RPC message: request, result, or error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcPayload {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcErrorResponse),
}

impl JsonRpcPayload {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn id(&self) -> u64 {
        match self {
            Self::Request(r) => r.id,
            Self::Response(r) => r.id,
            Self::Error(r) => r.id,
        }
    }
}

/// Generate a payload id from the wall clock, nanosecond resolution.
pub fn payload_id() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
