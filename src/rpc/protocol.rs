//! JSON-RPC 2.0 message types exchanged between the `fanload` CLI and daemon.
//!
//! One request per line, one response per line. Application error codes sit
//! in the implementation-defined `-32000..-32099` range.
//! See: https://www.jsonrpc.org/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call from a client, e.g. `batch.submit` or `logs.list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Protocol version; must be exactly "2.0"
    pub jsonrpc: String,
    /// Dotted method name such as `batch.pause`
    pub method: String,
    /// Method parameters. Methods here take an object; absent means `{}`.
    #[serde(default)]
    pub params: Option<Value>,
    /// Caller-chosen id echoed in the response. `None` marks a notification,
    /// which gets no response.
    #[serde(default)]
    pub id: Option<Value>,
}

/// Reply to a [`Request`]. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Method output on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure details; never set together with `result`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Id of the request being answered, or null if it could not be read
    pub id: Value,
}

/// Error member of a failed [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// One of the standard or application codes below
    pub code: i32,
    /// Human-readable summary, shown as-is by the CLI
    pub message: String,
    /// Structured detail, e.g. the rejected files of a submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC 2.0 error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// A batch is still running; submits and archive builds must wait.
pub const BATCH_RUNNING: i32 = -32001;
/// No batch has been submitted since the daemon started.
pub const NO_BATCH: i32 = -32002;
/// The addressed destination or upload log does not exist.
pub const NOT_FOUND: i32 = -32004;
/// Submitted files or account fields failed validation.
pub const VALIDATION_FAILED: i32 = -32010;
/// The archive could not be built.
pub const ARCHIVE_FAILED: i32 = -32020;

impl Response {
    /// Successful reply carrying `result`.
    pub fn success(id: Value, result: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
            id,
        }
    }

    /// Failed reply without extra data.
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Failed reply with structured `data` attached.
    pub fn error_with_data(id: Value, code: i32, message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: Some(serde_json::to_value(data).unwrap_or(Value::Null)),
            }),
            id,
        }
    }

    /// The line was not JSON; the request id could not be read.
    pub fn parse_error() -> Self {
        Self::error(Value::Null, PARSE_ERROR, "Parse error")
    }

    /// JSON, but not a valid request object.
    pub fn invalid_request(id: Value) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid request")
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    /// Params did not deserialize into the method's parameter type.
    pub fn invalid_params(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, details.into())
    }

    /// Details stay in the daemon log; clients only see a generic message.
    pub fn internal_error(id: Value) -> Self {
        Self::error(id, INTERNAL_ERROR, "Internal error")
    }
}

impl Request {
    /// Request with an id, as sent by [`RpcClient`](super::client::RpcClient).
    pub fn new(method: &str, params: Option<Value>, id: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    /// True when no response is expected.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Check the version tag and method name before dispatch.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jsonrpc != "2.0" {
            return Err("jsonrpc must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}
