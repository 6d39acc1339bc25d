//! JSON-RPC 2.0 messages, one JSON document per line

use devsim_core::Value;
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// Protocol version tag
pub const JSONRPC_VERSION: &str = "2.0";

/// Longest accepted message line in bytes, without the newline
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// A request as sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always "2.0"
    pub jsonrpc: String,
    /// `object.member`, `object.member:get`, `object.member:set`, `object:api` or `get_objects`
    pub method: String,
    /// Positional parameters
    #[serde(default)]
    pub params: Vec<Value>,
    /// Request id; absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl Request {
    /// Request with a numeric id
    pub fn new(id: u64, method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(serde_json::Value::from(id)),
        }
    }

    /// Parse one line, distinguishing malformed JSON from malformed requests
    ///
    /// On error the id is returned if one could be read.
    pub fn parse(line: &str) -> Result<Self, (Option<serde_json::Value>, ControlError)> {
        let json: serde_json::Value =
            serde_json::from_str(line).map_err(|e| (None, ControlError::Parse(e.to_string())))?;
        let id = json.get("id").cloned();

        let Some(object) = json.as_object() else {
            return Err((None, ControlError::InvalidRequest("expected a JSON object".into())));
        };
        if object.get("jsonrpc").and_then(|v| v.as_str()) != Some(JSONRPC_VERSION) {
            return Err((id, ControlError::InvalidRequest("jsonrpc must be \"2.0\"".into())));
        }
        if !object.get("method").is_some_and(|m| m.is_string()) {
            return Err((id, ControlError::InvalidRequest("method must be a string".into())));
        }
        if object.get("params").is_some_and(|p| !p.is_array()) {
            return Err((id, ControlError::InvalidParams("params must be a list".into())));
        }
        serde_json::from_value(json).map_err(|e| (id, ControlError::InvalidParams(e.to_string())))
    }
}

/// Error details for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// Error type
    #[serde(rename = "type")]
    pub kind: String,
    /// Error message
    pub message: String,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Short description
    pub message: String,
    /// Details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

impl From<&ControlError> for RpcError {
    fn from(e: &ControlError) -> Self {
        let message = match e.code() {
            crate::error::PARSE_ERROR => "Parse error",
            crate::error::INVALID_REQUEST => "Invalid Request",
            crate::error::METHOD_NOT_FOUND => "Method not found",
            crate::error::INVALID_PARAMS => "Invalid params",
            _ => "Server error",
        };
        Self {
            code: e.code(),
            message: message.to_string(),
            data: Some(ErrorData {
                kind: e.kind().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// A response to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Id of the answered request; null if it could not be read
    #[serde(default)]
    pub id: serde_json::Value,
    /// Result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Successful response
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    pub fn failure(id: Option<serde_json::Value>, error: &ControlError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(serde_json::Value::Null),
            result: None,
            error: Some(RpcError::from(error)),
        }
    }
}

/// Object listing returned by `object:api`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiListing {
    /// Type name of the object
    pub class: String,
    /// Methods, plus `name:get` / `name:set` for properties
    pub methods: Vec<String>,
}
