//! Control plane errors

use std::time::Duration;

use devsim_core::{DeviceError, MemberError, SimulationError};
use thiserror::Error;

/// Parse error
pub const PARSE_ERROR: i64 = -32700;
/// Invalid request
pub const INVALID_REQUEST: i64 = -32600;
/// Method not found
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid params
pub const INVALID_PARAMS: i64 = -32602;
/// Server error
pub const SERVER_ERROR: i64 = -32000;

/// Server side request errors, each mapped to a JSON-RPC error object
#[derive(Debug, Error)]
pub enum ControlError {
    /// The request is not JSON
    #[error("parse error: {0}")]
    Parse(String),

    /// The request is JSON but not a JSON-RPC request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No such object or member
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Wrong number or type of parameters
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// A member access failed on the server
    #[error(transparent)]
    Member(MemberError),

    /// A result can not be represented on the wire
    #[error("attribute '{attribute}' is not a finite number")]
    NonFinite {
        /// Object path of the attribute
        attribute: String,
    },

    /// The simulation is gone
    #[error(transparent)]
    Simulation(#[from] SimulationError),

    /// The result could not be encoded
    #[error("failed to encode result: {0}")]
    Encode(String),

    /// The server could not bind its listener
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Requested address
        address: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl From<MemberError> for ControlError {
    fn from(e: MemberError) -> Self {
        match e {
            MemberError::Unknown(_) | MemberError::NotAProperty(_) | MemberError::NotAMethod(_) => {
                ControlError::MethodNotFound(e.to_string())
            }
            MemberError::Arity { .. } => ControlError::InvalidParams(e.to_string()),
            other => ControlError::Member(other),
        }
    }
}

impl ControlError {
    /// JSON-RPC error code
    pub fn code(&self) -> i64 {
        match self {
            ControlError::Parse(_) => PARSE_ERROR,
            ControlError::InvalidRequest(_) => INVALID_REQUEST,
            ControlError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ControlError::InvalidParams(_) => INVALID_PARAMS,
            _ => SERVER_ERROR,
        }
    }

    /// Error type reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            ControlError::Parse(_) => "ParseError",
            ControlError::InvalidRequest(_) => "InvalidRequest",
            ControlError::MethodNotFound(_) => "MethodNotFound",
            ControlError::InvalidParams(_) => "InvalidParams",
            ControlError::Member(MemberError::ReadOnly(_)) => "ReadOnly",
            ControlError::Member(MemberError::Device { source, .. }) => device_error_kind(source),
            ControlError::Member(_) => "MemberError",
            ControlError::NonFinite { .. } => "NonFiniteValue",
            ControlError::Simulation(SimulationError::Stopped) => "SimulationStopped",
            ControlError::Simulation(_) => "SimulationError",
            ControlError::Encode(_) => "EncodeError",
            ControlError::Bind { .. } => "BindError",
        }
    }
}

fn device_error_kind(e: &DeviceError) -> &'static str {
    match e {
        DeviceError::Busy(_) => "DeviceBusy",
        DeviceError::LimitViolation(_) => "LimitViolation",
        DeviceError::AccessViolation(_) => "AccessViolation",
        DeviceError::InvalidArgument(_) => "InvalidArgument",
        DeviceError::Conversion { .. } => "ConversionError",
        DeviceError::StateMachine(_) => "StateMachineError",
        DeviceError::Other(_) => "DeviceError",
    }
}

/// Client side errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response within the request timeout
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The server answered with an error
    #[error("remote {kind} ({code}): {message}")]
    Remote {
        /// JSON-RPC error code
        code: i64,
        /// Server side error type
        kind: String,
        /// Server side message
        message: String,
    },

    /// The response violates the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The proxied object has no such member
    #[error("object '{object}' has no member '{member}'")]
    NoSuchMember {
        /// Object name
        object: String,
        /// Member name
        member: String,
    },

    /// Connection failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
