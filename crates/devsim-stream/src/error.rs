//! Error types for stream command binding and processing

use devsim_core::{Arity, DeviceError, MemberError, SimulationError};
use thiserror::Error;

/// Configuration errors detected while binding commands to members
///
/// These are fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindingError {
    /// The member exists neither on the interface nor on the device
    #[error("can not find member '{0}' in device or interface")]
    UnknownMember(String),

    /// Capture groups do not match the method's arity
    #[error("pattern '{pattern}' has {groups} group(s) but '{member}' takes {arity} argument(s)")]
    ArityMismatch {
        /// Member name
        member: String,
        /// Pattern text
        pattern: String,
        /// Capture groups in the pattern
        groups: usize,
        /// Arity of the member
        arity: Arity,
    },

    /// Number of argument mappings does not match the capture groups
    #[error("pattern '{pattern}' has {groups} group(s), got {mappings} argument mapping(s)")]
    MappingCount {
        /// Pattern text
        pattern: String,
        /// Capture groups in the pattern
        groups: usize,
        /// Supplied mappings
        mappings: usize,
    },

    /// A `Cmd` targets a property
    #[error("'{0}' is a property, use Var to expose it")]
    NotAMethod(String),

    /// A `Var` targets a method
    #[error("'{0}' is a method, use Cmd to expose it")]
    NotAProperty(String),

    /// A write pattern targets a property without setter
    #[error("'{0}' is read-only but has a write pattern")]
    ReadOnly(String),

    /// A `Var` has neither a read nor a write pattern
    #[error("variable '{0}' has no read or write pattern")]
    EmptyVar(String),

    /// The same pattern is bound more than once
    #[error("the pattern '{0}' is associated with multiple commands")]
    DuplicatePattern(String),

    /// The pattern does not compile
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern text
        pattern: String,
        /// Compiler message
        message: String,
    },
}

/// Errors raised while processing a single request
///
/// Each one is passed to the interface's error handler; the connection stays open.
#[derive(Debug, Error)]
pub enum StreamError {
    /// No command pattern matched the request
    #[error("none of the device's commands matched '{0}'")]
    UnknownCommand(String),

    /// The read timeout elapsed before the terminator arrived
    #[error("read timeout: discarded {0} byte(s) of incomplete command")]
    ReadTimeout(usize),

    /// An argument could not be converted
    #[error("argument {index}: {source}")]
    Argument {
        /// Zero-based argument index
        index: usize,
        /// Conversion error
        #[source]
        source: DeviceError,
    },

    /// The member rejected the call
    #[error(transparent)]
    Member(#[from] MemberError),

    /// The return mapping failed
    #[error("reply formatting failed: {0}")]
    Reply(DeviceError),

    /// The simulation is gone
    #[error(transparent)]
    Simulation(#[from] SimulationError),
}
