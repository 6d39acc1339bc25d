//! Error types for devices, state machines and the simulation runtime

use std::io;

use thiserror::Error;

/// Errors raised by device operations and state callbacks
///
/// These are "state errors": a protocol front end catches them per request and
/// turns them into an error reply, the connection stays open.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    /// The device can not perform the operation in its current state
    #[error("device busy: {0}")]
    Busy(String),

    /// A value is outside of the device's allowed range
    #[error("limit violation: {0}")]
    LimitViolation(String),

    /// The operation is not permitted (read-only member, locked device, ...)
    #[error("access violation: {0}")]
    AccessViolation(String),

    /// An argument was rejected by the operation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A value could not be converted to the expected type
    #[error("conversion failed: expected {expected}, got {found}")]
    Conversion {
        /// Expected type name
        expected: &'static str,
        /// Description of the value that was supplied
        found: String,
    },

    /// A state machine callback failed while processing a cycle
    #[error(transparent)]
    StateMachine(Box<StateMachineError>),

    /// Any other domain error
    #[error("{0}")]
    Other(String),
}

impl From<StateMachineError> for DeviceError {
    fn from(err: StateMachineError) -> Self {
        DeviceError::StateMachine(Box::new(err))
    }
}

/// Errors raised when resolving or invoking a named member
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MemberError {
    /// No member with this name is registered
    #[error("unknown member '{0}'")]
    Unknown(String),

    /// The member is a method, but was accessed as a property
    #[error("'{0}' is not a property")]
    NotAProperty(String),

    /// The member is a property, but was called as a method
    #[error("'{0}' is not a method")]
    NotAMethod(String),

    /// The property has no setter
    #[error("property '{0}' is read-only")]
    ReadOnly(String),

    /// Wrong number of positional arguments
    #[error("'{name}' takes {expected} argument(s), {given} given")]
    Arity {
        /// Member name
        name: String,
        /// Expected argument count
        expected: usize,
        /// Supplied argument count
        given: usize,
    },

    /// The member itself failed
    #[error("'{name}' failed: {source}")]
    Device {
        /// Member name
        name: String,
        /// Underlying device error
        #[source]
        source: DeviceError,
    },
}

/// The event being raised when a state machine callback failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    /// Entering a state
    OnEntry,
    /// Once-per-cycle event
    InState,
    /// Leaving a state
    OnExit,
    /// Evaluating a transition condition
    Transition,
}

impl std::fmt::Display for StateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StateEvent::OnEntry => "on_entry",
            StateEvent::InState => "in_state",
            StateEvent::OnExit => "on_exit",
            StateEvent::Transition => "transition",
        };
        f.write_str(name)
    }
}

/// State machine construction and processing errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StateMachineError {
    /// A state name was referenced that has not been declared
    #[error("unknown state '{name}' used as {role}")]
    UnknownState {
        /// State name
        name: String,
        /// Where the name was used (initial state, transition source, ...)
        role: &'static str,
    },

    /// A state name was declared twice
    #[error("state '{0}' is declared more than once")]
    DuplicateState(String),

    /// An override targets a transition that does not exist
    #[error("no transition '{from}' -> '{to}' to override")]
    UnknownTransition {
        /// Source state
        from: String,
        /// Target state
        to: String,
    },

    /// A callback or transition condition failed
    #[error("{event} of state '{state}' failed: {source}")]
    Callback {
        /// State that was current when the failure happened
        state: String,
        /// Event being processed
        event: StateEvent,
        /// Underlying error
        #[source]
        source: DeviceError,
    },
}

/// Adapter management errors
#[derive(Debug, Error)]
pub enum AdapterError {
    /// An adapter for this protocol already exists in the collection
    #[error("adapter for protocol '{0}' is already registered")]
    DuplicateProtocol(String),

    /// One or more requested protocols have no adapter
    #[error("no adapter registered for protocols: {}", .0.join(", "))]
    UnknownProtocols(Vec<String>),

    /// The collection is not attached to a running simulation
    #[error("adapters can only be connected while the simulation is running")]
    NotAttached,

    /// Listening socket could not be bound
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Bind address
        address: String,
        /// I/O error
        #[source]
        source: io::Error,
    },

    /// Other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Simulation level errors
#[derive(Debug, Error)]
pub enum SimulationError {
    /// The simulation has been stopped, no further requests are processed
    #[error("simulation has been stopped")]
    Stopped,

    /// A knob was set to an invalid value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation is not allowed in the current state (e.g. pausing twice)
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No setup with this name exists
    #[error("unknown setup '{0}'")]
    UnknownSetup(String),

    /// The setup factory failed
    #[error("failed to create device for setup '{name}': {source}")]
    Setup {
        /// Setup name
        name: String,
        /// Factory error
        #[source]
        source: DeviceError,
    },

    /// Processing a cycle failed; the simulation can not continue
    #[error("cycle failed: {0}")]
    Fatal(DeviceError),

    /// Member access failed
    #[error(transparent)]
    Member(#[from] MemberError),

    /// Adapter error
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl SimulationError {
    /// Convert into a device error so simulation members can be exposed through a registry
    pub fn into_device_error(self) -> DeviceError {
        match self {
            SimulationError::InvalidParameter(msg) => DeviceError::InvalidArgument(msg),
            SimulationError::InvalidState(msg) => DeviceError::Busy(msg),
            other => DeviceError::Other(other.to_string()),
        }
    }
}
