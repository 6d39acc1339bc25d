//! Stream interface definition
//!
//! A [`StreamInterface`] describes the line protocol of one device type: the
//! commands, terminators, read timeout and error handling. Interface members
//! registered with [`StreamInterface::members`] shadow device members of the
//! same name, which lets a protocol rename or reformat device data without
//! touching the device.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use devsim_core::{Device, Registry};

use crate::command::Command;
use crate::error::StreamError;

/// Default request and reply terminator
pub const DEFAULT_TERMINATOR: &str = "\r";

/// Default read timeout
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Turns a request error into an optional reply
pub type ErrorHandler = Arc<dyn Fn(&[u8], &StreamError) -> Option<String> + Send + Sync>;

/// Line protocol description for devices of type `D`
pub struct StreamInterface<D: Device> {
    pub(crate) commands: Vec<Command>,
    pub(crate) members: Registry<D>,
    pub(crate) in_terminator: String,
    pub(crate) out_terminator: String,
    pub(crate) readtimeout: Duration,
    pub(crate) error_handler: ErrorHandler,
    pub(crate) doc: String,
}

impl<D: Device> Default for StreamInterface<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> fmt::Debug for StreamInterface<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamInterface")
            .field("commands", &self.commands)
            .field("in_terminator", &self.in_terminator)
            .field("out_terminator", &self.out_terminator)
            .field("readtimeout", &self.readtimeout)
            .finish()
    }
}

impl<D: Device> StreamInterface<D> {
    /// Interface without commands, `\r` terminators and a 100 ms read timeout
    ///
    /// Errors are answered with their message.
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            members: Registry::new("StreamInterface"),
            in_terminator: DEFAULT_TERMINATOR.to_string(),
            out_terminator: DEFAULT_TERMINATOR.to_string(),
            readtimeout: DEFAULT_READ_TIMEOUT,
            error_handler: Arc::new(|_: &[u8], error: &StreamError| Some(error.to_string())),
            doc: String::new(),
        }
    }

    /// Add a command; commands are matched in the order they were added
    pub fn command(mut self, command: impl Into<Command>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Add several commands
    pub fn commands<I, C>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Command>,
    {
        self.commands.extend(commands.into_iter().map(Into::into));
        self
    }

    /// Interface-level members, resolved before device members
    pub fn members(mut self, members: Registry<D>) -> Self {
        self.members = members;
        self
    }

    /// Request terminator; empty means requests end after `readtimeout` of silence
    pub fn in_terminator(mut self, terminator: &str) -> Self {
        self.in_terminator = terminator.to_string();
        self
    }

    /// Reply terminator
    pub fn out_terminator(mut self, terminator: &str) -> Self {
        self.out_terminator = terminator.to_string();
        self
    }

    /// Read timeout; zero disables it
    pub fn readtimeout(mut self, timeout: Duration) -> Self {
        self.readtimeout = timeout;
        self
    }

    /// Replace the error handler
    ///
    /// The handler receives the offending request; returning `None` writes no reply.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[u8], &StreamError) -> Option<String> + Send + Sync + 'static,
    {
        self.error_handler = Arc::new(handler);
        self
    }

    /// Free-form description placed at the top of the documentation
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = doc.to_string();
        self
    }
}
