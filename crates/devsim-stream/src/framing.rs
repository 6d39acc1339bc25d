//! Request framing for byte streams
//!
//! A [`StreamFramer`] collects the bytes of one connection and cuts them into
//! requests. With a terminator, every terminator ends one request and the read
//! timeout only limits how long an unfinished request may sit without new
//! bytes. Without a terminator, a request ends after the read timeout of
//! silence.
//!
//! The framer never reads the clock itself; callers pass `now` so the timing
//! rules can be tested without sockets.

use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

/// Upper bound for buffered bytes of one unfinished request
pub const MAX_BUFFER_LEN: usize = 64 * 1024;

/// Result of a deadline check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// Silence completed a request (empty terminator)
    Command(Vec<u8>),
    /// An unfinished request was dropped
    Timeout {
        /// The discarded bytes
        discarded: Vec<u8>,
    },
}

/// Per-connection request framer
#[derive(Debug, Clone)]
pub struct StreamFramer {
    terminator: Vec<u8>,
    readtimeout: Duration,
    buffer: Vec<u8>,
    last_byte: Option<Instant>,
}

impl StreamFramer {
    /// Create a framer; a zero `readtimeout` disables timing
    pub fn new(terminator: &[u8], readtimeout: Duration) -> Self {
        Self {
            terminator: terminator.to_vec(),
            readtimeout,
            buffer: Vec::with_capacity(64),
            last_byte: None,
        }
    }

    /// Append received bytes
    pub fn push_bytes(&mut self, data: &[u8], now: Instant) {
        if data.is_empty() {
            return;
        }
        self.last_byte = Some(now);
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > MAX_BUFFER_LEN {
            warn!(
                "Discarding {} buffered bytes without terminator",
                self.buffer.len()
            );
            self.clear();
        }
    }

    /// Take the next complete request, without its terminator
    pub fn next_command(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.terminator.is_empty() {
            // Without terminator and timeout every read is one request
            if self.readtimeout.is_zero() {
                return Some(self.take());
            }
            return None;
        }

        let pos = self
            .buffer
            .windows(self.terminator.len())
            .position(|w| w == self.terminator.as_slice())?;
        let command = self.buffer[..pos].to_vec();
        self.buffer.drain(..pos + self.terminator.len());
        Some(command)
    }

    /// When the buffered bytes time out, if ever
    ///
    /// Every received byte restarts the timer.
    pub fn deadline(&self) -> Option<Instant> {
        if self.buffer.is_empty() || self.readtimeout.is_zero() {
            return None;
        }
        self.last_byte.map(|t| t + self.readtimeout)
    }

    /// Handle an elapsed deadline
    pub fn poll_timeout(&mut self, now: Instant) -> Option<FramerEvent> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        let bytes = self.take();
        if self.terminator.is_empty() {
            Some(FramerEvent::Command(bytes))
        } else {
            Some(FramerEvent::Timeout { discarded: bytes })
        }
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_byte = None;
    }

    fn take(&mut self) -> Vec<u8> {
        let bytes = std::mem::take(&mut self.buffer);
        self.clear();
        bytes
    }
}
