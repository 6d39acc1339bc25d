//! Line protocol front end
//!
//! This crate exposes a device through a text protocol over TCP. Requests are
//! matched against regular expressions or scanf-style formats; capture groups
//! become arguments of a device method or the value of a property write.
//!
//! # Architecture
//!
//! - [`Cmd`] and [`Var`] bind patterns to members, [`CmdBuilder`] generates
//!   regular expressions for the common cases.
//! - [`StreamInterface`] collects commands, terminators, the read timeout and
//!   the error handler for one device type.
//! - [`Dispatcher`] validates the bindings once and turns requests into
//!   replies.
//! - [`StreamFramer`] cuts the byte stream of a connection into requests.
//! - [`StreamAdapter`] serves the interface over TCP.
//!
//! # Example
//!
//! ```rust
//! use devsim_core::{Device, Registry};
//! use devsim_stream::{Cmd, Dispatcher, StreamInterface, Var};
//!
//! #[derive(Default)]
//! struct Lamp {
//!     level: i64,
//! }
//!
//! impl Device for Lamp {
//!     fn members() -> Registry<Self> {
//!         Registry::new("Lamp")
//!             .read_write("level", |l: &Lamp| l.level, |l, v: i64| {
//!                 l.level = v;
//!                 Ok(())
//!             })
//!             .method0("reset", |l: &mut Lamp| {
//!                 l.level = 0;
//!                 Ok("OK")
//!             })
//!     }
//! }
//!
//! let interface = StreamInterface::<Lamp>::new()
//!     .command(Var::new("level").read_scanf("L?").write_scanf("L=%d"))
//!     .command(Cmd::new("reset", "^RST$"));
//! let dispatcher = Dispatcher::bind(&interface).unwrap();
//!
//! let mut lamp = Lamp::default();
//! assert_eq!(dispatcher.process(&mut lamp, b"L=3"), None);
//! assert_eq!(dispatcher.process(&mut lamp, b"L?").as_deref(), Some("3"));
//! assert_eq!(dispatcher.process(&mut lamp, b"RST").as_deref(), Some("OK"));
//! ```

pub mod adapter;
pub mod builder;
pub mod command;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod interface;
pub mod pattern;

pub use adapter::{StreamAdapter, StreamOptions, PROTOCOL};
pub use builder::CmdBuilder;
pub use command::{mapping, ArgumentMapping, Cmd, Command, ReturnMapping, Var};
pub use dispatch::{dispatch, Dispatcher, PreparedCall};
pub use error::{BindingError, StreamError};
pub use framing::{FramerEvent, StreamFramer};
pub use interface::{ErrorHandler, StreamInterface, DEFAULT_READ_TIMEOUT, DEFAULT_TERMINATOR};
pub use pattern::{Conversion, Pattern, PatternKind, PatternSource};
