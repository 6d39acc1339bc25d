//! Control plane for running simulations
//!
//! A [`ControlServer`] exposes three objects of a running simulation over
//! newline-delimited JSON-RPC 2.0 on TCP:
//!
//! - `device`: the members of the simulated device
//! - `simulation`: speed, cycle delay, pause/resume, setups and statistics
//! - `interface`: the adapter collection (connect, disconnect, documentation)
//!
//! Method names follow `object.member` for calls, `object.member:get` and
//! `object.member:set` for properties, `object:api` for listings and
//! `get_objects` for the object names. [`ControlClient`] and
//! [`blocking::ControlClient`] wrap the protocol.
//!
//! ```text
//! -> {"jsonrpc":"2.0","id":1,"method":"device.speed:set","params":[2.5]}
//! <- {"jsonrpc":"2.0","id":1,"result":null}
//! -> {"jsonrpc":"2.0","id":2,"method":"simulation.pause","params":[]}
//! <- {"jsonrpc":"2.0","id":2,"result":null}
//! ```

pub mod blocking;
pub mod client;
pub mod error;
pub mod object;
pub mod server;
pub mod wire;

pub use client::{ControlClient, ObjectApi, ObjectProxy, DEFAULT_TIMEOUT};
pub use error::{ClientError, ControlError};
pub use object::{Accessor, Exposed, ObjectName, Target, API_SUFFIX, GET_OBJECTS};
pub use server::{handle_line, ControlOptions, ControlServer};
pub use wire::{ApiListing, ErrorData, Request, Response, RpcError, JSONRPC_VERSION, MAX_LINE_LEN};
