//! Device simulation runtime
//!
//! This crate provides the protocol independent core of the device simulator:
//! the device contract, cycle-driven state machines and the simulation task
//! that advances simulated time and serializes all access to the device.
//!
//! # Architecture
//!
//! - [`Device`] is implemented by every simulated device. Its [`Registry`]
//!   lists the properties and methods protocol front ends may use.
//! - [`StateMachine`] drives devices whose behaviour is modelled as states
//!   with entry, exit and per-cycle handlers. [`StateMachineDevice`] pairs a
//!   machine with the data it operates on.
//! - [`Simulation`] owns the device and runs as a single tokio task. Adapters
//!   and the control plane talk to it through a cloneable [`SimulationHandle`];
//!   their requests run between cycles, never concurrently with one.
//! - [`Adapter`] is implemented by protocol front ends (see the stream and
//!   Modbus crates); [`AdapterCollection`] manages them at runtime.

pub mod adapter;
pub mod approaches;
pub mod device;
pub mod error;
pub mod registry;
pub mod setup;
pub mod simulation;
pub mod statemachine;
pub mod value;

pub use adapter::{Adapter, AdapterCollection};
pub use device::Device;
pub use error::{
    AdapterError, DeviceError, MemberError, SimulationError, StateEvent, StateMachineError,
};
pub use registry::{Arity, Member, Registry};
pub use setup::{Setups, DEFAULT_SETUP};
pub use simulation::{
    Simulation, SimulationConfig, SimulationHandle, SimulationStatus, DEFAULT_CYCLE_DELAY,
};
pub use statemachine::{DeviceContext, Handlers, State, StateMachine, StateMachineDevice};
pub use value::{FromValue, Value};
