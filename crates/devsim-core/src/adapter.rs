//! Protocol adapters
//!
//! An adapter exposes the device through one protocol (line-based stream,
//! Modbus, ...). Adapters own their listening sockets and connection tasks;
//! every request they receive is executed on the simulation through a
//! [`SimulationHandle`], so the device never sees concurrent access.
//!
//! Connecting and disconnecting is independent of pausing the simulation and
//! never touches device state.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::device::Device;
use crate::error::{AdapterError, DeviceError};
use crate::registry::{Arity, Registry};
use crate::simulation::SimulationHandle;
use crate::value::{FromValue, Value};

/// A protocol front end
pub trait Adapter<D: Device>: Send {
    /// Protocol identifier, unique within a collection
    fn protocol(&self) -> &str;

    /// Bind listeners and spawn connection handling
    ///
    /// Called from within the simulation task, so implementations may spawn
    /// onto the current tokio runtime but must not block.
    fn start(&mut self, simulation: SimulationHandle<D>) -> Result<(), AdapterError>;

    /// Close listeners and abort all connection tasks
    fn stop(&mut self);

    /// Whether the adapter is currently accepting connections
    fn is_running(&self) -> bool;

    /// Adapter options (bind address, port, terminators, ...)
    fn options(&self) -> BTreeMap<String, Value>;

    /// Human readable description of the protocol interface
    fn documentation(&self) -> String {
        String::new()
    }
}

/// The adapters attached to a simulation, keyed by protocol
pub struct AdapterCollection<D: Device> {
    adapters: BTreeMap<String, Box<dyn Adapter<D>>>,
    simulation: Option<SimulationHandle<D>>,
}

impl<D: Device> Default for AdapterCollection<D> {
    fn default() -> Self {
        Self {
            adapters: BTreeMap::new(),
            simulation: None,
        }
    }
}

impl<D: Device> AdapterCollection<D> {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an adapter; protocols must be unique
    pub fn add(&mut self, adapter: Box<dyn Adapter<D>>) -> Result<(), AdapterError> {
        let protocol = adapter.protocol().to_string();
        if self.adapters.contains_key(&protocol) {
            return Err(AdapterError::DuplicateProtocol(protocol));
        }
        self.adapters.insert(protocol, adapter);
        Ok(())
    }

    /// Registered protocols, sorted
    pub fn protocols(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Whether no adapters are registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Give the collection the handle adapters use to reach the simulation
    pub(crate) fn attach(&mut self, simulation: SimulationHandle<D>) {
        self.simulation = Some(simulation);
    }

    /// Drop the handle so no adapter can be started any more
    pub(crate) fn detach(&mut self) {
        self.simulation = None;
    }

    /// Resolve a protocol selection; an empty selection means all adapters
    fn select(&self, protocols: &[String]) -> Result<Vec<String>, AdapterError> {
        if protocols.is_empty() {
            return Ok(self.protocols());
        }
        let unknown: Vec<String> = protocols
            .iter()
            .filter(|p| !self.adapters.contains_key(*p))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(AdapterError::UnknownProtocols(unknown));
        }
        Ok(protocols.to_vec())
    }

    /// Start the selected adapters; already running adapters are left alone
    pub fn connect(&mut self, protocols: &[String]) -> Result<(), AdapterError> {
        let selected = self.select(protocols)?;
        let simulation = self.simulation.clone().ok_or(AdapterError::NotAttached)?;
        for protocol in selected {
            if let Some(adapter) = self.adapters.get_mut(&protocol) {
                if adapter.is_running() {
                    debug!("Adapter '{}' already connected", protocol);
                    continue;
                }
                adapter.start(simulation.clone())?;
                info!("Connected adapter '{}'", protocol);
            }
        }
        Ok(())
    }

    /// Stop the selected adapters; stopped adapters are left alone
    pub fn disconnect(&mut self, protocols: &[String]) -> Result<(), AdapterError> {
        for protocol in self.select(protocols)? {
            if let Some(adapter) = self.adapters.get_mut(&protocol) {
                if !adapter.is_running() {
                    debug!("Adapter '{}' already disconnected", protocol);
                    continue;
                }
                adapter.stop();
                info!("Disconnected adapter '{}'", protocol);
            }
        }
        Ok(())
    }

    /// Connection status per selected protocol
    pub fn is_connected(&self, protocols: &[String]) -> Result<BTreeMap<String, bool>, AdapterError> {
        Ok(self
            .select(protocols)?
            .into_iter()
            .filter_map(|p| self.adapters.get(&p).map(|a| (p, a.is_running())))
            .collect())
    }

    /// Options per selected protocol
    pub fn configuration(
        &self,
        protocols: &[String],
    ) -> Result<BTreeMap<String, BTreeMap<String, Value>>, AdapterError> {
        Ok(self
            .select(protocols)?
            .into_iter()
            .filter_map(|p| self.adapters.get(&p).map(|a| (p, a.options())))
            .collect())
    }

    /// Concatenated documentation of the selected adapters
    pub fn documentation(&self, protocols: &[String]) -> Result<String, AdapterError> {
        let docs: Vec<String> = self
            .select(protocols)?
            .into_iter()
            .filter_map(|p| self.adapters.get(&p).map(|a| (p, a.documentation())))
            .map(|(p, doc)| format!("{}\n{}\n\n{}", p, "=".repeat(p.len()), doc))
            .collect();
        Ok(docs.join("\n\n"))
    }

    /// Members exposed on the control plane as the `interface` object
    pub fn members() -> Registry<Self> {
        Registry::new("AdapterCollection")
            .read_only("protocols", |c: &Self| c.protocols())
            .method("connect", Arity::Variadic, |c: &mut Self, args| {
                c.connect(&protocol_args(args)?).map_err(to_device_error)?;
                Ok(Value::Null)
            })
            .method("disconnect", Arity::Variadic, |c: &mut Self, args| {
                c.disconnect(&protocol_args(args)?).map_err(to_device_error)?;
                Ok(Value::Null)
            })
            .method("is_connected", Arity::Variadic, |c: &mut Self, args| {
                c.is_connected(&protocol_args(args)?)
                    .map(Value::from)
                    .map_err(to_device_error)
            })
            .method("configuration", Arity::Variadic, |c: &mut Self, args| {
                c.configuration(&protocol_args(args)?)
                    .map(Value::from)
                    .map_err(to_device_error)
            })
            .method("documentation", Arity::Variadic, |c: &mut Self, args| {
                c.documentation(&protocol_args(args)?)
                    .map(Value::from)
                    .map_err(to_device_error)
            })
    }
}

fn protocol_args(args: Vec<Value>) -> Result<Vec<String>, DeviceError> {
    args.into_iter().map(String::from_value).collect()
}

fn to_device_error(err: AdapterError) -> DeviceError {
    DeviceError::InvalidArgument(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl Device for Dummy {
        fn members() -> Registry<Self> {
            Registry::new("Dummy")
        }
    }

    struct FakeAdapter {
        protocol: &'static str,
        running: bool,
        starts: usize,
    }

    impl Adapter<Dummy> for FakeAdapter {
        fn protocol(&self) -> &str {
            self.protocol
        }

        fn start(&mut self, _simulation: SimulationHandle<Dummy>) -> Result<(), AdapterError> {
            self.running = true;
            self.starts += 1;
            Ok(())
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn options(&self) -> BTreeMap<String, Value> {
            BTreeMap::from([("port".to_string(), Value::Int(1))])
        }
    }

    fn collection() -> AdapterCollection<Dummy> {
        let mut c = AdapterCollection::new();
        for protocol in ["modbus", "stream"] {
            c.add(Box::new(FakeAdapter {
                protocol,
                running: false,
                starts: 0,
            }))
            .unwrap();
        }
        c
    }

    #[test]
    fn test_duplicate_protocol_rejected() {
        let mut c = collection();
        let err = c.add(Box::new(FakeAdapter {
            protocol: "stream",
            running: false,
            starts: 0,
        }));
        assert!(matches!(err, Err(AdapterError::DuplicateProtocol(_))));
    }

    #[test]
    fn test_connect_requires_attached_simulation() {
        let mut c = collection();
        assert!(matches!(c.connect(&[]), Err(AdapterError::NotAttached)));
    }

    #[test]
    fn test_unknown_protocols_reported() {
        let c = collection();
        let err = c.is_connected(&["serial".to_string()]).unwrap_err();
        assert!(matches!(err, AdapterError::UnknownProtocols(ref p) if p == &["serial"]));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut c = collection();
        c.disconnect(&[]).unwrap();
        c.disconnect(&["stream".to_string()]).unwrap();
        let status = c.is_connected(&[]).unwrap();
        assert_eq!(status.get("stream"), Some(&false));
        assert_eq!(status.get("modbus"), Some(&false));
    }

    #[test]
    fn test_configuration_listing() {
        let c = collection();
        let config = c.configuration(&["modbus".to_string()]).unwrap();
        assert_eq!(config.len(), 1);
        assert_eq!(config["modbus"]["port"], Value::Int(1));
    }

    #[test]
    fn test_members_listing() {
        let registry = AdapterCollection::<Dummy>::members();
        assert!(registry.contains("connect"));
        assert!(registry.api().contains(&"protocols:get".to_string()));
    }
}
