//! Object paths and member access
//!
//! Three objects are exposed: `device`, `simulation` and `interface` (the
//! adapter collection). Method names address them as `object.member` for
//! calls, `object.member:get` / `object.member:set` for properties and
//! `object:api` for listings.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use devsim_core::{AdapterCollection, Device, Registry, Simulation, Value};

use crate::error::ControlError;

/// Method listing the exposed object names
pub const GET_OBJECTS: &str = "get_objects";

/// Suffix of listing methods
pub const API_SUFFIX: &str = ":api";

/// An exposed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectName {
    /// The simulated device
    Device,
    /// The simulation
    Simulation,
    /// The adapter collection
    Interface,
}

impl ObjectName {
    /// All exposed objects
    pub const ALL: [ObjectName; 3] = [ObjectName::Device, ObjectName::Simulation, ObjectName::Interface];

    /// Look up an object by name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "device" => Some(ObjectName::Device),
            "simulation" => Some(ObjectName::Simulation),
            "interface" => Some(ObjectName::Interface),
            _ => None,
        }
    }

    /// Object name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectName::Device => "device",
            ObjectName::Simulation => "simulation",
            ObjectName::Interface => "interface",
        }
    }
}

impl fmt::Display for ObjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a member is accessed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessor {
    /// Method call
    Call,
    /// Property read
    Get,
    /// Property write
    Set,
}

/// What a JSON-RPC method name refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `get_objects`
    Objects,
    /// `:api` on the collection itself
    CollectionApi,
    /// `object:api`
    Api(ObjectName),
    /// `object.member[:get|:set]`
    Member {
        /// Object
        object: ObjectName,
        /// Member name
        member: String,
        /// Access kind
        accessor: Accessor,
    },
}

impl Target {
    /// Parse a JSON-RPC method name
    pub fn parse(method: &str) -> Result<Self, ControlError> {
        let not_found = || ControlError::MethodNotFound(method.to_string());

        if method == GET_OBJECTS {
            return Ok(Target::Objects);
        }
        if let Some(object) = method.strip_suffix(API_SUFFIX) {
            if object.is_empty() {
                return Ok(Target::CollectionApi);
            }
            return ObjectName::parse(object).map(Target::Api).ok_or_else(not_found);
        }

        let (object, rest) = method.split_once('.').ok_or_else(not_found)?;
        let object = ObjectName::parse(object).ok_or_else(not_found)?;
        let (member, accessor) = match rest.rsplit_once(':') {
            Some((member, "get")) => (member, Accessor::Get),
            Some((member, "set")) => (member, Accessor::Set),
            Some(_) => return Err(not_found()),
            None => (rest, Accessor::Call),
        };
        if member.is_empty() {
            return Err(not_found());
        }
        Ok(Target::Member {
            object,
            member: member.to_string(),
            accessor,
        })
    }
}

/// Member tables of the exposed objects
pub struct Exposed<D: Device> {
    simulation: Arc<Registry<Simulation<D>>>,
    interface: Arc<Registry<AdapterCollection<D>>>,
}

impl<D: Device> Clone for Exposed<D> {
    fn clone(&self) -> Self {
        Self {
            simulation: Arc::clone(&self.simulation),
            interface: Arc::clone(&self.interface),
        }
    }
}

impl<D: Device> Default for Exposed<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> fmt::Debug for Exposed<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exposed")
            .field("simulation", &self.simulation.class())
            .field("interface", &self.interface.class())
            .finish()
    }
}

impl<D: Device> Exposed<D> {
    /// Build the simulation and adapter member tables
    pub fn new() -> Self {
        Self {
            simulation: Arc::new(Simulation::<D>::members()),
            interface: Arc::new(AdapterCollection::<D>::members()),
        }
    }

    /// Resolve `target` against a simulation; runs on the simulation task
    pub fn resolve(
        &self,
        sim: &mut Simulation<D>,
        target: &Target,
        params: Vec<Value>,
    ) -> Result<Value, ControlError> {
        match target {
            Target::Objects => {
                no_params(&params)?;
                Ok(Value::from(
                    ObjectName::ALL.iter().map(|o| o.as_str()).collect::<Vec<_>>(),
                ))
            }
            Target::CollectionApi => {
                no_params(&params)?;
                let device = sim.registry();
                let mut methods = vec![GET_OBJECTS.to_string()];
                for object in ObjectName::ALL {
                    methods.push(format!("{}{}", object, API_SUFFIX));
                    let api = match object {
                        ObjectName::Device => device.api(),
                        ObjectName::Simulation => self.simulation.api(),
                        ObjectName::Interface => self.interface.api(),
                    };
                    methods.extend(api.into_iter().map(|m| format!("{}.{}", object, m)));
                }
                Ok(listing("ObjectCollection", methods))
            }
            Target::Api(object) => {
                no_params(&params)?;
                Ok(match object {
                    ObjectName::Device => {
                        let registry = sim.registry();
                        listing(registry.class(), registry.api())
                    }
                    ObjectName::Simulation => listing(self.simulation.class(), self.simulation.api()),
                    ObjectName::Interface => listing(self.interface.class(), self.interface.api()),
                })
            }
            Target::Member {
                object,
                member,
                accessor,
            } => {
                let value = match object {
                    ObjectName::Device => {
                        let registry = sim.registry();
                        access(&registry, sim.device_mut(), member, *accessor, params)?
                    }
                    ObjectName::Simulation => {
                        access(&self.simulation, sim, member, *accessor, params)?
                    }
                    ObjectName::Interface => {
                        access(&self.interface, sim.adapters_mut(), member, *accessor, params)?
                    }
                };
                if !value.is_wire_safe() {
                    return Err(ControlError::NonFinite {
                        attribute: format!("{}.{}", object, member),
                    });
                }
                Ok(value)
            }
        }
    }
}

fn no_params(params: &[Value]) -> Result<(), ControlError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(ControlError::InvalidParams(format!(
            "expected no parameters, got {}",
            params.len()
        )))
    }
}

fn access<T: 'static>(
    registry: &Registry<T>,
    target: &mut T,
    member: &str,
    accessor: Accessor,
    params: Vec<Value>,
) -> Result<Value, ControlError> {
    match accessor {
        Accessor::Call => Ok(registry.call(target, member, params)?),
        Accessor::Get => {
            no_params(&params)?;
            Ok(registry.get(target, member)?)
        }
        Accessor::Set => {
            let [value]: [Value; 1] = params.try_into().map_err(|p: Vec<Value>| {
                ControlError::InvalidParams(format!("expected one value, got {}", p.len()))
            })?;
            registry.set(target, member, value)?;
            Ok(Value::Null)
        }
    }
}

fn listing(class: &str, methods: Vec<String>) -> Value {
    Value::Map(BTreeMap::from([
        ("class".to_string(), Value::from(class)),
        ("methods".to_string(), Value::from(methods)),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(Target::parse("get_objects").unwrap(), Target::Objects);
        assert_eq!(Target::parse(":api").unwrap(), Target::CollectionApi);
        assert_eq!(
            Target::parse("simulation:api").unwrap(),
            Target::Api(ObjectName::Simulation)
        );
        assert_eq!(
            Target::parse("device.speed:set").unwrap(),
            Target::Member {
                object: ObjectName::Device,
                member: "speed".into(),
                accessor: Accessor::Set,
            }
        );
        assert_eq!(
            Target::parse("interface.connect").unwrap(),
            Target::Member {
                object: ObjectName::Interface,
                member: "connect".into(),
                accessor: Accessor::Call,
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for method in ["", "device", "motor.speed", "device.", "device.speed:del", "nope:api"] {
            let err = Target::parse(method).unwrap_err();
            assert_eq!(err.code(), crate::error::METHOD_NOT_FOUND, "{}", method);
        }
    }
}
