//! Named device setups
//!
//! A setup is a factory producing a fresh device in a particular initial
//! configuration. The simulation starts from one setup and can switch to
//! another at runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{DeviceError, SimulationError};

/// Name of the setup used when none is specified
pub const DEFAULT_SETUP: &str = "default";

/// Device factory
pub type Factory<D> = Arc<dyn Fn() -> Result<D, DeviceError> + Send + Sync>;

/// Name → factory table
pub struct Setups<D> {
    factories: BTreeMap<String, Factory<D>>,
}

impl<D> Default for Setups<D> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<D> fmt::Debug for Setups<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setups")
            .field("names", &self.names())
            .finish()
    }
}

impl<D> Setups<D> {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a setup; an existing setup with the same name is replaced
    pub fn with<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn() -> Result<D, DeviceError> + Send + Sync + 'static,
    {
        if self.factories.insert(name.to_string(), Arc::new(factory)).is_some() {
            warn!("Setup '{}' defined twice, keeping the last one", name);
        }
        self
    }

    /// Add the `default` setup
    pub fn with_default<F>(self, factory: F) -> Self
    where
        F: Fn() -> Result<D, DeviceError> + Send + Sync + 'static,
    {
        self.with(DEFAULT_SETUP, factory)
    }

    /// Whether a setup exists
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Setup names, sorted
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Build a device from the named setup
    pub fn create(&self, name: &str) -> Result<D, SimulationError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SimulationError::UnknownSetup(name.to_string()))?;
        factory().map_err(|source| SimulationError::Setup {
            name: name.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_named_setup() {
        let setups = Setups::new()
            .with_default(|| Ok(1u32))
            .with("other", || Ok(2u32));
        assert_eq!(setups.create("default").unwrap(), 1);
        assert_eq!(setups.create("other").unwrap(), 2);
        assert_eq!(setups.names(), vec!["default", "other"]);
    }

    #[test]
    fn test_unknown_and_failing_setups() {
        let setups: Setups<u32> = Setups::new()
            .with("broken", || Err(DeviceError::Other("no hardware".into())));
        assert!(matches!(
            setups.create("missing"),
            Err(SimulationError::UnknownSetup(_))
        ));
        assert!(matches!(
            setups.create("broken"),
            Err(SimulationError::Setup { .. })
        ));
    }
}
