//! Runner settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use devsim_control::ControlOptions;
use devsim_core::{SimulationConfig, DEFAULT_SETUP};
use devsim_modbus::ModbusOptions;
use devsim_stream::StreamOptions;
use serde::{Deserialize, Serialize};

/// Environment variable naming the settings file
pub const CONFIG_ENV: &str = "DEVSIM_CONFIG";

/// Simulation parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationSettings {
    /// Setup to start from
    pub setup: String,
    /// Simulated seconds per real second
    pub speed: f64,
    /// Real time between cycles in milliseconds
    pub cycle_delay_ms: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            setup: DEFAULT_SETUP.to_string(),
            speed: 1.0,
            cycle_delay_ms: 100,
        }
    }
}

impl SimulationSettings {
    /// Core simulation configuration
    pub fn config(&self) -> SimulationConfig {
        SimulationConfig {
            setup: self.setup.clone(),
            speed: self.speed,
            cycle_delay: Duration::from_millis(self.cycle_delay_ms),
        }
    }
}

/// Runner settings
///
/// A front end set to `null` is not started.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Simulation parameters
    pub simulation: SimulationSettings,
    /// Stream adapter listener
    pub stream: Option<StreamOptions>,
    /// Modbus adapter listener
    pub modbus: Option<ModbusOptions>,
    /// Control server listener
    pub control: Option<ControlOptions>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            simulation: SimulationSettings::default(),
            stream: Some(StreamOptions::default()),
            modbus: Some(ModbusOptions::default()),
            control: Some(ControlOptions::default()),
        }
    }
}

impl Settings {
    /// Default settings file, `<config dir>/devsim/settings.json`
    fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("devsim").join("settings.json"))
    }

    /// Load settings
    ///
    /// A file named by `DEVSIM_CONFIG` must exist. Without the variable the
    /// default file is used if present, otherwise the built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load_from(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load settings from a JSON file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        let settings = serde_json::from_str(&json)
            .with_context(|| format!("invalid settings in {}", path.display()))?;
        tracing::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{"simulation": {"speed": 4.0}, "stream": {"port": 10001}, "modbus": null}"#,
        )
        .unwrap();
        assert_eq!(settings.simulation.speed, 4.0);
        assert_eq!(settings.simulation.setup, "default");
        assert_eq!(settings.simulation.cycle_delay_ms, 100);

        let stream = settings.stream.unwrap();
        assert_eq!(stream.port, 10001);
        assert_eq!(stream.bind_address, "0.0.0.0");
        assert_eq!(settings.modbus, None);
        assert_eq!(settings.control, Some(ControlOptions::default()));
    }

    #[test]
    fn test_config_conversion() {
        let config = SimulationSettings {
            setup: "moving".into(),
            speed: 2.0,
            cycle_delay_ms: 20,
        }
        .config();
        assert_eq!(config.setup, "moving");
        assert_eq!(config.cycle_delay, Duration::from_millis(20));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("devsim-settings-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"control": {"port": 10123}}"#).unwrap();
        let settings = Settings::load_from(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(settings.control.unwrap().port, 10123);

        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let path = std::env::temp_dir().join(format!("devsim-invalid-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"simulation": {"speed": "fast"}}"#).unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(err.to_string().contains("invalid settings"), "{}", err);
    }
}
