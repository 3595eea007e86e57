//! Device registry input and report settings, both stored as JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::devices::ConnectionParams;
use crate::error::{LoggerError, Result};

pub const DEVICE_SETTINGS_FILE: &str = "settings.json";
pub const MONITOR_SETTINGS_FILE: &str = "monitor_settings.json";

/// One entry of `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub device_type: String,
    /// Everything besides `device_type`, handed to the reader as-is.
    #[serde(flatten)]
    pub params: ConnectionParams,
}

/// Known devices, keyed by device name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceSettingsStore {
    devices: BTreeMap<String, DeviceSettings>,
}

impl DeviceSettingsStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| LoggerError::filesystem(path, e))?;
        let store = Self::from_json(&raw)?;
        info!("Loaded {} device(s) from {}", store.devices.len(), path.display());
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| LoggerError::Settings(format!("Invalid device settings: {}", e)))
    }

    /// Looks up a device; unknown names are a configuration error.
    pub fn device(&self, name: &str) -> Result<&DeviceSettings> {
        self.devices.get(name).ok_or_else(|| {
            LoggerError::Configuration(format!("Device {} not found in device settings", name))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}

/// Pricing and emission factors used by the cost report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub cost_per_kwh: f64,
    pub currency: String,
    pub gco2e_per_kwh: f64,
    pub gco2e_per_kilometer_car: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            cost_per_kwh: 0.30,
            currency: "EUR".into(),
            gco2e_per_kwh: 380.0,
            gco2e_per_kilometer_car: 120.0,
        }
    }
}

impl MonitorSettings {
    /// Missing file falls back to defaults; a malformed one is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("{} not found, using default monitor settings", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|e| LoggerError::filesystem(path, e))?;
        serde_json::from_str(&raw).map_err(|e| LoggerError::Settings(format!("Invalid monitor settings: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: &str = r#"{
        "mock_plug": { "device_type": "mock" },
        "desk": { "device_type": "shelly", "device_ip": "192.168.1.20", "device_id": "shelly-desk" }
    }"#;

    #[test]
    fn connection_params_are_flattened() {
        let store = DeviceSettingsStore::from_json(SETTINGS).unwrap();
        let desk = store.device("desk").unwrap();
        assert_eq!(desk.device_type, "shelly");
        assert_eq!(desk.params["device_ip"], "192.168.1.20");
        assert!(!desk.params.contains_key("device_type"));
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["desk", "mock_plug"]);
    }

    #[test]
    fn unknown_device_is_configuration_error() {
        let store = DeviceSettingsStore::from_json(SETTINGS).unwrap();
        let err = store.device("fridge").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn entry_without_type_is_rejected() {
        let err = DeviceSettingsStore::from_json(r#"{"x": {"device_ip": "1.2.3.4"}}"#).unwrap_err();
        assert!(matches!(err, LoggerError::Settings(_)));
    }

    #[test]
    fn monitor_settings_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = MonitorSettings::load_or_default(dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, MonitorSettings::default());
    }
}
