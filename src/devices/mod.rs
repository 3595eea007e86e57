pub mod mock;
pub mod shelly;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{LoggerError, Result};

pub use mock::MockPlug;
pub use shelly::ShellyPlug;

/// Connection parameters for one device, as stored in the settings file.
pub type ConnectionParams = Map<String, Value>;

/// One sample taken from a smart plug.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Unix seconds.
    pub timestamp: f64,
    /// Power draw in W at the time of the sample.
    pub instantaneous_draw: f64,
    /// Energy counter in kWh.
    pub cumulative_draw: f64,
    pub extra: Option<Map<String, Value>>,
}

impl Reading {
    pub fn new(instantaneous_draw: f64, cumulative_draw: f64) -> Self {
        Reading {
            timestamp: unix_now(),
            instantaneous_draw,
            cumulative_draw,
            extra: None,
        }
    }
}

/// Which columns a device's log files carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogShape {
    /// `timestamp,current_draw,total_draw`
    Full,
    /// `timestamp,draw` for devices that only report one metric.
    DrawOnly,
}

impl LogShape {
    pub fn header(&self) -> &'static [&'static str] {
        match self {
            LogShape::Full => &["timestamp", "current_draw", "total_draw"],
            LogShape::DrawOnly => &["timestamp", "draw"],
        }
    }
}

/// Produces one [`Reading`] per call.
///
/// Implementations must return either a complete reading or an error, and
/// must bound their own I/O; the polling loop does not time them out.
pub trait DeviceReader: Send {
    fn read(&mut self) -> Result<Reading>;

    fn shape(&self) -> LogShape {
        LogShape::Full
    }
}

type ReaderFactory = dyn Fn(&str, &ConnectionParams) -> Result<Box<dyn DeviceReader>> + Send + Sync;

/// Maps a `device_type` tag to a reader constructor.
#[derive(Clone)]
pub struct DeviceRegistry {
    factories: HashMap<String, Arc<ReaderFactory>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in `mock` and `shelly` readers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(mock::DEVICE_TYPE, |_, params| {
            Ok(Box::new(MockPlug::from_params(params)) as Box<dyn DeviceReader>)
        });
        registry.register(shelly::DEVICE_TYPE, |name, params| {
            Ok(Box::new(ShellyPlug::from_params(name, params)?) as Box<dyn DeviceReader>)
        });
        registry
    }

    pub fn register<F>(&mut self, device_type: &str, factory: F)
    where
        F: Fn(&str, &ConnectionParams) -> Result<Box<dyn DeviceReader>> + Send + Sync + 'static,
    {
        debug!("Registering device reader for type '{}'", device_type);
        self.factories.insert(device_type.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, device_type: &str) -> bool {
        self.factories.contains_key(device_type)
    }

    /// Builds a reader for `device_name`, failing with a configuration error
    /// when nothing is registered under `device_type`.
    pub fn create(
        &self,
        device_type: &str,
        device_name: &str,
        params: &ConnectionParams,
    ) -> Result<Box<dyn DeviceReader>> {
        let factory = self.factories.get(device_type).ok_or_else(|| {
            LoggerError::Configuration(format!(
                "No device reader registered for type '{}' (device {})",
                device_type, device_name
            ))
        })?;
        factory(device_name, params)
    }

    pub fn device_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Current wall-clock time in unix seconds, microsecond resolution.
pub fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl DeviceReader for Fixed {
        fn read(&mut self) -> Result<Reading> {
            Ok(Reading::new(42.0, 1.5))
        }
    }

    #[test]
    fn default_registry_knows_builtin_types() {
        let registry = DeviceRegistry::with_defaults();
        assert_eq!(registry.device_types(), vec!["mock".to_string(), "shelly".to_string()]);
    }

    #[test]
    fn unknown_type_is_configuration_error() {
        let registry = DeviceRegistry::with_defaults();
        let err = registry
            .create("alien", "ufo", &ConnectionParams::new())
            .err()
            .unwrap();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("alien"));
    }

    #[test]
    fn custom_reader_can_be_registered() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.contains("fixed"));
        registry.register("fixed", |_, _| Ok(Box::new(Fixed) as Box<dyn DeviceReader>));
        assert!(registry.contains("fixed"));

        let mut reader = registry.create("fixed", "bench", &ConnectionParams::new()).unwrap();
        let reading = reader.read().unwrap();
        assert_eq!(reading.instantaneous_draw, 42.0);
        assert_eq!(reader.shape(), LogShape::Full);
    }

    #[test]
    fn headers_match_log_shape() {
        assert_eq!(LogShape::Full.header(), &["timestamp", "current_draw", "total_draw"]);
        assert_eq!(LogShape::DrawOnly.header(), &["timestamp", "draw"]);
    }
}
