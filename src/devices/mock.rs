use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::{ConnectionParams, DeviceReader, LogShape, Reading};
use crate::error::Result;

pub const DEVICE_TYPE: &str = "mock";

/// Range of the randomized instantaneous draw, in W.
pub const DRAW_RANGE: std::ops::Range<i64> = 20..250;
/// Range of the randomized energy counter, in kWh.
pub const TOTAL_RANGE: std::ops::Range<i64> = 1..5;

/// Simulated plug producing random readings without any I/O.
pub struct MockPlug {
    rng: StdRng,
    shape: LogShape,
}

impl MockPlug {
    pub fn new() -> Self {
        MockPlug {
            rng: StdRng::from_entropy(),
            shape: LogShape::Full,
        }
    }

    /// Honors `"single_value": true` to emit two-column logs.
    pub fn from_params(params: &ConnectionParams) -> Self {
        let single = params
            .get("single_value")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mut plug = MockPlug::new();
        if single {
            info!("Mock plug configured for single-value readings");
            plug.shape = LogShape::DrawOnly;
        }
        plug
    }
}

impl Default for MockPlug {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceReader for MockPlug {
    fn read(&mut self) -> Result<Reading> {
        let draw = self.rng.gen_range(DRAW_RANGE) as f64;
        let total = self.rng.gen_range(TOTAL_RANGE) as f64;
        Ok(Reading::new(draw, total))
    }

    fn shape(&self) -> LogShape {
        self.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn readings_stay_in_declared_ranges() {
        let mut plug = MockPlug::new();
        for _ in 0..500 {
            let reading = plug.read().unwrap();
            assert!((20.0..250.0).contains(&reading.instantaneous_draw));
            assert!((1.0..5.0).contains(&reading.cumulative_draw));
            assert!(reading.extra.is_none());
        }
    }

    #[test]
    fn single_value_param_switches_shape() {
        let params = json!({ "device_type": "mock", "single_value": true });
        let plug = MockPlug::from_params(params.as_object().unwrap());
        assert_eq!(plug.shape(), LogShape::DrawOnly);

        let plug = MockPlug::from_params(&ConnectionParams::new());
        assert_eq!(plug.shape(), LogShape::Full);
    }
}
