use serde::{Deserialize, Serialize};

use crate::devices::Reading;

/// Row of a three-column log: `timestamp,current_draw,total_draw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerRecord {
    pub timestamp: f64, // unix seconds
    pub current_draw: f64, // W
    pub total_draw: f64, // kWh
}

/// Row of a two-column log: `timestamp,draw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub timestamp: f64,
    pub draw: f64,
}

impl From<&Reading> for PowerRecord {
    fn from(reading: &Reading) -> Self {
        PowerRecord {
            timestamp: reading.timestamp,
            current_draw: reading.instantaneous_draw,
            total_draw: reading.cumulative_draw,
        }
    }
}

impl From<&Reading> for DrawRecord {
    fn from(reading: &Reading) -> Self {
        DrawRecord {
            timestamp: reading.timestamp,
            draw: reading.instantaneous_draw,
        }
    }
}
