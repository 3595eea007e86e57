//! Polls smart plugs at a fixed cadence and logs their readings to
//! time-rotated CSV files, with a reader for cost and carbon reports.

pub mod devices;
pub mod error;
pub mod measurement;
pub mod report;
pub mod settings;

pub use devices::{ConnectionParams, DeviceReader, DeviceRegistry, LogShape, Reading};
pub use error::{LoggerError, Result};
pub use measurement::{
    LoopSummary, MeasurementSession, RetryPolicy, SessionConfig, SessionGuard, StopSignal, WorkerState,
};
pub use settings::{DeviceSettings, DeviceSettingsStore, MonitorSettings};
