use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoggerError {
    /// Unknown device name, or no reader registered for the device's type.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read device {device}: {message}")]
    DeviceRead { device: String, message: String },

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Malformed log file {}: {message}", path.display())]
    LogFormat { path: PathBuf, message: String },

    #[error("Failed to spawn measurement worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Measurement worker panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, LoggerError>;

impl LoggerError {
    pub fn device_read(device: &str, message: impl Into<String>) -> Self {
        LoggerError::DeviceRead {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LoggerError::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, LoggerError::Configuration(_))
    }
}
