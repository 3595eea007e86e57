pub mod data;
pub mod poller;
pub mod rotation;

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::devices::DeviceRegistry;
use crate::error::{LoggerError, Result};
use crate::settings::{DeviceSettings, DeviceSettingsStore};
pub use poller::{LoopSummary, PollingLoop, RetryPolicy, StopSignal};

pub const DEFAULT_BASE_DIR: &str = "measurements";

/// Configuration for one logging session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device_name: String,
    pub experiment_label: Option<String>,
    pub poll_period: Duration,
    pub rotation_period: Duration,
    pub base_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Defaults: poll every 0.5 s, rotate every 300 s, log under `measurements/`.
    pub fn new(device_name: &str) -> Self {
        Self {
            device_name: device_name.to_string(),
            experiment_label: None,
            poll_period: Duration::from_millis(500),
            rotation_period: Duration::from_secs(300),
            base_dir: PathBuf::from(DEFAULT_BASE_DIR),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_experiment(mut self, label: &str) -> Self {
        self.experiment_label = Some(label.to_string());
        self
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = period;
        self
    }

    pub fn with_rotation_period(mut self, period: Duration) -> Self {
        self.rotation_period = period;
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// `<base>/<device>[/<experiment>]`
    pub fn log_dir(&self) -> PathBuf {
        let dir = self.base_dir.join(&self.device_name);
        match &self.experiment_label {
            Some(label) => dir.join(label),
            None => dir,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() {
            return Err(LoggerError::Configuration("Device name must not be empty".into()));
        }
        if self.rotation_period.is_zero() {
            return Err(LoggerError::Configuration("Rotation period must be positive".into()));
        }
        if let Some(label) = &self.experiment_label {
            if label.is_empty() || label.contains(|c: char| c == '/' || c == '\\') {
                return Err(LoggerError::Configuration(format!("Invalid experiment label '{}'", label)));
            }
        }
        Ok(())
    }
}

/// Liveness of a session's background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Never started, or stopped and joined.
    Idle,
    Running,
    /// The loop ended on its own, usually after an error; `stop()` reports it.
    Exited,
}

/// Owns one device's polling loop and the thread it runs on.
///
/// At most one worker exists per session. `start` and `stop` take `&mut self`,
/// so two callers can never race a liveness check against each other.
pub struct MeasurementSession {
    config: SessionConfig,
    device: DeviceSettings,
    registry: DeviceRegistry,
    stop: Arc<StopSignal>,
    worker: Option<JoinHandle<Result<LoopSummary>>>,
}

impl MeasurementSession {
    /// Fails with a configuration error if the device is unknown.
    pub fn new(config: SessionConfig, devices: &DeviceSettingsStore, registry: DeviceRegistry) -> Result<Self> {
        config.validate()?;
        let device = devices.device(&config.device_name)?.clone();
        info!(
            "Created measurement session for device {} ({}), experiment {:?}",
            config.device_name, device.device_type, config.experiment_label
        );
        Ok(Self {
            config,
            device,
            registry,
            stop: Arc::new(StopSignal::new()),
            worker: None,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        match &self.worker {
            None => WorkerState::Idle,
            Some(handle) if handle.is_finished() => WorkerState::Exited,
            Some(_) => WorkerState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Handle for stopping a foreground run from another thread.
    pub fn stop_handle(&self) -> Arc<StopSignal> {
        self.stop.clone()
    }

    /// Launches the polling loop on a background thread and returns at once.
    ///
    /// A no-op while a worker is alive. A worker that already exited is
    /// joined first; its error is logged, not returned.
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            WorkerState::Running => {
                info!("Logging already running for device {}", self.config.device_name);
                return Ok(());
            }
            WorkerState::Exited => {
                if let Err(e) = self.join_worker() {
                    warn!("Previous worker for {} had failed: {}", self.config.device_name, e);
                }
            }
            WorkerState::Idle => {}
        }

        let polling_loop = self.build_loop()?;
        self.stop.clear();
        let stop = self.stop.clone();
        let handle = thread::Builder::new()
            .name(format!("plugmeter-{}", self.config.device_name))
            .spawn(move || polling_loop.run(&stop))
            .map_err(LoggerError::Spawn)?;
        self.worker = Some(handle);

        info!(
            "Logging started for device {}, experiment {:?} with poll period {:?} and rotation period {:?}",
            self.config.device_name, self.config.experiment_label, self.config.poll_period, self.config.rotation_period
        );
        Ok(())
    }

    /// Signals the worker and blocks until it has exited. Once this returns no
    /// further rows are written. Returns `None` if nothing was running.
    pub fn stop(&mut self) -> Result<Option<LoopSummary>> {
        if self.worker.is_none() {
            return Ok(None);
        }
        self.stop.set();
        let summary = self.join_worker()?;
        info!("Logging stopped for device {}", self.config.device_name);
        Ok(Some(summary))
    }

    /// Starts logging and returns a guard that stops it when dropped.
    pub fn scoped(&mut self) -> Result<SessionGuard<'_>> {
        self.start()?;
        Ok(SessionGuard { session: self })
    }

    /// Runs the polling loop on the calling thread until stopped through
    /// [`stop_handle`](Self::stop_handle) or until it fails.
    ///
    /// A stop requested before the call is honored: the loop returns without
    /// polling.
    pub fn run_foreground(&mut self) -> Result<LoopSummary> {
        if self.is_running() {
            return Err(LoggerError::Configuration(format!(
                "Device {} is already being logged in the background",
                self.config.device_name
            )));
        }
        let polling_loop = self.build_loop()?;
        let outcome = polling_loop.run(&self.stop);
        self.stop.clear();
        outcome
    }

    fn build_loop(&self) -> Result<PollingLoop> {
        let reader = self
            .registry
            .create(&self.device.device_type, &self.config.device_name, &self.device.params)?;
        Ok(PollingLoop {
            device_name: self.config.device_name.clone(),
            reader,
            log_dir: self.config.log_dir(),
            poll_period: self.config.poll_period,
            rotation_period: self.config.rotation_period,
            retry: self.config.retry,
        })
    }

    /// The stop signal is consumed once the worker is gone, so the next run
    /// starts unsignalled.
    fn join_worker(&mut self) -> Result<LoopSummary> {
        let outcome = match self.worker.take() {
            Some(handle) => handle.join().map_err(|_| LoggerError::WorkerPanicked),
            None => Ok(Ok(LoopSummary::default())),
        };
        self.stop.clear();
        outcome?
    }
}

impl Drop for MeasurementSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Logging for device {} ended with error: {}", self.config.device_name, e);
        }
    }
}

/// Scoped logging: the worker is stopped on every exit path, including
/// early returns and panics.
pub struct SessionGuard<'a> {
    session: &'a mut MeasurementSession,
}

impl SessionGuard<'_> {
    /// Stops now and reports the worker's outcome.
    pub fn finish(mut self) -> Result<Option<LoopSummary>> {
        self.session.stop()
    }
}

impl Deref for SessionGuard<'_> {
    type Target = MeasurementSession;

    fn deref(&self) -> &MeasurementSession {
        self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut MeasurementSession {
        self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.session.stop() {
            error!("Logging for device {} ended with error: {}", self.session.config.device_name, e);
        }
    }
}
