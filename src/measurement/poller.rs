use std::path::PathBuf;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use super::rotation::RotatingLog;
use crate::devices::{DeviceReader, Reading, unix_now};
use crate::error::{LoggerError, Result};

/// Stop flag shared between a session and its worker.
///
/// Waiting on it doubles as the inter-poll sleep, so setting it wakes a
/// sleeping worker right away.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_set(&self) -> bool {
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `timeout`; returns true if the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.stopped.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Bounded retry for failed device reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per poll, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry; doubled for every further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Give up on the first failed read.
    pub fn fail_fast() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// What a finished polling loop produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub files_created: usize,
    pub rows_written: u64,
}

/// Everything one polling loop needs, moved onto the worker thread.
pub struct PollingLoop {
    pub device_name: String,
    pub reader: Box<dyn DeviceReader>,
    pub log_dir: PathBuf,
    pub poll_period: Duration,
    pub rotation_period: Duration,
    pub retry: RetryPolicy,
}

impl PollingLoop {
    /// Polls until `stop` is set or a read/write fails for good.
    pub fn run(mut self, stop: &StopSignal) -> Result<LoopSummary> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| LoggerError::filesystem(&self.log_dir, e))?;

        let mut log = RotatingLog::new(
            &self.log_dir,
            self.rotation_period.as_secs_f64(),
            unix_now(),
            self.reader.shape(),
        );
        info!(
            "Polling {} every {:?}, logging to {}",
            self.device_name,
            self.poll_period,
            self.log_dir.display()
        );

        let outcome = self.poll_until_stopped(&mut log, stop);
        let summary = LoopSummary {
            files_created: log.files_created(),
            rows_written: log.rows_written(),
        };
        match outcome {
            Ok(()) => {
                info!(
                    "Polling loop for {} stopped: {} file(s), {} row(s)",
                    self.device_name, summary.files_created, summary.rows_written
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    "Polling loop for {} terminated after {} row(s): {}",
                    self.device_name, summary.rows_written, e
                );
                Err(e)
            }
        }
    }

    fn poll_until_stopped(&mut self, log: &mut RotatingLog, stop: &StopSignal) -> Result<()> {
        while !stop.is_set() {
            log.prepare(unix_now())?;

            let Some(reading) = self.read_with_retry(stop)? else {
                break;
            };
            // A slow or retried read can finish in a later window.
            log.prepare(reading.timestamp)?;
            log.append(&reading)?;

            if stop.wait_timeout(self.poll_period) {
                break;
            }
        }
        Ok(())
    }

    /// `Ok(None)` means the stop signal arrived while backing off.
    fn read_with_retry(&mut self, stop: &StopSignal) -> Result<Option<Reading>> {
        let attempts = self.retry.max_attempts.max(1);
        let mut backoff = self.retry.backoff;
        let mut attempt = 1;
        loop {
            match self.reader.read() {
                Ok(reading) => return Ok(Some(reading)),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Read {}/{} from {} failed, retrying in {:?}: {}",
                        attempt, attempts, self.device_name, backoff, e
                    );
                    if stop.wait_timeout(backoff) {
                        return Ok(None);
                    }
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
