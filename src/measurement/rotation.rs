//! Time-windowed CSV log files.
//!
//! A new file starts every rotation period, named after the nominal start of
//! its window. Files are created once with their header and afterwards only
//! ever opened in append mode.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::WriterBuilder;
use tracing::{debug, info};

use super::data::{DrawRecord, PowerRecord};
use crate::devices::{LogShape, Reading};
use crate::error::{LoggerError, Result};

pub struct RotatingLog {
    dir: PathBuf,
    period: f64,
    anchor: f64,
    shape: LogShape,
    files_created: usize,
    rows_written: u64,
}

impl RotatingLog {
    /// `anchor` is the start of the first window in unix seconds.
    pub fn new(dir: impl Into<PathBuf>, period_secs: f64, anchor: f64, shape: LogShape) -> Self {
        RotatingLog {
            dir: dir.into(),
            period: period_secs,
            anchor,
            shape,
            files_created: 0,
            rows_written: 0,
        }
    }

    pub fn anchor(&self) -> f64 {
        self.anchor
    }

    pub fn active_path(&self) -> PathBuf {
        file_for(&self.dir, self.anchor)
    }

    pub fn files_created(&self) -> usize {
        self.files_created
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Makes sure the file for the window containing `now` exists.
    ///
    /// The anchor moves forward one period per crossed boundary, so windows
    /// stay evenly spaced and a window that saw no polls still gets a
    /// header-only file.
    pub fn prepare(&mut self, now: f64) -> Result<PathBuf> {
        if !self.active_path().exists() {
            self.create_active()?;
        }
        while self.anchor + self.period <= now {
            self.anchor += self.period;
            info!("Rotating log to window starting at {}", self.anchor);
            self.create_active()?;
        }
        Ok(self.active_path())
    }

    /// Appends one row and flushes it before returning.
    pub fn append(&mut self, reading: &Reading) -> Result<()> {
        let path = self.active_path();
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| LoggerError::filesystem(&path, e))?;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        match self.shape {
            LogShape::Full => writer.serialize(PowerRecord::from(reading))?,
            LogShape::DrawOnly => writer.serialize(DrawRecord::from(reading))?,
        }
        writer.flush().map_err(|e| LoggerError::filesystem(&path, e))?;

        self.rows_written += 1;
        Ok(())
    }

    fn create_active(&mut self) -> Result<()> {
        let path = self.active_path();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LoggerError::filesystem(&path, e))?;
        write_header(file, self.shape, &path)?;
        self.files_created += 1;
        debug!("Created log file {}", path.display());
        Ok(())
    }
}

/// Microsecond precision keeps names the same width, so they sort lexically.
fn file_for(dir: &Path, anchor: f64) -> PathBuf {
    dir.join(format!("{:.6}.csv", anchor))
}

fn write_header(file: File, shape: LogShape, path: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(shape.header())?;
    writer.flush().map_err(|e| LoggerError::filesystem(path, e))
}
