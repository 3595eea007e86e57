//! Reading rotated logs back and turning them into energy, cost and carbon
//! figures.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::error::{LoggerError, Result};
use crate::measurement::data::{DrawRecord, PowerRecord};
use crate::settings::MonitorSettings;

const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// One logged sample; `total_draw` is absent for two-column logs.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: f64,
    pub draw: f64,
    pub total_draw: Option<f64>,
}

impl From<PowerRecord> for LogRecord {
    fn from(record: PowerRecord) -> Self {
        LogRecord {
            timestamp: record.timestamp,
            draw: record.current_draw,
            total_draw: Some(record.total_draw),
        }
    }
}

impl From<DrawRecord> for LogRecord {
    fn from(record: DrawRecord) -> Self {
        LogRecord {
            timestamp: record.timestamp,
            draw: record.draw,
            total_draw: None,
        }
    }
}

/// Reads one log file of either shape. An empty file yields no records.
pub fn read_log_file(path: impl AsRef<Path>) -> Result<Vec<LogRecord>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| LoggerError::filesystem(path, e))?;
    let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        debug!("Skipping empty log file {}", path.display());
        return Ok(Vec::new());
    }
    let has = |name: &str| headers.iter().any(|h| h == name);

    let malformed = |e: csv::Error| LoggerError::LogFormat {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    if has("current_draw") && has("total_draw") {
        reader
            .deserialize::<PowerRecord>()
            .map(|row| row.map(LogRecord::from).map_err(malformed))
            .collect()
    } else if has("draw") {
        reader
            .deserialize::<DrawRecord>()
            .map(|row| row.map(LogRecord::from).map_err(malformed))
            .collect()
    } else {
        Err(LoggerError::LogFormat {
            path: path.to_path_buf(),
            message: format!("unrecognized header {:?}", headers),
        })
    }
}

/// All samples of one experiment, ordered by time.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentData {
    pub label: String,
    pub records: Vec<LogRecord>,
}

impl ExperimentData {
    /// Merges every `*.csv` file directly inside `dir`.
    pub fn load(label: &str, dir: impl AsRef<Path>) -> Result<Self> {
        let mut records = Vec::new();
        for path in csv_files(dir.as_ref())? {
            records.extend(read_log_file(&path)?);
        }
        records.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        Ok(ExperimentData {
            label: label.to_string(),
            records,
        })
    }

    /// Energy used over the run, in kWh.
    ///
    /// Uses the plug's energy counter when the log has one, otherwise
    /// integrates the instantaneous draw over time.
    pub fn energy_kwh(&self) -> f64 {
        let totals: Vec<f64> = self.records.iter().filter_map(|r| r.total_draw).collect();
        if !totals.is_empty() {
            let max = totals.iter().copied().fold(f64::MIN, f64::max);
            let min = totals.iter().copied().fold(f64::MAX, f64::min);
            return max - min;
        }
        let watt_seconds: f64 = self
            .records
            .windows(2)
            .map(|pair| (pair[0].draw + pair[1].draw) / 2.0 * (pair[1].timestamp - pair[0].timestamp))
            .sum();
        watt_seconds / WATT_SECONDS_PER_KWH
    }

    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.records.first()?;
        let last = self.records.last()?;
        Some((to_datetime(first.timestamp)?, to_datetime(last.timestamp)?))
    }
}

fn to_datetime(timestamp: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros((timestamp * 1_000_000.0) as i64)
}

/// Cost and emission figures for one experiment, rounded to two decimals.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSummary {
    pub label: String,
    pub energy_kwh: f64,
    pub cost: f64,
    pub gco2e: f64,
    /// Distance a car would drive for the same emissions.
    pub car_km: f64,
}

impl CostSummary {
    pub fn from_energy(label: &str, energy_kwh: f64, settings: &MonitorSettings) -> Self {
        let gco2e = energy_kwh * settings.gco2e_per_kwh;
        let car_km = if settings.gco2e_per_kilometer_car > 0.0 {
            gco2e / settings.gco2e_per_kilometer_car
        } else {
            0.0
        };
        CostSummary {
            label: label.to_string(),
            energy_kwh: round2(energy_kwh),
            cost: round2(energy_kwh * settings.cost_per_kwh),
            gco2e: round2(gco2e),
            car_km: round2(car_km),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub const COMBINED_LABEL: &str = "Combined";

/// One summary per experiment followed by a combined row.
pub fn build_report(experiments: &[ExperimentData], settings: &MonitorSettings) -> Vec<CostSummary> {
    let mut total = 0.0;
    let mut rows = Vec::with_capacity(experiments.len() + 1);
    for experiment in experiments {
        let energy = experiment.energy_kwh();
        total += energy;
        rows.push(CostSummary::from_energy(&experiment.label, energy, settings));
    }
    rows.push(CostSummary::from_energy(COMBINED_LABEL, total, settings));
    rows
}

/// Loads the experiments logged for `device`.
///
/// With no labels given, every experiment directory is read, plus the
/// unlabeled logs sitting directly in the device directory.
pub fn load_device(base_dir: impl AsRef<Path>, device: &str, labels: &[String]) -> Result<Vec<ExperimentData>> {
    let device_dir = base_dir.as_ref().join(device);
    if !device_dir.is_dir() {
        return Err(LoggerError::Configuration(format!(
            "No measurements found for device {} in {}",
            device,
            base_dir.as_ref().display()
        )));
    }

    if !labels.is_empty() {
        return labels
            .iter()
            .map(|label| ExperimentData::load(label, device_dir.join(label)))
            .collect();
    }

    let mut experiments = Vec::new();
    if !csv_files(&device_dir)?.is_empty() {
        experiments.push(ExperimentData::load(device, &device_dir)?);
    }
    for label in subdirectories(&device_dir)? {
        experiments.push(ExperimentData::load(&label, device_dir.join(&label))?);
    }
    Ok(experiments)
}

/// Device directories under the measurement root.
pub fn list_devices(base_dir: impl AsRef<Path>) -> Result<Vec<String>> {
    let base_dir = base_dir.as_ref();
    if !base_dir.is_dir() {
        warn!("Measurement directory {} does not exist", base_dir.display());
        return Ok(Vec::new());
    }
    subdirectories(base_dir)
}

/// Experiment directories logged for one device.
pub fn list_experiments(base_dir: impl AsRef<Path>, device: &str) -> Result<Vec<String>> {
    subdirectories(&base_dir.as_ref().join(device))
}

fn subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LoggerError::filesystem(dir, e))? {
        let entry = entry.map_err(|e| LoggerError::filesystem(dir, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Sorted so files come back in rotation order.
pub fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| LoggerError::filesystem(dir, e))? {
        let path = entry.map_err(|e| LoggerError::filesystem(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_three_column_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "1.csv",
            "timestamp,current_draw,total_draw\n10.0,100.0,1.5\n11.0,120.0,1.6\n",
        );
        let records = read_log_file(path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].draw, 120.0);
        assert_eq!(records[1].total_draw, Some(1.6));
    }

    #[test]
    fn reads_two_column_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "1.csv", "timestamp,draw\n10.0,60.0\n");
        let records = read_log_file(path).unwrap();
        assert_eq!(
            records,
            vec![LogRecord {
                timestamp: 10.0,
                draw: 60.0,
                total_draw: None
            }]
        );
    }

    #[test]
    fn empty_and_header_only_files_have_no_records() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_log_file(write(dir.path(), "a.csv", "")).unwrap().is_empty());
        assert!(
            read_log_file(write(dir.path(), "b.csv", "timestamp,current_draw,total_draw\n"))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn garbled_row_is_log_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "1.csv", "timestamp,draw\nnot-a-number,5\n");
        assert!(matches!(read_log_file(path), Err(LoggerError::LogFormat { .. })));

        let path = write(dir.path(), "2.csv", "when,what\n1,2\n");
        assert!(matches!(read_log_file(path), Err(LoggerError::LogFormat { .. })));
    }

    #[test]
    fn experiment_merges_files_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "20.csv", "timestamp,current_draw,total_draw\n25.0,10.0,3.0\n");
        write(dir.path(), "10.csv", "timestamp,current_draw,total_draw\n10.0,10.0,1.0\n15.0,10.0,2.0\n");
        write(dir.path(), "notes.txt", "ignored");

        let experiment = ExperimentData::load("run", dir.path()).unwrap();
        let times: Vec<f64> = experiment.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![10.0, 15.0, 25.0]);
        assert!((experiment.energy_kwh() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn draw_only_energy_is_integrated() {
        let experiment = ExperimentData {
            label: "heater".into(),
            records: vec![
                LogRecord { timestamp: 0.0, draw: 1000.0, total_draw: None },
                LogRecord { timestamp: 1800.0, draw: 1000.0, total_draw: None },
                LogRecord { timestamp: 3600.0, draw: 1000.0, total_draw: None },
            ],
        };
        assert!((experiment.energy_kwh() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn report_has_combined_row() {
        let settings = MonitorSettings {
            cost_per_kwh: 0.5,
            currency: "EUR".into(),
            gco2e_per_kwh: 400.0,
            gco2e_per_kilometer_car: 100.0,
        };
        let experiment = |label: &str, first: f64, last: f64| ExperimentData {
            label: label.into(),
            records: vec![
                LogRecord { timestamp: 0.0, draw: 0.0, total_draw: Some(first) },
                LogRecord { timestamp: 1.0, draw: 0.0, total_draw: Some(last) },
            ],
        };
        let rows = build_report(&[experiment("a", 1.0, 3.0), experiment("b", 5.0, 6.0)], &settings);

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].energy_kwh, 2.0);
        assert_eq!(rows[0].cost, 1.0);
        assert_eq!(rows[0].gco2e, 800.0);
        assert_eq!(rows[0].car_km, 8.0);
        assert_eq!(rows[2].label, COMBINED_LABEL);
        assert_eq!(rows[2].energy_kwh, 3.0);
        assert_eq!(rows[2].cost, 1.5);
    }

    #[test]
    fn device_listing_includes_unlabeled_logs() {
        let dir = tempfile::tempdir().unwrap();
        let device = dir.path().join("desk");
        fs::create_dir_all(device.join("run1")).unwrap();
        write(&device, "1.csv", "timestamp,current_draw,total_draw\n1.0,1.0,1.0\n");
        write(&device.join("run1"), "2.csv", "timestamp,current_draw,total_draw\n2.0,1.0,1.0\n");

        assert_eq!(list_devices(dir.path()).unwrap(), vec!["desk".to_string()]);
        assert_eq!(list_experiments(dir.path(), "desk").unwrap(), vec!["run1".to_string()]);

        let experiments = load_device(dir.path(), "desk", &[]).unwrap();
        let labels: Vec<&str> = experiments.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["desk", "run1"]);

        assert!(load_device(dir.path(), "fridge", &[]).is_err());
    }
}
