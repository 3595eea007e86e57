use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::{Level, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;

use plugmeter::measurement::StopSignal;
use plugmeter::report::{self, CostSummary};
use plugmeter::settings::{DEVICE_SETTINGS_FILE, MONITOR_SETTINGS_FILE};
use plugmeter::{DeviceRegistry, DeviceSettingsStore, MeasurementSession, MonitorSettings, SessionConfig};

#[derive(Parser)]
#[command(name = "plugmeter", about = "Smart plug power logger", version)]
struct Cli {
    /// Device settings file.
    #[arg(long, global = true, default_value = DEVICE_SETTINGS_FILE)]
    settings: PathBuf,

    /// Root directory for measurement logs.
    #[arg(long, global = true, default_value = "measurements")]
    measurements: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PollArgs {
    /// Device name as listed in the settings file.
    #[arg(short, long)]
    device_name: String,

    /// Seconds between two readings.
    #[arg(long, default_value_t = 0.5)]
    poll_period: f64,

    /// Seconds after which a new log file is started.
    #[arg(long, default_value_t = 300.0)]
    rotation_period: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a device in the background until Enter is pressed or the duration elapses.
    Log {
        #[command(flatten)]
        poll: PollArgs,

        /// Experiment label to log under.
        #[arg(short, long)]
        experiment: Option<String>,

        /// Stop after this many seconds instead of waiting for Enter.
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Log a device in the foreground under the `continuous` experiment.
    Continuous {
        #[command(flatten)]
        poll: PollArgs,
    },

    /// Print energy, cost and carbon figures for logged experiments.
    Report {
        #[arg(short, long)]
        device_name: String,

        /// Experiments to include; all when omitted.
        #[arg(short, long)]
        experiment: Vec<String>,

        /// Pricing and emission factors.
        #[arg(long, default_value = MONITOR_SETTINGS_FILE)]
        monitor_settings: PathBuf,
    },

    /// List configured devices and what has been logged for them.
    Devices,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.verbose);
    info!("Starting plugmeter");

    let result = run(cli);
    if let Err(e) = &result {
        error!("plugmeter failed: {}", e);
        eprintln!("Error: {}", e);
    }
    info!("plugmeter shutting down");
    result
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Log { poll, experiment, duration } => {
            let mut config = session_config(&poll, &cli.measurements)?;
            if let Some(label) = experiment {
                config = config.with_experiment(&label);
            }
            let devices = DeviceSettingsStore::load(&cli.settings)?;
            let mut session = MeasurementSession::new(config, &devices, DeviceRegistry::with_defaults())?;

            let guard = session.scoped()?;
            println!("Logging to {}", guard.config().log_dir().display());
            match duration {
                Some(secs) => thread::sleep(seconds(secs, "duration")?),
                None => {
                    println!("Press Enter to stop.");
                    wait_for_enter();
                }
            }
            if let Some(summary) = guard.finish()? {
                println!(
                    "Stopped: {} file(s), {} row(s) written",
                    summary.files_created, summary.rows_written
                );
            }
        }
        Commands::Continuous { poll } => {
            let config = session_config(&poll, &cli.measurements)?.with_experiment("continuous");
            let devices = DeviceSettingsStore::load(&cli.settings)?;
            let mut session = MeasurementSession::new(config, &devices, DeviceRegistry::with_defaults())?;

            println!(
                "Running continuous measurement for {} with poll period {}s and rotation period {}s. Press Enter to stop.",
                poll.device_name, poll.poll_period, poll.rotation_period
            );
            stop_on_enter(session.stop_handle());
            let summary = session.run_foreground()?;
            println!("Stopped: {} file(s), {} row(s) written", summary.files_created, summary.rows_written);
        }
        Commands::Report { device_name, experiment, monitor_settings } => {
            let settings = MonitorSettings::load_or_default(&monitor_settings)?;
            let experiments = report::load_device(&cli.measurements, &device_name, &experiment)?;
            for data in &experiments {
                if let Some((first, last)) = data.time_span() {
                    println!("{}: {} samples from {} to {}", data.label, data.records.len(), first, last);
                }
            }
            print_report(&report::build_report(&experiments, &settings), &settings.currency);
        }
        Commands::Devices => {
            let devices = DeviceSettingsStore::load(&cli.settings)?;
            let registry = DeviceRegistry::with_defaults();
            for name in devices.names() {
                let device = devices.device(name)?;
                let logged = report::list_experiments(&cli.measurements, name).unwrap_or_default();
                let support = if registry.contains(&device.device_type) { "" } else { ", unsupported type" };
                println!("{} ({}{}): experiments {:?}", name, device.device_type, support, logged);
            }
            for name in report::list_devices(&cli.measurements)? {
                if devices.device(&name).is_err() {
                    println!("{} (not in {}): logs present", name, cli.settings.display());
                }
            }
        }
    }
    Ok(())
}

fn session_config(poll: &PollArgs, measurements: &Path) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    Ok(SessionConfig::new(&poll.device_name)
        .with_base_dir(measurements)
        .with_poll_period(seconds(poll.poll_period, "poll period")?)
        .with_rotation_period(seconds(poll.rotation_period, "rotation period")?))
}

fn seconds(value: f64, what: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("Invalid {} {}: {}", what, value, e).into())
}

fn wait_for_enter() {
    let mut line = String::new();
    if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
        warn!("Could not read stdin, stopping: {}", e);
    }
}

fn stop_on_enter(stop: Arc<StopSignal>) {
    thread::spawn(move || {
        wait_for_enter();
        stop.set();
    });
}

fn print_report(rows: &[CostSummary], currency: &str) {
    println!(
        "{:<24} {:>12} {:>12} {:>14} {:>12}",
        "Experiment",
        "Energy (kWh)",
        format!("Cost ({})", currency),
        "CO2e (g)",
        "Car (km)"
    );
    for row in rows {
        println!(
            "{:<24} {:>12.2} {:>12.2} {:>14.2} {:>12.2}",
            row.label, row.energy_kwh, row.cost, row.gco2e, row.car_km
        );
    }
}

fn setup_logging(verbose: bool) -> WorkerGuard {
    // Daily-rotated file log; the guard must outlive main for the writer to flush.
    let file_appender = rolling::daily("logs", "plugmeter.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_level(true)
        .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
        .init();
    guard
}
