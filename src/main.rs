use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use rehab_analytics::analytics::{DetectionMethod, ForecastMethod, Interval};
use rehab_analytics::config::EngineConfig;
use rehab_analytics::engine::{AnalyticsEngine, DataType, DeviceReading, PatientScan};
use rehab_analytics::error::ConfigError;
use rehab_analytics::measurement::{Measurement, MeasurementValue, SeriesPoint, Severity};
use rehab_analytics::store::InMemoryMeasurementStore;
use rehab_analytics::thresholds::defaults::age_context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Command-line arguments for the rehabilitation analytics engine
#[derive(Parser)]
#[command(
    name = "rehab-analytics",
    about = "Health signal analytics and alerting for rehabilitation patients",
    long_about = "Classifies measurements against clinical thresholds, detects anomalies, \
                  summarises trends, forecasts future values and scores monitoring devices. \
                  Inputs are JSON files; results are printed as JSON."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a single value against its threshold
    Check {
        #[arg(long)]
        category: String,
        #[arg(long)]
        sub_type: Option<String>,
        /// A number, or a JSON object of named components
        #[arg(long, value_parser = parse_value)]
        value: MeasurementValue,
        /// Patient age used to pick age-specific thresholds
        #[arg(long)]
        age: Option<f64>,
    },
    /// Rank anomalies in a JSON series of {timestamp, value} points
    Anomalies {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, default_value = "z_score")]
        method: DetectionMethod,
        #[arg(long)]
        days: Option<u32>,
        /// Category whose threshold supplies the range bounds
        #[arg(long)]
        category: Option<String>,
        #[arg(long, requires = "category")]
        sub_type: Option<String>,
    },
    /// Aggregate a series and estimate its trend
    Trend {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long, default_value = "day")]
        interval: Interval,
    },
    /// Forecast future values of a series
    Predict {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long)]
        days: Option<u32>,
        /// Days ahead to forecast, rounded up to whole buckets
        #[arg(long, default_value_t = 7)]
        horizon_days: u32,
        #[arg(long, default_value = "ensemble")]
        method: ForecastMethod,
        #[arg(long, default_value = "day")]
        interval: Interval,
        /// Omit confidence intervals
        #[arg(long)]
        no_confidence: bool,
    },
    /// Score devices from a JSON list of {device, live} readings
    Device {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Only list devices needing attention, worst first
        #[arg(long)]
        attention_only: bool,
    },
    /// Scan every patient in a JSON list of measurements for alerts
    Scan {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, default_value_t = 7)]
        days: u32,
        #[arg(long, default_value = "warning")]
        severity: Severity,
    },
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(input) = self.command.input() {
            if !input.is_file() {
                return Err(format!("Input file not found: {}", input.display()));
            }
        }

        Ok(())
    }
}

impl Command {
    fn input(&self) -> Option<&Path> {
        match self {
            Command::Check { .. } => None,
            Command::Anomalies { input, .. }
            | Command::Trend { input, .. }
            | Command::Predict { input, .. }
            | Command::Device { input, .. }
            | Command::Scan { input, .. } => Some(input.as_path()),
        }
    }
}

fn parse_value(raw: &str) -> Result<MeasurementValue, String> {
    serde_json::from_str(raw.trim())
        .map_err(|e| format!("expected a number or an object of numbers: {}", e))
}

/// Load configuration, falling back to defaults when the file is missing or invalid
fn load_config(config_path: Option<&Path>) -> EngineConfig {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match EngineConfig::from_file(path) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    EngineConfig::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path.display(), e);
                    warn!("Using default configuration due to invalid config file");
                    EngineConfig::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            EngineConfig::default()
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(command: Command, engine: AnalyticsEngine) -> Result<()> {
    match command {
        Command::Check {
            category,
            sub_type,
            value,
            age,
        } => {
            let context = age.map(age_context);
            let result =
                engine.check_value(&category, sub_type.as_deref(), &value, context.as_ref())?;
            print_json(&result)
        }
        Command::Anomalies {
            input,
            method,
            days,
            category,
            sub_type,
        } => {
            let series: Vec<SeriesPoint> = read_json(&input)?;
            let data_type = category.map(|c| DataType::new(&c, sub_type.as_deref()));
            let report = engine.detect_anomalies(&series, method, days, data_type.as_ref())?;
            print_json(&report)
        }
        Command::Trend {
            input,
            days,
            interval,
        } => {
            let series: Vec<SeriesPoint> = read_json(&input)?;
            print_json(&engine.analyze_trend(&series, days, interval)?)
        }
        Command::Predict {
            input,
            days,
            horizon_days,
            method,
            interval,
            no_confidence,
        } => {
            let series: Vec<SeriesPoint> = read_json(&input)?;
            let with_confidence = !no_confidence;
            let envelope =
                engine.predict(&series, days, horizon_days, method, with_confidence, interval)?;
            print_json(&envelope)
        }
        Command::Device {
            input,
            attention_only,
        } => {
            let readings: Vec<DeviceReading> = read_json(&input)?;
            if attention_only {
                print_json(&engine.rank_devices(&readings))
            } else {
                let scored: Vec<_> = readings
                    .iter()
                    .map(|r| engine.device_status(&r.device, &r.live))
                    .collect();
                print_json(&scored)
            }
        }
        Command::Scan {
            input,
            days,
            severity,
        } => {
            let measurements: Vec<Measurement> = read_json(&input)?;
            let store = InMemoryMeasurementStore::new();
            let mut patients = BTreeSet::new();
            for measurement in measurements {
                patients.insert(measurement.patient_id.clone());
                store.record(measurement)?;
            }

            let engine = Arc::new(engine.with_measurement_store(Arc::new(store)));
            let scans = patients
                .into_iter()
                .map(|patient_id| PatientScan {
                    patient_id,
                    context: None,
                })
                .collect();
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            let results = runtime.block_on(engine.scan_patients(scans, days, severity));

            let mut report = serde_json::Map::new();
            for result in results {
                match result.alerts {
                    Ok(alerts) => {
                        report.insert(result.patient_id, serde_json::to_value(alerts)?);
                    }
                    Err(e) => error!("Scan of patient {} failed: {}", result.patient_id, e),
                }
            }
            print_json(&report)
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = load_config(cli.config.as_deref());
    let engine = match AnalyticsEngine::new(&config) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to initialize analytics engine: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, engine) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
