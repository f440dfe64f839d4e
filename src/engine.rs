//! Analytics engine facade
//!
//! [`AnalyticsEngine`] composes the threshold registry, anomaly detector,
//! aggregator, trend estimator, forecaster, device scorer and alert manager
//! behind the operations calling layers use. The engine holds no per-patient
//! state between calls; the only shared mutable state lives in the registry's
//! config store and the alert ledger.

use crate::alerts::{Alert, AlertCandidate, AlertManager, AlertSource, AlertSubject};
use crate::analytics::aggregator::{self, bucket_means, Bucket, Interval, SeriesAggregator};
use crate::analytics::anomaly::{AnomalyDetector, AnomalyReport, DetectionMethod};
use crate::analytics::forecast::{
    ConfidenceInterval, ForecastMethod, ForecastOutcome, Forecaster,
};
use crate::analytics::stats::SeriesStats;
use crate::analytics::trend::{TrendEstimate, TrendEstimator};
use crate::config::EngineConfig;
use crate::devices::{Device, DeviceHealth, DeviceStatusScorer, LiveSignals};
use crate::error::{AnalyticsError, RegistryError, StoreError};
use crate::measurement::{
    Measurement, MeasurementValue, PatientContext, RangeStatus, SeriesPoint, Severity, Timestamp,
};
use crate::store::{MeasurementQuery, MeasurementStore};
use crate::thresholds::{classify, Band, Classification, ThresholdRegistry};
use chrono::{Duration, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Category and optional sub-type of a measurement series
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub category: String,
    #[serde(default)]
    pub sub_type: Option<String>,
}

impl DataType {
    pub fn new(category: &str, sub_type: Option<&str>) -> Self {
        Self {
            category: category.to_string(),
            sub_type: sub_type.map(str::to_string),
        }
    }

    fn of(measurement: &Measurement) -> Self {
        Self {
            category: measurement.category.clone(),
            sub_type: measurement.sub_type.clone(),
        }
    }

    fn label(&self) -> &str {
        self.sub_type.as_deref().unwrap_or(&self.category)
    }
}

/// Classification of a recorded measurement and the alert it raised, if any
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementOutcome {
    pub classification: Classification,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
}

/// A bucket start with a predicted value
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: Timestamp,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
}

/// Statistics, trend and short prediction for a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendAnalysis {
    pub interval: Interval,
    /// Statistics over the raw samples in the window
    pub statistics: SeriesStats,
    /// `None` with fewer than two buckets
    pub trend: Option<TrendEstimate>,
    pub buckets: Vec<Bucket>,
    pub prediction: Vec<ForecastPoint>,
}

/// Shortfall reported instead of a forecast
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsufficientData {
    pub required: usize,
    pub available: usize,
}

/// Forecast with the history it was built from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionEnvelope {
    pub method: ForecastMethod,
    pub interval: Interval,
    /// Bucket means the forecast was fitted on
    pub history: Vec<ForecastPoint>,
    /// Empty when the history is too short
    pub prediction: Vec<ForecastPoint>,
    /// Sub-method predictions keyed by method name, `ensemble` only
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub all_predictions: BTreeMap<String, Vec<ForecastPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insufficient_data: Option<InsufficientData>,
}

/// Device record paired with its live readings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceReading {
    pub device: Device,
    #[serde(default)]
    pub live: LiveSignals,
}

/// Everything `generate_alerts` inspects for one patient
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertScope {
    pub patient_id: String,
    #[serde(default)]
    pub context: Option<PatientContext>,
    /// Readings classified individually and grouped into series for anomaly detection
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    #[serde(default)]
    pub devices: Vec<DeviceReading>,
    /// `None` skips anomaly detection
    #[serde(default)]
    pub anomaly_method: Option<DetectionMethod>,
}

impl AlertScope {
    pub fn for_patient(patient_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            anomaly_method: Some(DetectionMethod::ZScore),
            ..Self::default()
        }
    }
}

/// Patient to include in a concurrent scan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientScan {
    pub patient_id: String,
    #[serde(default)]
    pub context: Option<PatientContext>,
}

/// Per-patient result of a concurrent scan
#[derive(Debug)]
pub struct ScanResult {
    pub patient_id: String,
    pub alerts: Result<Vec<AlertCandidate>, AnalyticsError>,
}

/// Composes the analytics components behind the engine operations
pub struct AnalyticsEngine {
    registry: ThresholdRegistry,
    alerts: AlertManager,
    detector: AnomalyDetector,
    trend: TrendEstimator,
    forecaster: Forecaster,
    scorer: DeviceStatusScorer,
    measurements: Option<Arc<dyn MeasurementStore>>,
}

impl AnalyticsEngine {
    /// Create an engine with in-memory stores configured from `config`
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if the built-in defaults cannot be seeded.
    pub fn new(config: &EngineConfig) -> Result<Self, RegistryError> {
        let registry = if config.thresholds.seed_defaults {
            ThresholdRegistry::with_defaults(config.thresholds.match_mode)?
        } else {
            ThresholdRegistry::in_memory(config.thresholds.match_mode)
        };
        let alerts = AlertManager::in_memory(config.alerts.severity_floor);
        Ok(Self::from_parts(config, registry, alerts))
    }

    /// Create an engine over externally owned registry and alert ledger
    pub fn from_parts(
        config: &EngineConfig,
        registry: ThresholdRegistry,
        alerts: AlertManager,
    ) -> Self {
        Self {
            registry,
            alerts,
            detector: config.anomaly.detector(),
            trend: config.trend.estimator(),
            forecaster: Forecaster::new(),
            scorer: config.devices.scorer(),
            measurements: None,
        }
    }

    /// Attach the measurement source used by the `*_for_patient` operations
    pub fn with_measurement_store(mut self, store: Arc<dyn MeasurementStore>) -> Self {
        self.measurements = Some(store);
        self
    }

    pub fn registry(&self) -> &ThresholdRegistry {
        &self.registry
    }

    pub fn alert_manager(&self) -> &AlertManager {
        &self.alerts
    }

    /// Classify a value against the threshold that applies to it
    ///
    /// A missing threshold is not an error: the classification is `unknown`.
    pub fn check_value(
        &self,
        category: &str,
        sub_type: Option<&str>,
        value: &MeasurementValue,
        context: Option<&PatientContext>,
    ) -> Result<Classification, AnalyticsError> {
        match self.registry.resolve(category, sub_type, context) {
            Ok(config) => Ok(classify(value, &config)),
            Err(RegistryError::NotFound { .. }) => {
                debug!("No threshold for {}/{}", category, sub_type.unwrap_or("-"));
                Ok(Classification::unknown(format!(
                    "No threshold configured for {}",
                    sub_type.unwrap_or(category)
                )))
            }
            Err(RegistryError::Store(e)) => Err(AnalyticsError::Store(e)),
            Err(RegistryError::InvalidConfig(msg)) => Err(AnalyticsError::InvalidInput(msg)),
        }
    }

    /// Classify a recorded measurement and raise an alert at or above the severity floor
    pub fn process_measurement(
        &self,
        measurement: &Measurement,
        context: Option<&PatientContext>,
    ) -> Result<MeasurementOutcome, AnalyticsError> {
        let classification = self.check_value(
            &measurement.category,
            measurement.sub_type.as_deref(),
            &measurement.value,
            context,
        )?;

        let alert = match classification.status.severity() {
            Some(severity) => self.alerts.create_alert(AlertCandidate {
                subject: AlertSubject::Measurement {
                    id: measurement.id.clone(),
                },
                patient_id: measurement.patient_id.clone(),
                category: measurement.category.clone(),
                sub_type: measurement.sub_type.clone(),
                value: Some(measurement.value.clone()),
                severity,
                source: AlertSource::Threshold,
                message: classification.message.clone(),
            })?,
            None => None,
        };

        Ok(MeasurementOutcome {
            classification,
            alert,
        })
    }

    /// Rank anomalies in a series
    ///
    /// # Arguments
    ///
    /// * `series` - Timestamped samples in any order
    /// * `method` - Detection method; short series fall back to `range`
    /// * `days` - Only consider samples from the last `days` days
    /// * `data_type` - When set, the `range` bounds come from its normal band
    pub fn detect_anomalies(
        &self,
        series: &[SeriesPoint],
        method: DetectionMethod,
        days: Option<u32>,
        data_type: Option<&DataType>,
    ) -> Result<AnomalyReport, AnalyticsError> {
        let window = self.window(series, days);
        let detector = match data_type {
            Some(data_type) => self.detector_for(data_type, None)?,
            None => self.detector.clone(),
        };
        Ok(detector.detect_points(&window, method))
    }

    /// Aggregate a series, fit its trend and extrapolate a few buckets
    pub fn analyze_trend(
        &self,
        series: &[SeriesPoint],
        days: Option<u32>,
        interval: Interval,
    ) -> Result<TrendAnalysis, AnalyticsError> {
        let window = self.window(series, days);
        let raw: Vec<f64> = window.iter().map(|p| p.value).collect();
        let buckets = SeriesAggregator::new(interval).aggregate(&window)?;
        let means = bucket_means(&buckets);

        let prediction = match buckets.last() {
            Some(last) => self
                .trend
                .short_prediction(&means)
                .into_iter()
                .enumerate()
                .map(|(i, value)| ForecastPoint {
                    timestamp: interval.advance(last.start, i as u32 + 1),
                    value,
                    lower: None,
                    upper: None,
                })
                .collect(),
            None => Vec::new(),
        };

        Ok(TrendAnalysis {
            interval,
            statistics: SeriesStats::from_values(&raw),
            trend: self.trend.estimate(&means),
            buckets,
            prediction,
        })
    }

    /// Forecast the buckets covering the next `horizon_days` days
    ///
    /// The horizon is converted to whole buckets of `interval`, rounding up,
    /// so seven days is seven daily points but a single weekly one.
    pub fn predict(
        &self,
        series: &[SeriesPoint],
        days: Option<u32>,
        horizon_days: u32,
        method: ForecastMethod,
        with_confidence: bool,
        interval: Interval,
    ) -> Result<PredictionEnvelope, AnalyticsError> {
        let window = self.window(series, days);
        let buckets = SeriesAggregator::new(interval).aggregate(&window)?;
        let means = bucket_means(&buckets);
        let history: Vec<ForecastPoint> = buckets
            .iter()
            .map(|b| ForecastPoint {
                timestamp: b.start,
                value: b.mean,
                lower: None,
                upper: None,
            })
            .collect();

        let horizon = interval.buckets_for_days(horizon_days);
        let mut envelope = PredictionEnvelope {
            method,
            interval,
            history,
            prediction: Vec::new(),
            all_predictions: BTreeMap::new(),
            insufficient_data: None,
        };

        match self.forecaster.forecast(&means, horizon, method, with_confidence) {
            ForecastOutcome::InsufficientData {
                required,
                available,
            } => {
                info!(
                    "Not forecasting: {} buckets available, {} required",
                    available, required
                );
                envelope.insufficient_data = Some(InsufficientData {
                    required,
                    available,
                });
            }
            ForecastOutcome::Forecast(forecast) => {
                // The forecaster only returns a forecast for a non-empty history
                let anchor = buckets.last().map(|b| b.start).unwrap_or_else(Utc::now);
                envelope.prediction = timestamped(
                    anchor,
                    interval,
                    &forecast.values,
                    forecast.confidence_intervals.as_deref(),
                );
                for member in &forecast.all_predictions {
                    envelope.all_predictions.insert(
                        member.method.to_string(),
                        timestamped(
                            anchor,
                            interval,
                            &member.values,
                            member.confidence_intervals.as_deref(),
                        ),
                    );
                }
            }
        }
        Ok(envelope)
    }

    /// Score a device with its live readings
    pub fn device_status(&self, device: &Device, live: &LiveSignals) -> DeviceHealth {
        self.scorer.score(device, live, Utc::now())
    }

    /// Devices needing attention, worst first
    pub fn rank_devices(&self, readings: &[DeviceReading]) -> Vec<DeviceHealth> {
        self.scorer.rank(
            readings.iter().map(|r| (&r.device, &r.live)),
            Utc::now(),
        )
    }

    /// Collect classification, device and anomaly alerts at or above `severity_threshold`
    ///
    /// Nothing is persisted; the result is sorted most severe first, keeping
    /// discovery order within a severity.
    pub fn generate_alerts(
        &self,
        scope: &AlertScope,
        severity_threshold: Severity,
    ) -> Result<Vec<AlertCandidate>, AnalyticsError> {
        let context = scope.context.as_ref();
        let mut candidates = Vec::new();

        for measurement in &scope.measurements {
            let classification = self.check_value(
                &measurement.category,
                measurement.sub_type.as_deref(),
                &measurement.value,
                context,
            )?;
            if let Some(severity) = classification.status.severity() {
                candidates.push(AlertCandidate {
                    subject: AlertSubject::Measurement {
                        id: measurement.id.clone(),
                    },
                    patient_id: scope.patient_id.clone(),
                    category: measurement.category.clone(),
                    sub_type: measurement.sub_type.clone(),
                    value: Some(measurement.value.clone()),
                    severity,
                    source: AlertSource::Threshold,
                    message: classification.message,
                });
            }
        }

        for reading in &scope.devices {
            let health = self.device_status(&reading.device, &reading.live);
            if let Some(severity) = health.severity {
                candidates.push(AlertCandidate {
                    subject: AlertSubject::Device {
                        id: health.device_id.clone(),
                    },
                    patient_id: scope.patient_id.clone(),
                    category: "device".to_string(),
                    sub_type: reading.device.device_type.clone(),
                    value: Some(MeasurementValue::Scalar(health.score as f64)),
                    severity,
                    source: AlertSource::DeviceStatus,
                    message: format!(
                        "Device {} scored {}: {}",
                        health.device_id,
                        health.score,
                        health.issues.join("; ")
                    ),
                });
            }
        }

        if let Some(method) = scope.anomaly_method {
            candidates.extend(self.anomaly_candidates(scope, method)?);
        }

        candidates.retain(|c| c.severity >= severity_threshold);
        candidates.sort_by(|a, b| b.severity.cmp(&a.severity));
        debug!(
            "Generated {} alerts for patient {}",
            candidates.len(),
            scope.patient_id
        );
        Ok(candidates)
    }

    /// Generate alerts and persist them through the alert manager
    pub fn raise_alerts(
        &self,
        scope: &AlertScope,
        severity_threshold: Severity,
    ) -> Result<Vec<Alert>, AnalyticsError> {
        let mut raised = Vec::new();
        for candidate in self.generate_alerts(scope, severity_threshold)? {
            if let Some(alert) = self.alerts.create_alert(candidate)? {
                raised.push(alert);
            }
        }
        Ok(raised)
    }

    fn anomaly_candidates(
        &self,
        scope: &AlertScope,
        method: DetectionMethod,
    ) -> Result<Vec<AlertCandidate>, AnalyticsError> {
        let mut series: BTreeMap<DataType, Vec<SeriesPoint>> = BTreeMap::new();
        for measurement in &scope.measurements {
            if let Some(point) = measurement.to_point() {
                series.entry(DataType::of(measurement)).or_default().push(point);
            }
        }

        let mut candidates = Vec::new();
        for (data_type, mut points) in series {
            points.sort_by_key(|p| p.timestamp);
            let detector = self.detector_for(&data_type, scope.context.as_ref())?;
            let report = detector.detect_points(&points, method);

            for anomaly in report.anomalies {
                // Anomalies alert at least as a warning, critical if the value itself is
                let status = self
                    .check_value(
                        &data_type.category,
                        data_type.sub_type.as_deref(),
                        &MeasurementValue::Scalar(anomaly.value),
                        scope.context.as_ref(),
                    )?
                    .status;
                let severity = if status == RangeStatus::Critical {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                candidates.push(AlertCandidate {
                    subject: AlertSubject::Series {
                        index: Some(anomaly.index),
                        timestamp: anomaly.timestamp,
                    },
                    patient_id: scope.patient_id.clone(),
                    category: data_type.category.clone(),
                    sub_type: data_type.sub_type.clone(),
                    value: Some(MeasurementValue::Scalar(anomaly.value)),
                    severity,
                    source: AlertSource::Anomaly,
                    message: format!(
                        "Anomalous {} {} ({}, score {:.0})",
                        data_type.label(),
                        anomaly.value,
                        anomaly.reason,
                        anomaly.score
                    ),
                });
            }
        }
        Ok(candidates)
    }

    /// Detector whose safe range is the normal band of the series' threshold
    ///
    /// Falls back to the configured safe range when no scalar threshold applies.
    fn detector_for(
        &self,
        data_type: &DataType,
        context: Option<&PatientContext>,
    ) -> Result<AnomalyDetector, AnalyticsError> {
        let band = match self.registry.resolve(
            &data_type.category,
            data_type.sub_type.as_deref(),
            context,
        ) {
            Ok(config) => config.normal_band(),
            Err(RegistryError::NotFound { .. }) => None,
            Err(RegistryError::Store(e)) => return Err(AnalyticsError::Store(e)),
            Err(RegistryError::InvalidConfig(msg)) => return Err(AnalyticsError::InvalidInput(msg)),
        };
        Ok(match band.filter(Band::is_configured) {
            Some(band) => self.detector.clone().with_safe_range(band),
            None => self.detector.clone(),
        })
    }

    fn window(&self, series: &[SeriesPoint], days: Option<u32>) -> Vec<SeriesPoint> {
        match days {
            Some(days) => aggregator::recent(series, Duration::days(days as i64), Utc::now()),
            None => {
                let mut all = series.to_vec();
                all.sort_by_key(|p| p.timestamp);
                all
            }
        }
    }

    fn store(&self) -> Result<&Arc<dyn MeasurementStore>, AnalyticsError> {
        self.measurements.as_ref().ok_or_else(|| {
            AnalyticsError::Store(StoreError::Unavailable(
                "no measurement store configured".to_string(),
            ))
        })
    }

    /// Fetch a patient's measurements of one type from the last `days` days
    pub fn fetch_measurements(
        &self,
        patient_id: &str,
        data_type: Option<&DataType>,
        days: u32,
    ) -> Result<Vec<Measurement>, AnalyticsError> {
        let end = Utc::now();
        let query = MeasurementQuery {
            subject_id: patient_id.to_string(),
            category: data_type.map(|d| d.category.clone()),
            sub_type: data_type.and_then(|d| d.sub_type.clone()),
            start: end - Duration::days(days as i64),
            end,
            limit: None,
        };
        Ok(self.store()?.fetch(&query)?)
    }

    fn fetch_series(
        &self,
        patient_id: &str,
        data_type: &DataType,
        days: u32,
    ) -> Result<Vec<SeriesPoint>, AnalyticsError> {
        Ok(self
            .fetch_measurements(patient_id, Some(data_type), days)?
            .iter()
            .filter_map(Measurement::to_point)
            .collect())
    }

    pub fn detect_anomalies_for_patient(
        &self,
        patient_id: &str,
        data_type: &DataType,
        method: DetectionMethod,
        days: u32,
    ) -> Result<AnomalyReport, AnalyticsError> {
        let series = self.fetch_series(patient_id, data_type, days)?;
        self.detect_anomalies(&series, method, None, Some(data_type))
    }

    pub fn analyze_trend_for_patient(
        &self,
        patient_id: &str,
        data_type: &DataType,
        days: u32,
        interval: Interval,
    ) -> Result<TrendAnalysis, AnalyticsError> {
        let series = self.fetch_series(patient_id, data_type, days)?;
        self.analyze_trend(&series, None, interval)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn predict_for_patient(
        &self,
        patient_id: &str,
        data_type: &DataType,
        days: u32,
        horizon_days: u32,
        method: ForecastMethod,
        with_confidence: bool,
        interval: Interval,
    ) -> Result<PredictionEnvelope, AnalyticsError> {
        let series = self.fetch_series(patient_id, data_type, days)?;
        self.predict(&series, None, horizon_days, method, with_confidence, interval)
    }

    /// Alerts for every measurement a patient recorded in the last `days` days
    pub fn generate_alerts_for_patient(
        &self,
        patient: &PatientScan,
        days: u32,
        severity_threshold: Severity,
    ) -> Result<Vec<AlertCandidate>, AnalyticsError> {
        let scope = AlertScope {
            context: patient.context.clone(),
            measurements: self.fetch_measurements(&patient.patient_id, None, days)?,
            ..AlertScope::for_patient(&patient.patient_id)
        };
        self.generate_alerts(&scope, severity_threshold)
    }

    /// Run `generate_alerts_for_patient` for many patients concurrently
    ///
    /// Each patient is scanned on the blocking pool; results come back in
    /// input order.
    pub async fn scan_patients(
        self: Arc<Self>,
        patients: Vec<PatientScan>,
        days: u32,
        severity_threshold: Severity,
    ) -> Vec<ScanResult> {
        let handles: Vec<_> = patients
            .into_iter()
            .map(|patient| {
                let engine = Arc::clone(&self);
                let patient_id = patient.patient_id.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    engine.generate_alerts_for_patient(&patient, days, severity_threshold)
                });
                (patient_id, handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (patient_id, handle) in handles {
            let alerts = match handle.await {
                Ok(alerts) => alerts,
                Err(e) => {
                    error!("Scan of patient {} failed: {}", patient_id, e);
                    Err(AnalyticsError::TaskFailed(e.to_string()))
                }
            };
            results.push(ScanResult { patient_id, alerts });
        }
        info!("Scanned {} patients", results.len());
        results
    }
}

fn timestamped(
    anchor: Timestamp,
    interval: Interval,
    values: &[f64],
    intervals: Option<&[ConfidenceInterval]>,
) -> Vec<ForecastPoint> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let bounds = intervals.and_then(|all| all.get(i));
            ForecastPoint {
                timestamp: interval.advance(anchor, i as u32 + 1),
                value,
                lower: bounds.map(|b| b.lower),
                upper: bounds.map(|b| b.upper),
            }
        })
        .collect()
}
