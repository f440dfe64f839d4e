use crate::analytics::anomaly::{AnomalyDetector, DEFAULT_Z_THRESHOLD};
use crate::analytics::trend::{TrendEstimator, DEFAULT_SHORT_HORIZON, DEFAULT_STABLE_SLOPE};
use crate::devices::status_scorer::{
    DeviceStatusScorer, DEFAULT_CRITICAL_SCORE, DEFAULT_WARNING_SCORE,
};
use crate::error::ConfigError;
use crate::measurement::Severity;
use crate::thresholds::{Band, MatchMode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level engine configuration
///
/// Every section is optional in the TOML file; missing sections and keys
/// take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: ThresholdSettings,
    pub anomaly: AnomalySettings,
    pub trend: TrendSettings,
    pub devices: DeviceSettings,
    pub alerts: AlertSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThresholdSettings {
    pub match_mode: MatchMode,
    /// Seed the registry with the built-in clinical defaults
    pub seed_defaults: bool,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            match_mode: MatchMode::BestEffort,
            seed_defaults: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnomalySettings {
    pub z_threshold: f64,
    pub safe_min: Option<f64>,
    pub safe_max: Option<f64>,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            z_threshold: DEFAULT_Z_THRESHOLD,
            safe_min: None,
            safe_max: None,
        }
    }
}

impl AnomalySettings {
    pub fn safe_range(&self) -> Option<Band> {
        Some(Band::new(self.safe_min, self.safe_max)).filter(Band::is_configured)
    }

    pub fn detector(&self) -> AnomalyDetector {
        let detector = AnomalyDetector::new(self.z_threshold);
        match self.safe_range() {
            Some(band) => detector.with_safe_range(band),
            None => detector,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrendSettings {
    pub stable_slope: f64,
    /// Buckets in the short-horizon prediction
    pub short_horizon: usize,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            stable_slope: DEFAULT_STABLE_SLOPE,
            short_horizon: DEFAULT_SHORT_HORIZON,
        }
    }
}

impl TrendSettings {
    pub fn estimator(&self) -> TrendEstimator {
        TrendEstimator::new(self.stable_slope, self.short_horizon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    pub warning_score: u32,
    pub critical_score: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            warning_score: DEFAULT_WARNING_SCORE,
            critical_score: DEFAULT_CRITICAL_SCORE,
        }
    }
}

impl DeviceSettings {
    pub fn scorer(&self) -> DeviceStatusScorer {
        DeviceStatusScorer::new(self.warning_score, self.critical_score)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertSettings {
    pub severity_floor: Severity,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            severity_floor: Severity::Warning,
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.anomaly.z_threshold.is_finite() && self.anomaly.z_threshold > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "anomaly.z_threshold must be positive, got {}",
                self.anomaly.z_threshold
            )));
        }
        if let (Some(min), Some(max)) = (self.anomaly.safe_min, self.anomaly.safe_max) {
            if min > max {
                return Err(ConfigError::ValidationError(format!(
                    "anomaly.safe_min {} is above safe_max {}",
                    min, max
                )));
            }
        }
        if !(self.trend.stable_slope.is_finite() && self.trend.stable_slope >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "trend.stable_slope must be non-negative, got {}",
                self.trend.stable_slope
            )));
        }
        if self.devices.critical_score < self.devices.warning_score {
            return Err(ConfigError::ValidationError(format!(
                "devices.critical_score {} is below warning_score {}",
                self.devices.critical_score, self.devices.warning_score
            )));
        }
        if self.devices.critical_score > 100 {
            return Err(ConfigError::ValidationError(format!(
                "devices.critical_score {} exceeds the maximum score of 100",
                self.devices.critical_score
            )));
        }
        Ok(())
    }
}
