//! Core measurement types and enums for the rehabilitation analytics engine
//!
//! This module defines the fundamental data structures used throughout the engine
//! for representing patient measurements, series points, classification statuses
//! and alert severities.

use crate::error::AnalyticsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the engine
pub type Timestamp = DateTime<Utc>;

/// Patient attributes used to select an applicable threshold configuration
pub type PatientContext = BTreeMap<String, AttributeValue>;

/// Value of a single measurement: either one number or a set of named components
///
/// Composite readings such as blood pressure carry one entry per component
/// (`systolic`, `diastolic`). Serialized untagged, so `72.0` and
/// `{"systolic": 120, "diastolic": 80}` are both accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MeasurementValue {
    /// A single scalar reading
    Scalar(f64),
    /// A reading with named numeric components
    Composite(BTreeMap<String, f64>),
}

impl MeasurementValue {
    /// Build a composite value from `(name, value)` pairs
    pub fn composite<I, K>(components: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        MeasurementValue::Composite(
            components
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    /// The scalar reading, if this is a scalar value
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            MeasurementValue::Scalar(value) => Some(*value),
            MeasurementValue::Composite(_) => None,
        }
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Scalar(value) => write!(f, "{}", value),
            MeasurementValue::Composite(components) => {
                let parts: Vec<String> = components
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

/// Where a measurement came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementOrigin {
    /// Entered by a clinician or the patient
    Manual,
    /// Reported by a connected device
    Device,
    /// Imported from an external record
    Imported,
}

/// A recorded physiological or device measurement
///
/// Measurements are immutable once recorded; a correction is a new measurement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Measurement {
    /// Unique identifier of this measurement
    pub id: String,
    /// Patient the measurement belongs to
    pub patient_id: String,
    /// Data category, e.g. `vital_sign` or `lab_result`
    pub category: String,
    /// Sub-type within the category, e.g. `heart_rate`
    #[serde(default)]
    pub sub_type: Option<String>,
    /// The observed value
    pub value: MeasurementValue,
    /// Unit of the value, e.g. `bpm`
    #[serde(default)]
    pub unit: Option<String>,
    /// When the measurement was taken
    pub timestamp: Timestamp,
    /// How the measurement entered the system
    #[serde(default)]
    pub origin: Option<MeasurementOrigin>,
    /// Device that produced the measurement, if any
    #[serde(default)]
    pub device_id: Option<String>,
}

impl Measurement {
    /// Project this measurement onto a scalar series point, if it is scalar
    pub fn to_point(&self) -> Option<SeriesPoint> {
        self.value.as_scalar().map(|value| SeriesPoint {
            timestamp: self.timestamp,
            value,
        })
    }
}

/// A single timestamped scalar value in a series
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl SeriesPoint {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Patient attribute value used in applicability predicates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttributeValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl AttributeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Flag(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

/// Result of classifying a value against its threshold bands
///
/// Ordered by severity: `Unknown < Normal < Warning < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RangeStatus {
    /// No applicable threshold information
    Unknown,
    /// Inside the normal band
    Normal,
    /// Outside normal or inside a warning band
    Warning,
    /// Inside a critical band
    Critical,
}

impl RangeStatus {
    /// Alert severity for this status, `None` below the warning floor
    pub fn severity(self) -> Option<Severity> {
        match self {
            RangeStatus::Warning => Some(Severity::Warning),
            RangeStatus::Critical => Some(Severity::Critical),
            RangeStatus::Unknown | RangeStatus::Normal => None,
        }
    }
}

impl fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RangeStatus::Unknown => "unknown",
            RangeStatus::Normal => "normal",
            RangeStatus::Warning => "warning",
            RangeStatus::Critical => "critical",
        };
        write!(f, "{}", text)
    }
}

/// Severity level of an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Needs attention
    Warning,
    /// Needs immediate attention
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(AnalyticsError::InvalidInput(format!(
                "unknown severity: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_severity_from_str() {
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(" warning ".parse::<Severity>().unwrap(), Severity::Warning);
        assert!(matches!(
            "info".parse::<Severity>(),
            Err(AnalyticsError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_measurement_serialization() {
        let measurement = Measurement {
            id: "m-1".to_string(),
            patient_id: "p-1".to_string(),
            category: "vital_sign".to_string(),
            sub_type: Some("blood_pressure".to_string()),
            value: MeasurementValue::composite([("systolic", 120.0), ("diastolic", 80.0)]),
            unit: Some("mmHg".to_string()),
            timestamp: Utc::now(),
            origin: Some(MeasurementOrigin::Device),
            device_id: Some("d-1".to_string()),
        };

        let json = serde_json::to_string(&measurement).unwrap();
        let deserialized: Measurement = serde_json::from_str(&json).unwrap();
        assert_eq!(measurement, deserialized);
    }

    #[test]
    fn test_measurement_value_untagged() {
        let scalar: MeasurementValue = serde_json::from_str("72.5").unwrap();
        assert_eq!(scalar, MeasurementValue::Scalar(72.5));

        let composite: MeasurementValue =
            serde_json::from_str(r#"{"systolic": 150, "diastolic": 95}"#).unwrap();
        match composite {
            MeasurementValue::Composite(components) => {
                assert_eq!(components["systolic"], 150.0);
                assert_eq!(components["diastolic"], 95.0);
            }
            other => panic!("expected composite, got {:?}", other),
        }
    }

    #[test]
    fn test_to_point_only_for_scalars() {
        let mut measurement = Measurement {
            id: "m-2".to_string(),
            patient_id: "p-1".to_string(),
            category: "vital_sign".to_string(),
            sub_type: Some("heart_rate".to_string()),
            value: MeasurementValue::Scalar(70.0),
            unit: Some("bpm".to_string()),
            timestamp: Utc::now(),
            origin: None,
            device_id: None,
        };
        assert_eq!(measurement.to_point().map(|p| p.value), Some(70.0));

        measurement.value = MeasurementValue::composite([("systolic", 120.0)]);
        assert!(measurement.to_point().is_none());
    }

    #[test]
    fn test_range_status_ordering() {
        assert!(RangeStatus::Unknown < RangeStatus::Normal);
        assert!(RangeStatus::Normal < RangeStatus::Warning);
        assert!(RangeStatus::Warning < RangeStatus::Critical);
    }

    #[test]
    fn test_range_status_severity() {
        assert_eq!(RangeStatus::Unknown.severity(), None);
        assert_eq!(RangeStatus::Normal.severity(), None);
        assert_eq!(RangeStatus::Warning.severity(), Some(Severity::Warning));
        assert_eq!(RangeStatus::Critical.severity(), Some(Severity::Critical));
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(
            serde_json::to_string(&Severity::Warning).unwrap(),
            "\"warning\""
        );
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_attribute_value_untagged() {
        let context: PatientContext =
            serde_json::from_str(r#"{"age": 67, "sex": "female", "diabetic": true}"#).unwrap();
        assert_eq!(context["age"], AttributeValue::Number(67.0));
        assert_eq!(context["sex"], AttributeValue::Text("female".to_string()));
        assert_eq!(context["diabetic"], AttributeValue::Flag(true));
    }
}
