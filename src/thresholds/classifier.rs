//! Range classification of measurement values
//!
//! Levels are checked critical first, then warning, then normal. Bands are
//! inclusive, so a value sitting on a shared boundary takes the more severe
//! level. Anything outside the known-normal band that no alarm band claims is
//! reported as `warning`, never silently `normal`.

use crate::measurement::{MeasurementValue, RangeStatus};
use crate::thresholds::registry::{Bands, RangeSpec, ThresholdConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of one component of a composite reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentStatus {
    pub name: String,
    /// Observed component value, `None` when the reading lacked it
    pub value: Option<f64>,
    pub status: RangeStatus,
}

/// Outcome of checking a value against a threshold config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub status: RangeStatus,
    pub message: String,
    /// Per-component statuses for composite readings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentStatus>>,
    /// Config that produced this classification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_id: Option<String>,
}

impl Classification {
    /// Classification for a value with no usable threshold information
    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            status: RangeStatus::Unknown,
            message: message.into(),
            components: None,
            threshold_id: None,
        }
    }
}

/// Classify one scalar against a set of bands
pub fn classify_scalar(value: f64, bands: &Bands) -> RangeStatus {
    if !value.is_finite() || bands.is_empty() {
        return RangeStatus::Unknown;
    }
    if bands.critical.iter().any(|band| band.contains(value)) {
        return RangeStatus::Critical;
    }
    if bands.warning.iter().any(|band| band.contains(value)) {
        return RangeStatus::Warning;
    }
    match bands.normal.filter(|band| band.is_configured()) {
        Some(normal) if normal.contains(value) => RangeStatus::Normal,
        Some(_) => RangeStatus::Warning,
        None => RangeStatus::Unknown,
    }
}

/// Classify a measurement value against a threshold config
///
/// Composite readings are classified per component and the worst component
/// status becomes the overall status. A scalar value checked against a
/// composite config (or the reverse) is `unknown`.
pub fn classify(value: &MeasurementValue, config: &ThresholdConfig) -> Classification {
    let label = config.sub_type.as_deref().unwrap_or(&config.category);
    let unit = config.unit.as_deref();

    let mut result = match (value, &config.ranges) {
        (MeasurementValue::Scalar(value), RangeSpec::Scalar(bands)) => {
            let status = classify_scalar(*value, bands);
            Classification {
                status,
                message: format!("{} {} is {}", label, with_unit(*value, unit), status),
                components: None,
                threshold_id: None,
            }
        }
        (MeasurementValue::Composite(values), RangeSpec::Composite { components }) => {
            classify_components(label, values, components, unit)
        }
        (MeasurementValue::Scalar(_), RangeSpec::Composite { .. }) => {
            Classification::unknown(format!("{} expects a composite reading", label))
        }
        (MeasurementValue::Composite(_), RangeSpec::Scalar(_)) => {
            Classification::unknown(format!("{} expects a scalar reading", label))
        }
    };
    result.threshold_id = Some(config.id.clone());
    result
}

fn classify_components(
    label: &str,
    values: &BTreeMap<String, f64>,
    components: &[crate::thresholds::registry::ComponentRange],
    unit: Option<&str>,
) -> Classification {
    let statuses: Vec<ComponentStatus> = components
        .iter()
        .map(|component| {
            let value = values.get(&component.name).copied();
            let status = value
                .map(|v| classify_scalar(v, &component.bands))
                .unwrap_or(RangeStatus::Unknown);
            ComponentStatus {
                name: component.name.clone(),
                value,
                status,
            }
        })
        .collect();

    let status = statuses
        .iter()
        .map(|component| component.status)
        .max()
        .unwrap_or(RangeStatus::Unknown);

    let parts: Vec<String> = statuses
        .iter()
        .map(|component| match component.value {
            Some(value) => format!(
                "{} {} ({})",
                component.name,
                with_unit(value, unit),
                component.status
            ),
            None => format!("{} missing", component.name),
        })
        .collect();

    Classification {
        status,
        message: format!("{} is {}: {}", label, status, parts.join(", ")),
        components: Some(statuses),
        threshold_id: None,
    }
}

fn with_unit(value: f64, unit: Option<&str>) -> String {
    match unit {
        Some(unit) if !unit.is_empty() => format!("{} {}", value, unit),
        _ => value.to_string(),
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::thresholds::registry::Band;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// Random scalar bands with ordered bounds
    #[derive(Debug, Clone)]
    struct RandomBands(Bands);

    fn arbitrary_band(g: &mut Gen) -> Band {
        let a = (i16::arbitrary(g) % 200) as f64;
        let b = (i16::arbitrary(g) % 200) as f64;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        match u8::arbitrary(g) % 3 {
            0 => Band::at_least(lo),
            1 => Band::at_most(hi),
            _ => Band::between(lo, hi),
        }
    }

    impl Arbitrary for RandomBands {
        fn arbitrary(g: &mut Gen) -> Self {
            let normal = if bool::arbitrary(g) {
                Some(arbitrary_band(g))
            } else {
                None
            };
            let warning = (0..u8::arbitrary(g) % 3).map(|_| arbitrary_band(g)).collect();
            let critical = (0..u8::arbitrary(g) % 3).map(|_| arbitrary_band(g)).collect();
            RandomBands(Bands::new(normal, warning, critical))
        }
    }

    // A value strictly outside the normal band is never classified normal
    #[quickcheck]
    fn prop_outside_normal_never_normal(bands: RandomBands, value: i16) -> bool {
        let value = (value % 300) as f64;
        let status = classify_scalar(value, &bands.0);
        let inside_normal = bands.0.normal.map_or(false, |band| band.contains(value));
        inside_normal || status != RangeStatus::Normal
    }

    // Any critical band hit wins over every other level
    #[quickcheck]
    fn prop_critical_band_dominates(bands: RandomBands, value: i16) -> bool {
        let value = (value % 300) as f64;
        let in_critical = bands.0.critical.iter().any(|band| band.contains(value));
        !in_critical || classify_scalar(value, &bands.0) == RangeStatus::Critical
    }
}
