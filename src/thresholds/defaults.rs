//! Built-in clinical threshold defaults
//!
//! Adult reference ranges used to seed a registry when no site-specific
//! configuration has been loaded yet. Every entry is a default config except
//! the pediatric heart-rate and geriatric blood-pressure overrides.

use crate::measurement::AttributeValue;
use crate::thresholds::registry::{Band, Bands, ComponentRange, Predicate, ThresholdConfig};

pub const VITAL_SIGN: &str = "vital_sign";
pub const LAB_RESULT: &str = "lab_result";

/// All built-in configs
pub fn default_configs() -> Vec<ThresholdConfig> {
    vec![
        heart_rate(),
        pediatric_heart_rate(),
        blood_pressure(),
        geriatric_blood_pressure(),
        body_temperature(),
        blood_oxygen(),
        respiratory_rate(),
        blood_glucose(),
    ]
}

fn heart_rate() -> ThresholdConfig {
    ThresholdConfig::scalar(
        VITAL_SIGN,
        Some("heart_rate"),
        Bands::new(
            Some(Band::between(60.0, 100.0)),
            vec![Band::at_most(50.0), Band::at_least(120.0)],
            vec![Band::at_most(40.0), Band::at_least(150.0)],
        ),
    )
    .with_id("default-heart-rate")
    .with_unit("bpm")
    .as_default()
}

fn pediatric_heart_rate() -> ThresholdConfig {
    ThresholdConfig::scalar(
        VITAL_SIGN,
        Some("heart_rate"),
        Bands::new(
            Some(Band::between(70.0, 120.0)),
            vec![Band::at_most(60.0), Band::at_least(140.0)],
            vec![Band::at_most(50.0), Band::at_least(170.0)],
        ),
    )
    .with_id("pediatric-heart-rate")
    .with_unit("bpm")
    .with_predicate(
        "age",
        Predicate::Range {
            min: None,
            max: Some(12.0),
        },
    )
}

fn blood_pressure_components(systolic_normal_max: f64) -> Vec<ComponentRange> {
    vec![
        ComponentRange::new(
            "systolic",
            Bands::new(
                Some(Band::between(90.0, systolic_normal_max)),
                vec![Band::between(systolic_normal_max, 140.0)],
                vec![Band::at_least(140.0), Band::at_most(70.0)],
            ),
        ),
        ComponentRange::new(
            "diastolic",
            Bands::new(
                Some(Band::between(60.0, 80.0)),
                vec![Band::between(80.0, 90.0)],
                vec![Band::at_least(90.0), Band::at_most(40.0)],
            ),
        ),
    ]
}

fn blood_pressure() -> ThresholdConfig {
    ThresholdConfig::composite(VITAL_SIGN, Some("blood_pressure"), blood_pressure_components(120.0))
        .with_id("default-blood-pressure")
        .with_unit("mmHg")
        .as_default()
}

fn geriatric_blood_pressure() -> ThresholdConfig {
    ThresholdConfig::composite(VITAL_SIGN, Some("blood_pressure"), blood_pressure_components(130.0))
        .with_id("geriatric-blood-pressure")
        .with_unit("mmHg")
        .with_predicate(
            "age",
            Predicate::Range {
                min: Some(65.0),
                max: None,
            },
        )
}

fn body_temperature() -> ThresholdConfig {
    ThresholdConfig::scalar(
        VITAL_SIGN,
        Some("body_temperature"),
        Bands::new(
            Some(Band::between(36.0, 37.3)),
            vec![Band::between(37.5, 39.0), Band::between(35.0, 35.9)],
            vec![Band::at_least(39.1), Band::at_most(34.9)],
        ),
    )
    .with_id("default-body-temperature")
    .with_unit("°C")
    .as_default()
}

fn blood_oxygen() -> ThresholdConfig {
    ThresholdConfig::scalar(
        VITAL_SIGN,
        Some("blood_oxygen"),
        Bands::new(
            Some(Band::between(95.0, 100.0)),
            vec![Band::between(90.0, 94.9)],
            vec![Band::at_most(89.9)],
        ),
    )
    .with_id("default-blood-oxygen")
    .with_unit("%")
    .as_default()
}

fn respiratory_rate() -> ThresholdConfig {
    ThresholdConfig::scalar(
        VITAL_SIGN,
        Some("respiratory_rate"),
        Bands::new(
            Some(Band::between(12.0, 20.0)),
            vec![Band::between(21.0, 29.0), Band::between(9.0, 11.0)],
            vec![Band::at_least(30.0), Band::at_most(8.0)],
        ),
    )
    .with_id("default-respiratory-rate")
    .with_unit("breaths/min")
    .as_default()
}

fn blood_glucose() -> ThresholdConfig {
    ThresholdConfig::scalar(
        LAB_RESULT,
        Some("blood_glucose"),
        Bands::new(
            Some(Band::between(3.9, 6.1)),
            vec![Band::between(6.2, 11.0), Band::between(3.0, 3.8)],
            vec![Band::at_least(11.1), Band::at_most(2.9)],
        ),
    )
    .with_id("default-blood-glucose")
    .with_unit("mmol/L")
    .as_default()
}

/// Context helper for the age predicate used by the overrides above
pub fn age_context(age: f64) -> crate::measurement::PatientContext {
    let mut context = crate::measurement::PatientContext::new();
    context.insert("age".to_string(), AttributeValue::Number(age));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::{MeasurementValue, RangeStatus};
    use crate::thresholds::classifier::classify;
    use crate::thresholds::registry::{MatchMode, ThresholdRegistry};

    #[test]
    fn test_defaults_are_valid_and_unique() {
        let configs = default_configs();
        for config in &configs {
            assert!(config.validate().is_ok(), "invalid default {}", config.id);
        }
        let mut ids: Vec<&str> = configs.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), configs.len());
    }

    #[test]
    fn test_seeded_registry_resolves_every_sub_type() {
        let registry = ThresholdRegistry::with_defaults(MatchMode::BestEffort).unwrap();
        for sub_type in [
            "heart_rate",
            "blood_pressure",
            "body_temperature",
            "blood_oxygen",
            "respiratory_rate",
        ] {
            let config = registry
                .resolve(VITAL_SIGN, Some(sub_type), Some(&age_context(40.0)))
                .unwrap();
            assert!(config.is_default, "{} resolved to an override", sub_type);
        }
        assert!(registry
            .resolve(LAB_RESULT, Some("blood_glucose"), None)
            .is_ok());
    }

    #[test]
    fn test_age_overrides() {
        let registry = ThresholdRegistry::with_defaults(MatchMode::Strict).unwrap();

        let child = registry
            .resolve(VITAL_SIGN, Some("heart_rate"), Some(&age_context(6.0)))
            .unwrap();
        assert_eq!(child.id, "pediatric-heart-rate");
        // 110 bpm is normal for a child, above normal for an adult
        assert_eq!(
            classify(&MeasurementValue::Scalar(110.0), &child).status,
            RangeStatus::Normal
        );

        let adult = registry
            .resolve(VITAL_SIGN, Some("heart_rate"), Some(&age_context(35.0)))
            .unwrap();
        assert_eq!(
            classify(&MeasurementValue::Scalar(110.0), &adult).status,
            RangeStatus::Warning
        );

        let elder = registry
            .resolve(VITAL_SIGN, Some("blood_pressure"), Some(&age_context(72.0)))
            .unwrap();
        assert_eq!(elder.id, "geriatric-blood-pressure");
    }
}
