//! Threshold configurations and the registry that resolves them
//!
//! A [`ThresholdConfig`] carries normal/warning/critical bands for one data
//! category (and optional sub-type), plus an applicability predicate over
//! patient attributes. The [`ThresholdRegistry`] picks the single config that
//! applies to a measurement: a matching non-default config wins over the
//! default one.

use crate::error::RegistryError;
use crate::measurement::{AttributeValue, PatientContext, Timestamp};
use crate::store::{ConfigStore, InMemoryConfigStore};
use crate::thresholds::defaults;
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

/// An inclusive numeric region; an absent bound is open-ended
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Band {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl Band {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Band covering `[min, max]`
    pub fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }

    /// Band covering everything at or above `min`
    pub fn at_least(min: f64) -> Self {
        Self::new(Some(min), None)
    }

    /// Band covering everything at or below `max`
    pub fn at_most(max: f64) -> Self {
        Self::new(None, Some(max))
    }

    /// A band with neither bound set carries no information
    pub fn is_configured(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    /// Whether `value` lies inside the band, bounds included
    pub fn contains(&self, value: f64) -> bool {
        self.is_configured()
            && self.min.map_or(true, |min| value >= min)
            && self.max.map_or(true, |max| value <= max)
    }

    /// Distance from `value` to the nearest bound it violates, 0 when inside
    pub fn excess(&self, value: f64) -> f64 {
        match (self.min, self.max) {
            (Some(min), _) if value < min => min - value,
            (_, Some(max)) if value > max => value - max,
            _ => 0.0,
        }
    }

    fn validate(&self, label: &str) -> Result<(), RegistryError> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(RegistryError::InvalidConfig(format!(
                    "{} band has min {} above max {}",
                    label, min, max
                )));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Band),
    Many(Vec<Band>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Band>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(band)) => vec![band],
        Some(OneOrMany::Many(bands)) => bands,
    })
}

/// Normal, warning and critical regions for one scalar quantity
///
/// Warning and critical levels accept one band or a list of bands, so both a
/// low-side and a high-side alarm can be expressed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Bands {
    #[serde(default)]
    pub normal: Option<Band>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub warning: Vec<Band>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub critical: Vec<Band>,
}

impl Bands {
    pub fn new(normal: Option<Band>, warning: Vec<Band>, critical: Vec<Band>) -> Self {
        Self {
            normal,
            warning,
            critical,
        }
    }

    /// True when no level has any configured band
    pub fn is_empty(&self) -> bool {
        !self.normal.map_or(false, |band| band.is_configured())
            && !self.warning.iter().any(Band::is_configured)
            && !self.critical.iter().any(Band::is_configured)
    }

    fn validate(&self, label: &str) -> Result<(), RegistryError> {
        if let Some(normal) = &self.normal {
            normal.validate(&format!("{} normal", label))?;
        }
        for band in &self.warning {
            band.validate(&format!("{} warning", label))?;
        }
        for band in &self.critical {
            band.validate(&format!("{} critical", label))?;
        }
        Ok(())
    }
}

/// Bands for one named component of a composite reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentRange {
    pub name: String,
    pub bands: Bands,
}

impl ComponentRange {
    pub fn new(name: impl Into<String>, bands: Bands) -> Self {
        Self {
            name: name.into(),
            bands,
        }
    }
}

/// Range layout of a threshold config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RangeSpec {
    /// Bands for a single scalar value
    Scalar(Bands),
    /// Bands per component, in reporting order
    Composite { components: Vec<ComponentRange> },
}

/// Requirement a patient attribute must satisfy for a config to apply
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Predicate {
    /// Attribute must equal this value
    Equals(AttributeValue),
    /// Numeric attribute must fall in `[min, max]`; absent bounds are open
    Range { min: Option<f64>, max: Option<f64> },
}

impl Predicate {
    pub fn matches(&self, value: &AttributeValue) -> bool {
        match self {
            Predicate::Equals(expected) => expected == value,
            Predicate::Range { min, max } => match value.as_number() {
                Some(number) => {
                    min.map_or(true, |min| number >= min) && max.map_or(true, |max| number <= max)
                }
                None => false,
            },
        }
    }
}

/// How applicability predicates treat attributes missing from the patient context
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Predicates on attributes the context lacks are ignored
    #[default]
    BestEffort,
    /// Every predicate must be satisfied by a present attribute
    Strict,
}

/// Named set of range bands for a measurement category
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    pub id: String,
    pub category: String,
    #[serde(default)]
    pub sub_type: Option<String>,
    pub ranges: RangeSpec,
    #[serde(default)]
    pub unit: Option<String>,
    /// Patient attribute requirements, keyed by attribute name
    #[serde(default)]
    pub applicability: BTreeMap<String, Predicate>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

fn default_active() -> bool {
    true
}

impl ThresholdConfig {
    /// Create an active, non-default config for a scalar quantity
    pub fn scalar(category: &str, sub_type: Option<&str>, bands: Bands) -> Self {
        Self::with_ranges(category, sub_type, RangeSpec::Scalar(bands))
    }

    /// Create an active, non-default config for a composite quantity
    pub fn composite(
        category: &str,
        sub_type: Option<&str>,
        components: Vec<ComponentRange>,
    ) -> Self {
        Self::with_ranges(category, sub_type, RangeSpec::Composite { components })
    }

    fn with_ranges(category: &str, sub_type: Option<&str>, ranges: RangeSpec) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            category: category.to_string(),
            sub_type: sub_type.map(str::to_string),
            ranges,
            unit: None,
            applicability: BTreeMap::new(),
            is_default: false,
            is_active: true,
            created_by: None,
            created_at: None,
            updated_by: None,
            updated_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_predicate(mut self, attribute: &str, predicate: Predicate) -> Self {
        self.applicability.insert(attribute.to_string(), predicate);
        self
    }

    /// Mark this config as the fallback for its category/sub-type
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Whether this config targets the given category and sub-type
    pub fn targets(&self, category: &str, sub_type: Option<&str>) -> bool {
        self.category == category && self.sub_type.as_deref() == sub_type
    }

    /// Evaluate the applicability predicate against a patient context
    ///
    /// A missing context is the same as an empty one. A config with
    /// predicates applies only when at least one of them is evaluated and
    /// every evaluated one matches. Best-effort matching skips keys the
    /// context lacks; strict matching rejects the config instead.
    pub fn applies_to(&self, context: Option<&PatientContext>, mode: MatchMode) -> bool {
        if self.applicability.is_empty() {
            return true;
        }
        let empty = PatientContext::new();
        let context = context.unwrap_or(&empty);

        let mut evaluated = 0;
        for (key, predicate) in &self.applicability {
            match context.get(key) {
                Some(value) if predicate.matches(value) => evaluated += 1,
                Some(_) => return false,
                None if mode == MatchMode::Strict => return false,
                None => {}
            }
        }
        evaluated > 0
    }

    /// Normal band of a scalar config
    pub fn normal_band(&self) -> Option<Band> {
        match &self.ranges {
            RangeSpec::Scalar(bands) => bands.normal.filter(Band::is_configured),
            RangeSpec::Composite { .. } => None,
        }
    }

    fn collides_with(&self, other: &ThresholdConfig) -> bool {
        self.id != other.id
            && self.is_active
            && other.is_active
            && self.is_default == other.is_default
            && self.targets(&other.category, other.sub_type.as_deref())
            && self.applicability == other.applicability
    }

    fn last_touched(&self) -> Option<Timestamp> {
        self.updated_at.or(self.created_at)
    }

    /// Check band ordering and component naming
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.category.trim().is_empty() {
            return Err(RegistryError::InvalidConfig(
                "category must not be empty".to_string(),
            ));
        }
        match &self.ranges {
            RangeSpec::Scalar(bands) => bands.validate("scalar"),
            RangeSpec::Composite { components } => {
                if components.is_empty() {
                    return Err(RegistryError::InvalidConfig(
                        "composite config needs at least one component".to_string(),
                    ));
                }
                for (i, component) in components.iter().enumerate() {
                    if components[..i].iter().any(|c| c.name == component.name) {
                        return Err(RegistryError::InvalidConfig(format!(
                            "duplicate component '{}'",
                            component.name
                        )));
                    }
                    component.bands.validate(&component.name)?;
                }
                Ok(())
            }
        }
    }
}

/// Stores threshold configurations and resolves the applicable one
pub struct ThresholdRegistry {
    store: Arc<dyn ConfigStore>,
    match_mode: MatchMode,
}

impl ThresholdRegistry {
    /// Create a registry over an existing config store
    pub fn new(store: Arc<dyn ConfigStore>, match_mode: MatchMode) -> Self {
        Self { store, match_mode }
    }

    /// Create an empty registry backed by an in-memory store
    pub fn in_memory(match_mode: MatchMode) -> Self {
        Self::new(Arc::new(InMemoryConfigStore::new()), match_mode)
    }

    /// Create an in-memory registry seeded with the built-in clinical defaults
    pub fn with_defaults(match_mode: MatchMode) -> Result<Self, RegistryError> {
        let registry = Self::in_memory(match_mode);
        for config in defaults::default_configs() {
            registry.upsert(config, "system")?;
        }
        Ok(registry)
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    /// Resolve the config that applies to a measurement context
    ///
    /// Non-default active configs whose predicate matches win; the most specific
    /// (most predicates) and then most recently updated is chosen among several.
    /// Otherwise the default active config is used.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` when neither exists.
    pub fn resolve(
        &self,
        category: &str,
        sub_type: Option<&str>,
        context: Option<&PatientContext>,
    ) -> Result<ThresholdConfig, RegistryError> {
        let candidates: Vec<ThresholdConfig> = self
            .store
            .list()?
            .into_iter()
            .filter(|config| config.is_active && config.targets(category, sub_type))
            .collect();

        let specific = candidates
            .iter()
            .filter(|config| !config.is_default && config.applies_to(context, self.match_mode))
            .max_by(|a, b| {
                a.applicability
                    .len()
                    .cmp(&b.applicability.len())
                    .then_with(|| compare_recency(a, b))
            });

        if let Some(config) = specific {
            debug!(
                "Resolved threshold {} for {}/{}",
                config.id,
                category,
                sub_type.unwrap_or("-")
            );
            return Ok(config.clone());
        }

        let fallback = candidates
            .iter()
            .filter(|config| config.is_default)
            .max_by(|a, b| compare_recency(a, b));

        match fallback {
            Some(config) => {
                debug!(
                    "Falling back to default threshold {} for {}/{}",
                    config.id,
                    category,
                    sub_type.unwrap_or("-")
                );
                Ok(config.clone())
            }
            None => Err(RegistryError::NotFound {
                category: category.to_string(),
                sub_type: sub_type.map(str::to_string),
            }),
        }
    }

    /// List configs, optionally restricted to one category
    pub fn list(&self, category: Option<&str>) -> Result<Vec<ThresholdConfig>, RegistryError> {
        let mut configs: Vec<ThresholdConfig> = self
            .store
            .list()?
            .into_iter()
            .filter(|config| category.map_or(true, |c| config.category == c))
            .collect();
        configs.sort_by(|a, b| {
            (&a.category, &a.sub_type, a.is_default, &a.id).cmp(&(
                &b.category,
                &b.sub_type,
                b.is_default,
                &b.id,
            ))
        });
        Ok(configs)
    }

    pub fn get(&self, id: &str) -> Result<Option<ThresholdConfig>, RegistryError> {
        Ok(self.store.get(id)?)
    }

    /// Insert or replace a config, stamping audit fields
    ///
    /// An active config that collides with another active config for the same
    /// category, sub-type, default flag and applicability deactivates the
    /// older one (last writer wins).
    pub fn upsert(
        &self,
        mut config: ThresholdConfig,
        actor: &str,
    ) -> Result<ThresholdConfig, RegistryError> {
        config.validate()?;
        let now = Utc::now();

        match self.store.get(&config.id)? {
            Some(existing) => {
                config.created_by = existing.created_by;
                config.created_at = existing.created_at;
            }
            None => {
                config.created_by = Some(actor.to_string());
                config.created_at = Some(now);
            }
        }
        config.updated_by = Some(actor.to_string());
        config.updated_at = Some(now);

        if config.is_active {
            for mut other in self.store.list()? {
                if config.collides_with(&other) {
                    warn!(
                        "Threshold {} supersedes {} for {}/{}",
                        config.id,
                        other.id,
                        config.category,
                        config.sub_type.as_deref().unwrap_or("-")
                    );
                    other.is_active = false;
                    other.updated_by = Some(actor.to_string());
                    other.updated_at = Some(now);
                    self.store.upsert(other)?;
                }
            }
        }

        self.store.upsert(config.clone())?;
        info!(
            "Stored threshold {} for {}/{}",
            config.id,
            config.category,
            config.sub_type.as_deref().unwrap_or("-")
        );
        Ok(config)
    }

    /// Delete a config; returns whether it existed
    pub fn delete(&self, id: &str) -> Result<bool, RegistryError> {
        let removed = self.store.delete(id)?;
        if removed {
            info!("Deleted threshold {}", id);
        }
        Ok(removed)
    }
}

fn compare_recency(a: &ThresholdConfig, b: &ThresholdConfig) -> Ordering {
    a.last_touched().cmp(&b.last_touched())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heart_rate_bands(normal_min: f64, normal_max: f64) -> Bands {
        Bands::new(
            Some(Band::between(normal_min, normal_max)),
            vec![Band::between(100.0, 130.0)],
            vec![Band::at_least(130.0)],
        )
    }

    fn heart_rate_config(normal_min: f64, normal_max: f64) -> ThresholdConfig {
        ThresholdConfig::scalar(
            "vital_sign",
            Some("heart_rate"),
            heart_rate_bands(normal_min, normal_max),
        )
    }

    fn context(pairs: &[(&str, AttributeValue)]) -> PatientContext {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn test_band_contains_is_inclusive() {
        let band = Band::between(60.0, 100.0);
        assert!(band.contains(60.0));
        assert!(band.contains(100.0));
        assert!(!band.contains(59.999));
        assert!(!band.contains(100.001));

        assert!(Band::at_least(140.0).contains(140.0));
        assert!(Band::at_most(40.0).contains(40.0));
        assert!(!Band::default().contains(0.0));
    }

    #[test]
    fn test_band_excess() {
        let band = Band::between(60.0, 100.0);
        assert_eq!(band.excess(50.0), 10.0);
        assert_eq!(band.excess(150.0), 50.0);
        assert_eq!(band.excess(80.0), 0.0);
    }

    #[test]
    fn test_bands_accept_single_or_list() {
        let single: Bands = serde_json::from_str(
            r#"{
                "normal": {"min": 60, "max": 100},
                "warning": {"min": 100, "max": 120},
                "critical": {"min": 120}
            }"#,
        )
        .unwrap();
        assert_eq!(single.warning, vec![Band::between(100.0, 120.0)]);
        assert_eq!(single.critical, vec![Band::at_least(120.0)]);

        let many: Bands = serde_json::from_str(
            r#"{"normal": {"min": 60, "max": 100}, "critical": [{"max": 40}, {"min": 150}]}"#,
        )
        .unwrap();
        assert_eq!(many.critical.len(), 2);
        assert!(many.warning.is_empty());
    }

    #[test]
    fn test_config_json_roundtrip_composite() {
        let config = ThresholdConfig::composite(
            "vital_sign",
            Some("blood_pressure"),
            vec![
                ComponentRange::new("systolic", heart_rate_bands(90.0, 120.0)),
                ComponentRange::new("diastolic", heart_rate_bands(60.0, 80.0)),
            ],
        )
        .with_unit("mmHg")
        .with_predicate("age", Predicate::Range { min: Some(65.0), max: None });

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"kind\":\"composite\""));
        let back: ThresholdConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_predicate_matching() {
        let adult = Predicate::Range {
            min: Some(18.0),
            max: None,
        };
        assert!(adult.matches(&AttributeValue::Number(18.0)));
        assert!(adult.matches(&AttributeValue::Number(80.0)));
        assert!(!adult.matches(&AttributeValue::Number(17.0)));
        assert!(!adult.matches(&AttributeValue::Text("adult".to_string())));

        let female = Predicate::Equals(AttributeValue::Text("female".to_string()));
        assert!(female.matches(&AttributeValue::Text("female".to_string())));
        assert!(!female.matches(&AttributeValue::Text("male".to_string())));
    }

    #[test]
    fn test_predicate_deserializes_range_and_scalar() {
        let predicates: BTreeMap<String, Predicate> =
            serde_json::from_str(r#"{"age": {"min": 65}, "sex": "female"}"#).unwrap();
        assert_eq!(
            predicates["age"],
            Predicate::Range {
                min: Some(65.0),
                max: None
            }
        );
        assert_eq!(
            predicates["sex"],
            Predicate::Equals(AttributeValue::Text("female".to_string()))
        );
    }

    #[test]
    fn test_resolve_prefers_matching_non_default() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        registry
            .upsert(
                heart_rate_config(60.0, 100.0)
                    .with_id("default-hr")
                    .as_default(),
                "admin",
            )
            .unwrap();
        registry
            .upsert(
                heart_rate_config(70.0, 120.0)
                    .with_id("child-hr")
                    .with_predicate("age", Predicate::Range { min: None, max: Some(12.0) }),
                "admin",
            )
            .unwrap();

        let child = context(&[("age", AttributeValue::Number(8.0))]);
        let adult = context(&[("age", AttributeValue::Number(40.0))]);

        let resolved = registry
            .resolve("vital_sign", Some("heart_rate"), Some(&child))
            .unwrap();
        assert_eq!(resolved.id, "child-hr");

        let resolved = registry
            .resolve("vital_sign", Some("heart_rate"), Some(&adult))
            .unwrap();
        assert_eq!(resolved.id, "default-hr");
    }

    #[test]
    fn test_resolve_missing_context_key_best_effort_vs_strict() {
        let athlete_child = heart_rate_config(55.0, 110.0)
            .with_id("athlete-child-hr")
            .with_predicate("age", Predicate::Range { min: None, max: Some(12.0) })
            .with_predicate("athlete", Predicate::Equals(AttributeValue::Flag(true)));
        let fallback = heart_rate_config(60.0, 100.0)
            .with_id("default-hr")
            .as_default();
        let child_only = context(&[("age", AttributeValue::Number(8.0))]);

        let lenient = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        lenient.upsert(athlete_child.clone(), "admin").unwrap();
        lenient.upsert(fallback.clone(), "admin").unwrap();
        // best-effort: `age` matches and the missing `athlete` key is skipped
        assert_eq!(
            lenient
                .resolve("vital_sign", Some("heart_rate"), Some(&child_only))
                .unwrap()
                .id,
            "athlete-child-hr"
        );

        let strict = ThresholdRegistry::in_memory(MatchMode::Strict);
        strict.upsert(athlete_child, "admin").unwrap();
        strict.upsert(fallback, "admin").unwrap();
        assert_eq!(
            strict
                .resolve("vital_sign", Some("heart_rate"), Some(&child_only))
                .unwrap()
                .id,
            "default-hr"
        );
    }

    #[test]
    fn test_resolve_without_attributes_uses_default() {
        let specific = heart_rate_config(70.0, 120.0)
            .with_id("child-hr")
            .with_predicate("age", Predicate::Range { min: None, max: Some(12.0) });
        let fallback = heart_rate_config(60.0, 100.0)
            .with_id("default-hr")
            .as_default();
        let empty = PatientContext::new();
        let unrelated = context(&[("sex", AttributeValue::Text("male".to_string()))]);

        for mode in [MatchMode::BestEffort, MatchMode::Strict] {
            let registry = ThresholdRegistry::in_memory(mode);
            registry.upsert(specific.clone(), "admin").unwrap();
            registry.upsert(fallback.clone(), "admin").unwrap();

            for ctx in [None, Some(&empty), Some(&unrelated)] {
                assert_eq!(
                    registry
                        .resolve("vital_sign", Some("heart_rate"), ctx)
                        .unwrap()
                        .id,
                    "default-hr",
                    "{:?} with context {:?}",
                    mode,
                    ctx
                );
            }
        }
    }

    #[test]
    fn test_resolve_prefers_most_specific() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        registry
            .upsert(
                heart_rate_config(60.0, 100.0)
                    .with_id("elderly")
                    .with_predicate("age", Predicate::Range { min: Some(65.0), max: None }),
                "admin",
            )
            .unwrap();
        registry
            .upsert(
                heart_rate_config(55.0, 95.0)
                    .with_id("elderly-athlete")
                    .with_predicate("age", Predicate::Range { min: Some(65.0), max: None })
                    .with_predicate("athlete", Predicate::Equals(AttributeValue::Flag(true))),
                "admin",
            )
            .unwrap();

        let ctx = context(&[
            ("age", AttributeValue::Number(70.0)),
            ("athlete", AttributeValue::Flag(true)),
        ]);
        let resolved = registry
            .resolve("vital_sign", Some("heart_rate"), Some(&ctx))
            .unwrap();
        assert_eq!(resolved.id, "elderly-athlete");
    }

    #[test]
    fn test_resolve_ignores_inactive_and_other_sub_types() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        let mut inactive = heart_rate_config(60.0, 100.0).as_default();
        inactive.is_active = false;
        registry.upsert(inactive, "admin").unwrap();
        registry
            .upsert(
                ThresholdConfig::scalar(
                    "vital_sign",
                    Some("temperature"),
                    heart_rate_bands(36.0, 37.3),
                )
                .as_default(),
                "admin",
            )
            .unwrap();

        let err = registry
            .resolve("vital_sign", Some("heart_rate"), None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[test]
    fn test_upsert_last_writer_wins() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        registry
            .upsert(
                heart_rate_config(60.0, 100.0)
                    .with_id("first")
                    .as_default(),
                "alice",
            )
            .unwrap();
        registry
            .upsert(
                heart_rate_config(55.0, 105.0)
                    .with_id("second")
                    .as_default(),
                "bob",
            )
            .unwrap();

        let first = registry.get("first").unwrap().unwrap();
        assert!(!first.is_active);
        assert_eq!(first.updated_by.as_deref(), Some("bob"));

        let resolved = registry
            .resolve("vital_sign", Some("heart_rate"), None)
            .unwrap();
        assert_eq!(resolved.id, "second");
    }

    #[test]
    fn test_upsert_keeps_creation_audit() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        let config = heart_rate_config(60.0, 100.0).with_id("hr");
        let stored = registry.upsert(config.clone(), "alice").unwrap();
        assert_eq!(stored.created_by.as_deref(), Some("alice"));

        let updated = registry.upsert(config, "bob").unwrap();
        assert_eq!(updated.created_by.as_deref(), Some("alice"));
        assert_eq!(updated.created_at, stored.created_at);
        assert_eq!(updated.updated_by.as_deref(), Some("bob"));
    }

    #[test]
    fn test_upsert_rejects_inverted_band() {
        let registry = ThresholdRegistry::in_memory(MatchMode::BestEffort);
        let bands = Bands::new(Some(Band::between(100.0, 60.0)), vec![], vec![]);
        let err = registry
            .upsert(ThresholdConfig::scalar("vital_sign", Some("heart_rate"), bands), "admin")
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }

    #[test]
    fn test_list_and_delete() {
        let registry = ThresholdRegistry::with_defaults(MatchMode::BestEffort).unwrap();
        let vitals = registry.list(Some("vital_sign")).unwrap();
        assert!(!vitals.is_empty());
        assert!(vitals.iter().all(|c| c.category == "vital_sign"));

        let id = vitals[0].id.clone();
        assert!(registry.delete(&id).unwrap());
        assert!(!registry.delete(&id).unwrap());
        assert!(registry.get(&id).unwrap().is_none());
    }
}
