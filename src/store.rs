//! Storage seams between the engine and the surrounding application
//!
//! The engine only needs three collaborators: a source of timestamped
//! measurements, a threshold configuration store and an alert sink. Each is a
//! trait so the host application can back it with its own database; the
//! in-memory implementations here serve tests, the CLI and small deployments.

use crate::alerts::{Alert, AlertFilter, AlertStatus};
use crate::error::StoreError;
use crate::measurement::{Measurement, Timestamp};
use crate::thresholds::ThresholdConfig;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Selection of measurements for one patient or device over a time range
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementQuery {
    /// Patient id, or device id for device telemetry
    pub subject_id: String,
    pub category: Option<String>,
    pub sub_type: Option<String>,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Keep at most this many of the most recent measurements
    pub limit: Option<usize>,
}

/// Source of recorded measurements
#[cfg_attr(test, mockall::automock)]
pub trait MeasurementStore: Send + Sync {
    /// Fetch matching measurements ordered by timestamp, oldest first
    fn fetch(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>, StoreError>;
}

/// Persistence for threshold configurations
pub trait ConfigStore: Send + Sync {
    fn list(&self) -> Result<Vec<ThresholdConfig>, StoreError>;
    fn get(&self, id: &str) -> Result<Option<ThresholdConfig>, StoreError>;
    /// Insert or replace by id
    fn upsert(&self, config: ThresholdConfig) -> Result<(), StoreError>;
    /// Remove by id; returns whether a record was removed
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
}

/// Append-mostly alert ledger
pub trait AlertSink: Send + Sync {
    fn insert(&self, alert: Alert) -> Result<(), StoreError>;
    /// Replace an alert by id only while the stored record is still active
    ///
    /// The status check and the write must be atomic. Returns `false`
    /// without writing when the stored alert has already left `active`.
    fn update_if_active(&self, alert: Alert) -> Result<bool, StoreError>;
    fn get(&self, id: &str) -> Result<Option<Alert>, StoreError>;
    /// Alerts matching the filter, oldest first
    fn query(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError>;
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
}

/// Measurement store held in memory
#[derive(Debug, Default)]
pub struct InMemoryMeasurementStore {
    measurements: RwLock<Vec<Measurement>>,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a measurement; existing records are never modified
    pub fn record(&self, measurement: Measurement) -> Result<(), StoreError> {
        write(&self.measurements)?.push(measurement);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.measurements.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MeasurementStore for InMemoryMeasurementStore {
    fn fetch(&self, query: &MeasurementQuery) -> Result<Vec<Measurement>, StoreError> {
        let measurements = read(&self.measurements)?;
        let mut selected: Vec<Measurement> = measurements
            .iter()
            .filter(|m| {
                (m.patient_id == query.subject_id
                    || m.device_id.as_deref() == Some(query.subject_id.as_str()))
                    && query.category.as_deref().map_or(true, |c| m.category == c)
                    && query
                        .sub_type
                        .as_deref()
                        .map_or(true, |s| m.sub_type.as_deref() == Some(s))
                    && m.timestamp >= query.start
                    && m.timestamp <= query.end
            })
            .cloned()
            .collect();
        selected.sort_by_key(|m| m.timestamp);

        if let Some(limit) = query.limit {
            let excess = selected.len().saturating_sub(limit);
            selected.drain(..excess);
        }
        Ok(selected)
    }
}

/// Threshold config store held in memory
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<String, ThresholdConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn list(&self) -> Result<Vec<ThresholdConfig>, StoreError> {
        Ok(read(&self.configs)?.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<ThresholdConfig>, StoreError> {
        Ok(read(&self.configs)?.get(id).cloned())
    }

    fn upsert(&self, config: ThresholdConfig) -> Result<(), StoreError> {
        write(&self.configs)?.insert(config.id.clone(), config);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(write(&self.configs)?.remove(id).is_some())
    }
}

/// Alert ledger held in memory, in insertion order
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertSink for InMemoryAlertSink {
    fn insert(&self, alert: Alert) -> Result<(), StoreError> {
        write(&self.alerts)?.push(alert);
        Ok(())
    }

    fn update_if_active(&self, alert: Alert) -> Result<bool, StoreError> {
        let mut alerts = write(&self.alerts)?;
        match alerts.iter_mut().find(|existing| existing.id == alert.id) {
            Some(existing) if existing.status == AlertStatus::Active => {
                *existing = alert;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(alert.id)),
        }
    }

    fn get(&self, id: &str) -> Result<Option<Alert>, StoreError> {
        Ok(read(&self.alerts)?.iter().find(|a| a.id == id).cloned())
    }

    fn query(&self, filter: &AlertFilter) -> Result<Vec<Alert>, StoreError> {
        Ok(read(&self.alerts)?
            .iter()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect())
    }
}
