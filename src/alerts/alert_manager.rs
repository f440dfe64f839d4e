use crate::error::AlertError;
use crate::measurement::{MeasurementValue, Severity, Timestamp};
use crate::store::{AlertSink, InMemoryAlertSink};
use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Longest alert message kept, in bytes
const MAX_MESSAGE_LENGTH: usize = 1024;

/// Lifecycle state of an alert
///
/// `Active` is the only non-terminal state. Alerts are never deleted, so the
/// ledger doubles as an audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Resolved,
    Ignored,
}

impl AlertStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AlertStatus::Active)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Ignored => "ignored",
        };
        write!(f, "{}", text)
    }
}

/// What an alert refers to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertSubject {
    /// A single recorded measurement
    Measurement { id: String },
    /// A monitoring device
    Device { id: String },
    /// A point inside an analysed series
    Series {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Timestamp>,
    },
}

/// Component that raised an alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    Threshold,
    Anomaly,
    DeviceStatus,
}

/// Who closed an alert, when and why
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resolution {
    pub by: String,
    pub at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Alert proposed by a classifier, detector or scorer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertCandidate {
    pub subject: AlertSubject,
    pub patient_id: String,
    pub category: String,
    pub sub_type: Option<String>,
    pub value: Option<MeasurementValue>,
    pub severity: Severity,
    pub source: AlertSource,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: String,
    pub subject: AlertSubject,
    pub patient_id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<MeasurementValue>,
    pub severity: Severity,
    pub status: AlertStatus,
    pub source: AlertSource,
    pub message: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Alert {
    fn from_candidate(candidate: AlertCandidate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject: candidate.subject,
            patient_id: candidate.patient_id,
            category: candidate.category,
            sub_type: candidate.sub_type,
            value: candidate.value,
            severity: candidate.severity,
            status: AlertStatus::Active,
            source: candidate.source,
            message: truncate_text(&candidate.message, MAX_MESSAGE_LENGTH),
            created_at: Utc::now(),
            resolution: None,
        }
    }
}

/// Alert selection; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertFilter {
    pub patient_id: Option<String>,
    pub status: Option<AlertStatus>,
    /// Lowest severity included
    pub min_severity: Option<Severity>,
    pub category: Option<String>,
}

impl AlertFilter {
    pub fn for_patient(patient_id: &str) -> Self {
        Self {
            patient_id: Some(patient_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.patient_id
            .as_deref()
            .map_or(true, |p| alert.patient_id == p)
            && self.status.map_or(true, |s| alert.status == s)
            && self.min_severity.map_or(true, |s| alert.severity >= s)
            && self.category.as_deref().map_or(true, |c| alert.category == c)
    }
}

/// Alert totals per lifecycle state
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertCounts {
    pub active: usize,
    pub resolved: usize,
    pub ignored: usize,
}

/// Materialises alerts and drives their lifecycle
///
/// Candidates below the severity floor are dropped. Repeated candidates for
/// the same measurement category each produce a new alert; callers that want
/// deduplication filter before calling [`AlertManager::create_alert`].
#[derive(Clone)]
pub struct AlertManager {
    sink: Arc<dyn AlertSink>,
    floor: Severity,
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertManager")
            .field("floor", &self.floor)
            .finish_non_exhaustive()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::in_memory(Severity::Warning)
    }
}

impl AlertManager {
    /// Create an alert manager writing to `sink`
    ///
    /// # Arguments
    ///
    /// * `sink` - Alert ledger
    /// * `floor` - Lowest severity that materialises an alert
    pub fn new(sink: Arc<dyn AlertSink>, floor: Severity) -> Self {
        Self { sink, floor }
    }

    /// Create an alert manager backed by an in-memory ledger
    pub fn in_memory(floor: Severity) -> Self {
        Self::new(Arc::new(InMemoryAlertSink::new()), floor)
    }

    pub fn floor(&self) -> Severity {
        self.floor
    }

    /// Persist a new active alert for `candidate`
    ///
    /// # Returns
    ///
    /// `Ok(Some(alert))` when the alert was stored, `Ok(None)` when the
    /// candidate is below the severity floor
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` if the ledger rejects the insert.
    pub fn create_alert(&self, candidate: AlertCandidate) -> Result<Option<Alert>, AlertError> {
        if candidate.severity < self.floor {
            debug!(
                "Skipping {} alert below {} floor: {}",
                candidate.severity, self.floor, candidate.message
            );
            return Ok(None);
        }

        let alert = Alert::from_candidate(candidate);
        self.sink.insert(alert.clone())?;
        info!(
            "Created {} alert {} for patient {}: {}",
            alert.severity, alert.id, alert.patient_id, alert.message
        );
        Ok(Some(alert))
    }

    /// Close an active alert as resolved
    pub fn resolve(&self, id: &str, by: &str, notes: Option<&str>) -> Result<Alert, AlertError> {
        self.transition(id, AlertStatus::Resolved, by, notes)
    }

    /// Close an active alert as ignored
    pub fn ignore(&self, id: &str, by: &str, notes: Option<&str>) -> Result<Alert, AlertError> {
        self.transition(id, AlertStatus::Ignored, by, notes)
    }

    fn transition(
        &self,
        id: &str,
        to: AlertStatus,
        by: &str,
        notes: Option<&str>,
    ) -> Result<Alert, AlertError> {
        let mut alert = self.get(id)?;
        if alert.status.is_terminal() {
            return Err(self.rejected(id, alert.status, to));
        }

        alert.status = to;
        alert.resolution = Some(Resolution {
            by: by.to_string(),
            at: Utc::now(),
            notes: notes.map(str::to_string),
        });
        if !self.sink.update_if_active(alert.clone())? {
            // Another caller closed the alert between the read and the write
            let current = self.get(id)?;
            return Err(self.rejected(id, current.status, to));
        }
        info!("Alert {} marked {} by {}", id, to, by);
        Ok(alert)
    }

    fn rejected(&self, id: &str, from: AlertStatus, to: AlertStatus) -> AlertError {
        warn!("Rejected transition of alert {} from {} to {}", id, from, to);
        AlertError::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        }
    }

    pub fn get(&self, id: &str) -> Result<Alert, AlertError> {
        self.sink
            .get(id)?
            .ok_or_else(|| AlertError::NotFound(id.to_string()))
    }

    pub fn query(&self, filter: &AlertFilter) -> Result<Vec<Alert>, AlertError> {
        Ok(self.sink.query(filter)?)
    }

    /// Active alerts for a patient, most severe first then newest first
    pub fn active_alerts(&self, patient_id: &str) -> Result<Vec<Alert>, AlertError> {
        let mut alerts =
            self.query(&AlertFilter::for_patient(patient_id).with_status(AlertStatus::Active))?;
        alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(alerts)
    }

    pub fn counts(&self, patient_id: &str) -> Result<AlertCounts, AlertError> {
        let mut counts = AlertCounts::default();
        for alert in self.query(&AlertFilter::for_patient(patient_id))? {
            match alert.status {
                AlertStatus::Active => counts.active += 1,
                AlertStatus::Resolved => counts.resolved += 1,
                AlertStatus::Ignored => counts.ignored += 1,
            }
        }
        Ok(counts)
    }
}

/// Truncate text to at most `max_length` bytes on a UTF-8 boundary
fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}
