use crate::devices::heuristics::{default_heuristics, DeviceHeuristic, Finding};
use crate::measurement::{Severity, Timestamp};
use log::debug;
use serde::{Deserialize, Serialize};

/// Score above which a device is reported as needing attention
pub const DEFAULT_WARNING_SCORE: u32 = 20;

/// Score at or above which a device issue is critical
pub const DEFAULT_CRITICAL_SCORE: u32 = 70;

const MAX_SCORE: u32 = 100;

/// Connectivity state reported by a device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Online,
    Idle,
    Offline,
    Error,
}

/// A registered monitoring device
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub state: DeviceState,
    /// Percent, 0-100
    #[serde(default)]
    pub battery_level: Option<f64>,
    /// Signal bars, 0-5
    #[serde(default)]
    pub signal_strength: Option<u8>,
    /// `None` if the device never synced
    #[serde(default)]
    pub last_sync: Option<Timestamp>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub firmware_update_available: bool,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            patient_id: None,
            name: None,
            device_type: None,
            state: DeviceState::Online,
            battery_level: None,
            signal_strength: None,
            last_sync: None,
            firmware_version: None,
            firmware_update_available: false,
        }
    }

    /// Copy of the registered device with any live readings applied on top
    pub fn with_live(&self, live: &LiveSignals) -> Self {
        let mut device = self.clone();
        if let Some(state) = live.state {
            device.state = state;
        }
        if let Some(level) = live.battery_level {
            device.battery_level = Some(level);
        }
        if let Some(bars) = live.signal_strength {
            device.signal_strength = Some(bars);
        }
        if let Some(last_sync) = live.last_sync {
            device.last_sync = Some(last_sync);
        }
        if let Some(pending) = live.firmware_update_available {
            device.firmware_update_available = pending;
        }
        device
    }
}

/// Fresh telemetry overriding the registered device record
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LiveSignals {
    #[serde(default)]
    pub state: Option<DeviceState>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    #[serde(default)]
    pub signal_strength: Option<u8>,
    #[serde(default)]
    pub last_sync: Option<Timestamp>,
    #[serde(default)]
    pub firmware_update_available: Option<bool>,
}

/// Scored health of one device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceHealth {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    /// 0-100, higher is worse
    pub score: u32,
    pub needs_attention: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Empty unless the device needs attention
    pub issues: Vec<String>,
    /// Empty unless the device needs attention
    pub recommendations: Vec<String>,
    /// Every heuristic that contributed to `score`
    pub findings: Vec<Finding>,
}

/// Combines independent device heuristics into a single score
pub struct DeviceStatusScorer {
    heuristics: Vec<Box<dyn DeviceHeuristic>>,
    warning_score: u32,
    critical_score: u32,
}

impl Default for DeviceStatusScorer {
    fn default() -> Self {
        Self::new(DEFAULT_WARNING_SCORE, DEFAULT_CRITICAL_SCORE)
    }
}

impl std::fmt::Debug for DeviceStatusScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.heuristics.iter().map(|h| h.name()).collect();
        f.debug_struct("DeviceStatusScorer")
            .field("heuristics", &names)
            .field("warning_score", &self.warning_score)
            .field("critical_score", &self.critical_score)
            .finish()
    }
}

impl DeviceStatusScorer {
    /// Create a scorer with the standard heuristics
    ///
    /// # Arguments
    ///
    /// * `warning_score` - Devices scoring strictly above this need attention
    /// * `critical_score` - Devices scoring at or above this are critical
    pub fn new(warning_score: u32, critical_score: u32) -> Self {
        Self {
            heuristics: default_heuristics(),
            warning_score,
            critical_score,
        }
    }

    /// Add a heuristic to the scorer
    pub fn add_heuristic(&mut self, heuristic: Box<dyn DeviceHeuristic>) {
        self.heuristics.push(heuristic);
    }

    /// Get the number of configured heuristics
    pub fn heuristic_count(&self) -> usize {
        self.heuristics.len()
    }

    /// Severity for a score, `None` when the device does not need attention
    pub fn severity_for(&self, score: u32) -> Option<Severity> {
        if score >= self.critical_score {
            Some(Severity::Critical)
        } else if score > self.warning_score {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    /// Score a device with live readings applied, as of `now`
    pub fn score(&self, device: &Device, live: &LiveSignals, now: Timestamp) -> DeviceHealth {
        let snapshot = device.with_live(live);
        let findings: Vec<Finding> = self
            .heuristics
            .iter()
            .filter_map(|heuristic| heuristic.evaluate(&snapshot, now))
            .collect();

        let score = findings
            .iter()
            .map(|f| f.points)
            .sum::<u32>()
            .min(MAX_SCORE);
        let needs_attention = score > self.warning_score;
        debug!("Device {} scored {} from {} findings", device.id, score, findings.len());

        let (issues, recommendations) = if needs_attention {
            findings
                .iter()
                .map(|f| (f.issue.clone(), f.recommendation.clone()))
                .unzip()
        } else {
            (Vec::new(), Vec::new())
        };

        DeviceHealth {
            device_id: snapshot.id.clone(),
            patient_id: snapshot.patient_id.clone(),
            score,
            needs_attention,
            severity: self.severity_for(score),
            issues,
            recommendations,
            findings,
        }
    }

    /// Score many devices and keep those needing attention, worst first
    pub fn rank<'a, I>(&self, devices: I, now: Timestamp) -> Vec<DeviceHealth>
    where
        I: IntoIterator<Item = (&'a Device, &'a LiveSignals)>,
    {
        let mut ranked: Vec<DeviceHealth> = devices
            .into_iter()
            .map(|(device, live)| self.score(device, live, now))
            .filter(|health| health.needs_attention)
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then(a.device_id.cmp(&b.device_id)));
        ranked
    }
}
