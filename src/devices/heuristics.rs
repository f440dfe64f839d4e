//! Built-in device health heuristics
//!
//! Each heuristic inspects one signal of a device and contributes points to
//! its status score when that signal looks unhealthy. Heuristics are
//! independent: several can fire for the same device.

use crate::devices::status_scorer::{Device, DeviceState};
use crate::measurement::Timestamp;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// One problem found on a device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Name of the heuristic that produced it
    pub heuristic: String,
    pub points: u32,
    pub issue: String,
    pub recommendation: String,
}

impl Finding {
    fn new(heuristic: &str, points: u32, issue: String, recommendation: &str) -> Self {
        Self {
            heuristic: heuristic.to_string(),
            points,
            issue,
            recommendation: recommendation.to_string(),
        }
    }
}

/// A single scoring rule applied to a device snapshot
pub trait DeviceHeuristic: Send + Sync {
    /// Inspect the device and report a finding if the rule fires
    fn evaluate(&self, device: &Device, now: Timestamp) -> Option<Finding>;

    /// Get a human-readable name for this heuristic
    fn name(&self) -> &str;
}

/// Penalises devices that are not reporting normally
pub struct ConnectivityRule;

impl DeviceHeuristic for ConnectivityRule {
    fn evaluate(&self, device: &Device, _now: Timestamp) -> Option<Finding> {
        let (points, issue, recommendation) = match device.state {
            DeviceState::Online => return None,
            DeviceState::Error => (
                80,
                "Device is reporting an error state",
                "Restart the device and contact support if the error persists",
            ),
            DeviceState::Offline => (
                50,
                "Device is offline",
                "Check power and network connectivity",
            ),
            DeviceState::Idle => (
                20,
                "Device is idle",
                "Confirm the patient is wearing or using the device",
            ),
        };
        Some(Finding::new(self.name(), points, issue.to_string(), recommendation))
    }

    fn name(&self) -> &str {
        "connectivity"
    }
}

/// Penalises low battery in three steps
pub struct BatteryRule;

impl DeviceHeuristic for BatteryRule {
    fn evaluate(&self, device: &Device, _now: Timestamp) -> Option<Finding> {
        let level = device.battery_level?;
        let (points, recommendation) = if level < 10.0 {
            (50, "Charge the device immediately")
        } else if level < 20.0 {
            (30, "Charge the device soon")
        } else if level < 30.0 {
            (10, "Plan to charge the device")
        } else {
            return None;
        };
        Some(Finding::new(
            self.name(),
            points,
            format!("Battery low ({:.0}%)", level),
            recommendation,
        ))
    }

    fn name(&self) -> &str {
        "battery"
    }
}

/// Penalises weak radio signal, measured in bars
pub struct SignalRule;

impl DeviceHeuristic for SignalRule {
    fn evaluate(&self, device: &Device, _now: Timestamp) -> Option<Finding> {
        let bars = device.signal_strength?;
        let (points, recommendation) = match bars {
            0 | 1 => (30, "Move the device closer to its gateway"),
            2 => (10, "Check for interference near the device"),
            _ => return None,
        };
        Some(Finding::new(
            self.name(),
            points,
            format!("Weak signal ({} bars)", bars),
            recommendation,
        ))
    }

    fn name(&self) -> &str {
        "signal"
    }
}

/// Penalises devices that have not synced recently
pub struct StalenessRule;

impl DeviceHeuristic for StalenessRule {
    fn evaluate(&self, device: &Device, now: Timestamp) -> Option<Finding> {
        let last_sync = match device.last_sync {
            Some(last_sync) => last_sync,
            None => {
                return Some(Finding::new(
                    self.name(),
                    40,
                    "Device has never synced".to_string(),
                    "Pair the device and run an initial sync",
                ))
            }
        };

        let age = now - last_sync;
        let (points, recommendation) = if age > Duration::days(7) {
            (50, "Re-pair the device and verify the patient still has it")
        } else if age > Duration::days(3) {
            (30, "Ask the patient to sync the device")
        } else if age > Duration::days(1) {
            (10, "Remind the patient to sync daily")
        } else {
            return None;
        };
        Some(Finding::new(
            self.name(),
            points,
            format!("Last sync {} hours ago", age.num_hours()),
            recommendation,
        ))
    }

    fn name(&self) -> &str {
        "staleness"
    }
}

/// Flags pending firmware updates
pub struct FirmwareRule;

impl DeviceHeuristic for FirmwareRule {
    fn evaluate(&self, device: &Device, _now: Timestamp) -> Option<Finding> {
        if !device.firmware_update_available {
            return None;
        }
        let issue = match device.firmware_version.as_deref() {
            Some(version) => format!("Firmware update available (running {})", version),
            None => "Firmware update available".to_string(),
        };
        Some(Finding::new(
            self.name(),
            10,
            issue,
            "Install the pending firmware update",
        ))
    }

    fn name(&self) -> &str {
        "firmware"
    }
}

/// The standard heuristic set in evaluation order
pub fn default_heuristics() -> Vec<Box<dyn DeviceHeuristic>> {
    vec![
        Box::new(ConnectivityRule),
        Box::new(BatteryRule),
        Box::new(SignalRule),
        Box::new(StalenessRule),
        Box::new(FirmwareRule),
    ]
}
