//! Statistical outlier detection over a measurement series
//!
//! Three interchangeable methods are supported. When a series is too short for
//! the requested method the detector falls back to the absolute `range` check
//! instead of failing.

use crate::analytics::stats::{mean, population_std, sorted};
use crate::error::AnalyticsError;
use crate::measurement::{SeriesPoint, Timestamp};
use crate::thresholds::Band;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default |z| above which a point is anomalous
pub const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Tukey fence multiplier for the IQR method
const IQR_MULTIPLIER: f64 = 1.5;

/// Score bonus for a z-score outlier that also leaves the safe range
const SAFE_RANGE_BONUS: f64 = 50.0;

/// Anomaly detection method
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Distance from the mean in standard deviations
    ZScore,
    /// Outside the Tukey fences around the interquartile range
    Iqr,
    /// Outside an absolute `[min, max]` range
    Range,
}

impl DetectionMethod {
    /// Fewest points the method can work with
    pub fn min_points(self) -> usize {
        match self {
            DetectionMethod::ZScore => 2,
            DetectionMethod::Iqr => 4,
            DetectionMethod::Range => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectionMethod::ZScore => "z_score",
            DetectionMethod::Iqr => "iqr",
            DetectionMethod::Range => "range",
        }
    }
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DetectionMethod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "z_score" | "zscore" | "z-score" => Ok(DetectionMethod::ZScore),
            "iqr" => Ok(DetectionMethod::Iqr),
            "range" => Ok(DetectionMethod::Range),
            other => Err(AnalyticsError::InvalidMethod(other.to_string())),
        }
    }
}

/// A flagged point in a series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    /// Position in the input series
    pub index: usize,
    pub value: f64,
    /// 0-100 for z-score and IQR; range scores may exceed 100
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub reason: String,
}

/// Ranked detection result for one series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyReport {
    pub requested_method: DetectionMethod,
    /// Method actually applied after any fallback
    pub method: DetectionMethod,
    pub fell_back: bool,
    pub series_length: usize,
    /// Sorted by descending score
    pub anomalies: Vec<Anomaly>,
}

/// Flags anomalous points in a numeric series
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyDetector {
    z_threshold: f64,
    safe_range: Option<Band>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DEFAULT_Z_THRESHOLD)
    }
}

impl AnomalyDetector {
    /// Create a detector with the given z-score threshold and no safe range
    pub fn new(z_threshold: f64) -> Self {
        Self {
            z_threshold,
            safe_range: None,
        }
    }

    /// Set the absolute safe range used by the `range` method and the z-score bonus
    pub fn with_safe_range(mut self, band: Band) -> Self {
        self.safe_range = Some(band).filter(Band::is_configured);
        self
    }

    pub fn z_threshold(&self) -> f64 {
        self.z_threshold
    }

    pub fn safe_range(&self) -> Option<Band> {
        self.safe_range
    }

    /// Detect anomalies in `series` with `method`
    ///
    /// Falls back to `range` when the series is shorter than the method needs.
    pub fn detect(&self, series: &[f64], method: DetectionMethod) -> AnomalyReport {
        let applied = if series.len() < method.min_points() {
            debug!(
                "{} needs {} points, got {}; falling back to range",
                method,
                method.min_points(),
                series.len()
            );
            DetectionMethod::Range
        } else {
            method
        };

        let mut anomalies = match applied {
            DetectionMethod::ZScore => self.z_score(series),
            DetectionMethod::Iqr => Self::iqr(series),
            DetectionMethod::Range => self.range(series),
        };
        anomalies.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));

        AnomalyReport {
            requested_method: method,
            method: applied,
            fell_back: applied != method,
            series_length: series.len(),
            anomalies,
        }
    }

    /// Detect anomalies in a timestamped series, attaching timestamps to results
    pub fn detect_points(&self, points: &[SeriesPoint], method: DetectionMethod) -> AnomalyReport {
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let mut report = self.detect(&values, method);
        for anomaly in &mut report.anomalies {
            anomaly.timestamp = points.get(anomaly.index).map(|p| p.timestamp);
        }
        report
    }

    fn z_score(&self, series: &[f64]) -> Vec<Anomaly> {
        let mean = mean(series);
        let std = population_std(series, mean);
        if std < 1e-10 || self.z_threshold <= 0.0 {
            return Vec::new();
        }

        series
            .iter()
            .enumerate()
            .filter_map(|(index, &value)| {
                let z = (value - mean) / std;
                if z.abs() <= self.z_threshold {
                    return None;
                }
                let mut score = (50.0 * z.abs() / self.z_threshold).min(100.0);
                let unsafe_value = self
                    .safe_range
                    .map_or(false, |band| !band.contains(value));
                if unsafe_value {
                    score = (score + SAFE_RANGE_BONUS).min(100.0);
                }
                Some(Anomaly {
                    index,
                    value,
                    score,
                    timestamp: None,
                    reason: format!("z-score {:.2} exceeds {:.2}", z, self.z_threshold),
                })
            })
            .collect()
    }

    fn iqr(series: &[f64]) -> Vec<Anomaly> {
        let sorted = sorted(series);
        let n = sorted.len();
        let q1 = sorted[n / 4];
        let q3 = sorted[(n * 3) / 4];
        let iqr = q3 - q1;
        let fences = Band::between(q1 - IQR_MULTIPLIER * iqr, q3 + IQR_MULTIPLIER * iqr);

        series
            .iter()
            .enumerate()
            .filter(|(_, &value)| !fences.contains(value))
            .map(|(index, &value)| {
                let excess = fences.excess(value);
                let score = if iqr > 0.0 {
                    (50.0 * (1.0 + excess / iqr)).min(100.0)
                } else {
                    100.0
                };
                Anomaly {
                    index,
                    value,
                    score,
                    timestamp: None,
                    reason: format!(
                        "outside IQR fences [{:.2}, {:.2}]",
                        q1 - IQR_MULTIPLIER * iqr,
                        q3 + IQR_MULTIPLIER * iqr
                    ),
                }
            })
            .collect()
    }

    fn range(&self, series: &[f64]) -> Vec<Anomaly> {
        let band = match self.safe_range {
            Some(band) => band,
            None => {
                debug!("No safe range configured; range detection flags nothing");
                return Vec::new();
            }
        };
        let span = match (band.min, band.max) {
            (Some(min), Some(max)) if max > min => max - min,
            (Some(bound), None) | (None, Some(bound)) => bound.abs().max(1.0),
            _ => 1.0,
        };

        series
            .iter()
            .enumerate()
            .filter(|(_, &value)| !band.contains(value))
            .map(|(index, &value)| Anomaly {
                index,
                value,
                score: 50.0 + 50.0 * band.excess(value) / span,
                timestamp: None,
                reason: format!("outside safe range {}", describe(band)),
            })
            .collect()
    }
}

fn describe(band: Band) -> String {
    match (band.min, band.max) {
        (Some(min), Some(max)) => format!("[{}, {}]", min, max),
        (Some(min), None) => format!("[{}, +inf)", min),
        (None, Some(max)) => format!("(-inf, {}]", max),
        (None, None) => "(unbounded)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    const HEART_RATES: [f64; 5] = [70.0, 72.0, 71.0, 150.0, 69.0];

    #[test]
    fn test_method_parsing() {
        assert_eq!("z_score".parse::<DetectionMethod>().unwrap(), DetectionMethod::ZScore);
        assert_eq!("ZScore".parse::<DetectionMethod>().unwrap(), DetectionMethod::ZScore);
        assert_eq!("iqr".parse::<DetectionMethod>().unwrap(), DetectionMethod::Iqr);
        assert_eq!("range".parse::<DetectionMethod>().unwrap(), DetectionMethod::Range);
        assert!(matches!(
            "median".parse::<DetectionMethod>(),
            Err(AnalyticsError::InvalidMethod(_))
        ));
        assert_eq!(
            serde_json::to_string(&DetectionMethod::ZScore).unwrap(),
            "\"z_score\""
        );
    }

    #[test]
    fn test_range_wide_bounds_flags_nothing() {
        let detector = AnomalyDetector::default().with_safe_range(Band::between(40.0, 160.0));
        let report = detector.detect(&HEART_RATES, DetectionMethod::Range);
        assert!(report.anomalies.is_empty());
        assert!(!report.fell_back);
    }

    #[test]
    fn test_range_tight_bounds_flags_spike_only() {
        let detector = AnomalyDetector::default().with_safe_range(Band::between(60.0, 100.0));
        let report = detector.detect(&HEART_RATES, DetectionMethod::Range);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].index, 3);
        assert_eq!(report.anomalies[0].value, 150.0);
        // 50 beyond a 40-wide range
        assert!((report.anomalies[0].score - 112.5).abs() < 1e-9);
    }

    #[test]
    fn test_range_without_bounds_flags_nothing() {
        let report = AnomalyDetector::default().detect(&HEART_RATES, DetectionMethod::Range);
        assert!(report.anomalies.is_empty());
    }

    #[test]
    fn test_z_score_constant_series() {
        let detector = AnomalyDetector::new(1.0);
        let report = detector.detect(&[80.0; 12], DetectionMethod::ZScore);
        assert!(report.anomalies.is_empty());
        assert_eq!(report.method, DetectionMethod::ZScore);
    }

    #[test]
    fn test_z_score_flags_spike() {
        let mut series = vec![70.0, 71.0, 69.0, 70.0, 72.0, 68.0, 70.0, 71.0, 69.0, 70.0];
        series.push(140.0);
        let detector = AnomalyDetector::new(2.5);
        let report = detector.detect(&series, DetectionMethod::ZScore);
        assert_eq!(report.anomalies.len(), 1);
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.index, 10);
        assert!(anomaly.score > 50.0 && anomaly.score <= 100.0);
    }

    #[test]
    fn test_z_score_safe_range_bonus_saturates() {
        let mut series = vec![70.0; 19];
        series.push(71.0);
        series.push(200.0);
        let plain = AnomalyDetector::new(3.0).detect(&series, DetectionMethod::ZScore);
        let bonus = AnomalyDetector::new(3.0)
            .with_safe_range(Band::between(40.0, 160.0))
            .detect(&series, DetectionMethod::ZScore);

        assert_eq!(plain.anomalies.len(), 1);
        assert_eq!(bonus.anomalies.len(), 1);
        assert!(bonus.anomalies[0].score > plain.anomalies[0].score);
        assert!(bonus.anomalies[0].score <= 100.0);
    }

    #[test]
    fn test_iqr_positional_quartiles() {
        let report = AnomalyDetector::default().detect(&HEART_RATES, DetectionMethod::Iqr);
        assert_eq!(report.method, DetectionMethod::Iqr);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.anomalies[0].index, 3);
        assert_eq!(report.anomalies[0].score, 100.0);
    }

    #[test]
    fn test_short_series_falls_back_to_range() {
        let detector = AnomalyDetector::default().with_safe_range(Band::between(60.0, 100.0));
        let report = detector.detect(&[70.0, 150.0, 80.0], DetectionMethod::Iqr);
        assert!(report.fell_back);
        assert_eq!(report.requested_method, DetectionMethod::Iqr);
        assert_eq!(report.method, DetectionMethod::Range);
        assert_eq!(report.anomalies.len(), 1);

        let report = detector.detect(&[150.0], DetectionMethod::ZScore);
        assert!(report.fell_back);
        assert_eq!(report.anomalies.len(), 1);
    }

    #[test]
    fn test_empty_series() {
        let report = AnomalyDetector::default().detect(&[], DetectionMethod::ZScore);
        assert!(report.anomalies.is_empty());
        assert_eq!(report.series_length, 0);
        assert_eq!(report.method, DetectionMethod::Range);
    }

    #[test]
    fn test_results_sorted_by_score() {
        let detector = AnomalyDetector::default().with_safe_range(Band::between(60.0, 100.0));
        let report = detector.detect(&[120.0, 70.0, 200.0, 50.0], DetectionMethod::Range);
        let indices: Vec<usize> = report.anomalies.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![2, 0, 3]);
        assert!(report
            .anomalies
            .windows(2)
            .all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn test_detect_points_attaches_timestamps() {
        let start = Utc::now() - Duration::hours(5);
        let points: Vec<SeriesPoint> = HEART_RATES
            .iter()
            .enumerate()
            .map(|(i, &v)| SeriesPoint::new(start + Duration::hours(i as i64), v))
            .collect();
        let detector = AnomalyDetector::default().with_safe_range(Band::between(60.0, 100.0));
        let report = detector.detect_points(&points, DetectionMethod::Range);
        assert_eq!(report.anomalies[0].timestamp, Some(points[3].timestamp));
    }
}
