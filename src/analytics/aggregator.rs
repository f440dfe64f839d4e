//! Calendar bucketing of timestamped series
//!
//! Raw samples are grouped into hour, day, Monday-anchored week or month
//! buckets. Only periods that contain at least one sample produce a bucket, and
//! buckets come out in chronological order.

use crate::analytics::stats::SeriesStats;
use crate::error::AnalyticsError;
use crate::measurement::{SeriesPoint, Timestamp};
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Calendar bucket width
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl Interval {
    /// Start of the bucket containing `ts`
    pub fn truncate(self, ts: Timestamp) -> Timestamp {
        match self {
            Interval::Hour => ts
                .with_minute(0)
                .and_then(|t| t.with_second(0))
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(ts),
            Interval::Day => midnight(ts.date_naive()),
            Interval::Week => {
                let date = ts.date_naive();
                let offset = date.weekday().num_days_from_monday() as i64;
                midnight(date - Duration::days(offset))
            }
            Interval::Month => {
                let date = ts.date_naive();
                midnight(date.with_day(1).unwrap_or(date))
            }
        }
    }

    /// Start of the bucket `steps` intervals after `start`
    pub fn advance(self, start: Timestamp, steps: u32) -> Timestamp {
        match self {
            Interval::Hour => start + Duration::hours(steps as i64),
            Interval::Day => start + Duration::days(steps as i64),
            Interval::Week => start + Duration::weeks(steps as i64),
            Interval::Month => start.checked_add_months(Months::new(steps)).unwrap_or(start),
        }
    }

    /// Number of buckets needed to cover `days` days, rounding up
    ///
    /// A month counts as 30 days.
    pub fn buckets_for_days(self, days: u32) -> usize {
        let buckets = match self {
            Interval::Hour => days.saturating_mul(24),
            Interval::Day => days,
            Interval::Week => days.div_ceil(7),
            Interval::Month => days.div_ceil(30),
        };
        buckets as usize
    }

    /// Display key for a bucket starting at `start`
    pub fn key(self, start: Timestamp) -> String {
        match self {
            Interval::Hour => start.format("%Y-%m-%d %H:00").to_string(),
            Interval::Day | Interval::Week => start.format("%Y-%m-%d").to_string(),
            Interval::Month => start.format("%Y-%m").to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Hour => "hour",
            Interval::Day => "day",
            Interval::Week => "week",
            Interval::Month => "month",
        }
    }
}

fn midnight(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hourly" => Ok(Interval::Hour),
            "day" | "daily" => Ok(Interval::Day),
            "week" | "weekly" => Ok(Interval::Week),
            "month" | "monthly" => Ok(Interval::Month),
            other => Err(AnalyticsError::InvalidInterval(other.to_string())),
        }
    }
}

/// Summary statistics for one calendar bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub key: String,
    pub start: Timestamp,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub max: f64,
    pub min: f64,
    /// Population standard deviation, 0 for single-sample buckets
    pub std: f64,
}

impl Bucket {
    fn new(interval: Interval, start: Timestamp, values: &[f64]) -> Self {
        let stats = SeriesStats::from_values(values);
        Self {
            key: interval.key(start),
            start,
            count: stats.count,
            mean: stats.mean,
            median: stats.median,
            max: stats.max,
            min: stats.min,
            std: stats.std,
        }
    }
}

/// Groups a series into calendar buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeriesAggregator {
    interval: Interval,
}

impl SeriesAggregator {
    pub fn new(interval: Interval) -> Self {
        Self { interval }
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Bucket `points`; input order does not matter
    ///
    /// Every sample lands in exactly one bucket. A NaN or infinite value is
    /// rejected with `InvalidInput` rather than skipped.
    pub fn aggregate(&self, points: &[SeriesPoint]) -> Result<Vec<Bucket>, AnalyticsError> {
        let mut grouped: BTreeMap<Timestamp, Vec<f64>> = BTreeMap::new();
        for point in points {
            if !point.value.is_finite() {
                return Err(AnalyticsError::InvalidInput(format!(
                    "non-finite value {} at {}",
                    point.value, point.timestamp
                )));
            }
            grouped
                .entry(self.interval.truncate(point.timestamp))
                .or_default()
                .push(point.value);
        }

        Ok(grouped
            .into_iter()
            .map(|(start, values)| Bucket::new(self.interval, start, &values))
            .collect())
    }

    /// Bucket parallel value and timestamp slices
    pub fn aggregate_values(
        &self,
        values: &[f64],
        timestamps: &[Timestamp],
    ) -> Result<Vec<Bucket>, AnalyticsError> {
        if values.len() != timestamps.len() {
            return Err(AnalyticsError::InvalidInput(format!(
                "{} values but {} timestamps",
                values.len(),
                timestamps.len()
            )));
        }
        let points: Vec<SeriesPoint> = timestamps
            .iter()
            .zip(values)
            .map(|(&timestamp, &value)| SeriesPoint::new(timestamp, value))
            .collect();
        self.aggregate(&points)
    }
}

/// Bucket means in order, the series fed to trend and forecast
pub fn bucket_means(buckets: &[Bucket]) -> Vec<f64> {
    buckets.iter().map(|b| b.mean).collect()
}

/// Points no older than `window` before `now`, oldest first
pub fn recent(points: &[SeriesPoint], window: Duration, now: Timestamp) -> Vec<SeriesPoint> {
    let cutoff = now - window;
    let mut selected: Vec<SeriesPoint> = points
        .iter()
        .filter(|p| p.timestamp >= cutoff && p.timestamp <= now)
        .copied()
        .collect();
    selected.sort_by_key(|p| p.timestamp);
    selected
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn points_from(offsets: &[(u32, i16)]) -> Vec<SeriesPoint> {
        let base = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        offsets
            .iter()
            .map(|&(minutes, value)| {
                SeriesPoint::new(base + Duration::minutes((minutes % 525_600) as i64), value as f64)
            })
            .collect()
    }

    // Bucket counts always add up to the number of samples
    #[quickcheck]
    fn prop_counts_are_conserved(offsets: Vec<(u32, i16)>) -> bool {
        let points = points_from(&offsets);
        [Interval::Hour, Interval::Day, Interval::Week, Interval::Month]
            .iter()
            .all(|&interval| {
                let buckets = SeriesAggregator::new(interval).aggregate(&points).unwrap();
                buckets.iter().map(|b| b.count).sum::<usize>() == points.len()
            })
    }

    // Buckets are chronological and every bucket holds at least one sample
    #[quickcheck]
    fn prop_buckets_ordered_and_non_empty(offsets: Vec<(u32, i16)>) -> bool {
        let points = points_from(&offsets);
        let buckets = SeriesAggregator::new(Interval::Week).aggregate(&points).unwrap();
        buckets.windows(2).all(|pair| pair[0].start < pair[1].start)
            && buckets.iter().all(|b| b.count >= 1 && b.min <= b.mean && b.mean <= b.max)
    }
}
