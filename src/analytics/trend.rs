//! Linear trend over an aggregated series

use crate::analytics::stats::LinearFit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default |slope| per bucket below which a series counts as stable
pub const DEFAULT_STABLE_SLOPE: f64 = 0.01;

/// Default number of buckets in the short-horizon prediction
pub const DEFAULT_SHORT_HORIZON: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrendDirection::Rising => "rising",
            TrendDirection::Falling => "falling",
            TrendDirection::Stable => "stable",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrendEstimate {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub direction: TrendDirection,
    /// Relative change from first to last value, 0 when the first value is 0
    pub change_rate_percent: f64,
}

/// Fits an OLS line over bucket index and classifies its direction
///
/// The stable band is an absolute slope, so series with large magnitudes
/// rarely read as stable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendEstimator {
    stable_slope: f64,
    short_horizon: usize,
}

impl Default for TrendEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_STABLE_SLOPE, DEFAULT_SHORT_HORIZON)
    }
}

impl TrendEstimator {
    pub fn new(stable_slope: f64, short_horizon: usize) -> Self {
        Self {
            stable_slope: stable_slope.abs(),
            short_horizon,
        }
    }

    pub fn short_horizon(&self) -> usize {
        self.short_horizon
    }

    pub fn direction(&self, slope: f64) -> TrendDirection {
        if slope > self.stable_slope {
            TrendDirection::Rising
        } else if slope < -self.stable_slope {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        }
    }

    /// Estimate the trend of `values`; `None` with fewer than two points
    pub fn estimate(&self, values: &[f64]) -> Option<TrendEstimate> {
        if values.len() < 2 {
            return None;
        }
        let fit = LinearFit::over_index(values);
        Some(TrendEstimate {
            slope: fit.slope,
            intercept: fit.intercept,
            r_squared: fit.r_squared,
            direction: self.direction(fit.slope),
            change_rate_percent: change_rate_percent(values),
        })
    }

    /// Extrapolate the fitted line over the next `short_horizon` buckets
    pub fn short_prediction(&self, values: &[f64]) -> Vec<f64> {
        if values.len() < 2 {
            return Vec::new();
        }
        let fit = LinearFit::over_index(values);
        let n = values.len();
        (n..n + self.short_horizon)
            .map(|x| fit.predict(x as f64))
            .collect()
    }
}

fn change_rate_percent(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first != 0.0 => (last - first) / first * 100.0,
        _ => 0.0,
    }
}
