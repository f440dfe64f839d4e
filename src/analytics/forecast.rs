//! Multi-method forecasting with confidence bounds
//!
//! Every method works on an aggregated series (one value per bucket) and
//! extrapolates `horizon` buckets past its end:
//!
//! - `linear`: OLS extrapolation with the standard prediction interval
//! - `exp_smoothing`: single exponential smoothing plus a local slope
//! - `seasonal`: OLS trend plus a period-averaged residual
//! - `ensemble`: fixed-weight blend of the three
//!
//! Series shorter than [`MIN_FORECAST_POINTS`] never get extrapolated; the
//! forecaster reports [`ForecastOutcome::InsufficientData`] instead.

use crate::analytics::stats::{mean, population_std, LinearFit};
use crate::error::AnalyticsError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fewest aggregated points any method will forecast from
pub const MIN_FORECAST_POINTS: usize = 5;

/// Smoothing factor for `exp_smoothing`
pub const SMOOTHING_ALPHA: f64 = 0.3;

/// 95% normal quantile
const Z_95: f64 = 1.96;

/// Trailing smoothed points used for the local slope
const SMOOTHING_SLOPE_WINDOW: usize = 10;

const MAX_SEASONAL_PERIOD: usize = 7;

/// Per-step growth of the seasonal interval
const SEASONAL_WIDENING: f64 = 0.1;

const ENSEMBLE_WEIGHTS: [(ForecastMethod, f64); 3] = [
    (ForecastMethod::Linear, 0.3),
    (ForecastMethod::ExpSmoothing, 0.3),
    (ForecastMethod::Seasonal, 0.4),
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Linear,
    ExpSmoothing,
    Seasonal,
    #[default]
    Ensemble,
}

impl ForecastMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ForecastMethod::Linear => "linear",
            ForecastMethod::ExpSmoothing => "exp_smoothing",
            ForecastMethod::Seasonal => "seasonal",
            ForecastMethod::Ensemble => "ensemble",
        }
    }
}

impl fmt::Display for ForecastMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ForecastMethod {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ForecastMethod::Linear),
            "exp_smoothing" | "exponential_smoothing" | "exponential" => {
                Ok(ForecastMethod::ExpSmoothing)
            }
            "seasonal" => Ok(ForecastMethod::Seasonal),
            "ensemble" => Ok(ForecastMethod::Ensemble),
            other => Err(AnalyticsError::InvalidMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    fn around(center: f64, half_width: f64) -> Self {
        Self {
            lower: center - half_width,
            upper: center + half_width,
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Output of a single forecasting method
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodForecast {
    pub method: ForecastMethod,
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_intervals: Option<Vec<ConfidenceInterval>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub method: ForecastMethod,
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_intervals: Option<Vec<ConfidenceInterval>>,
    /// Sub-method outputs, populated for `ensemble` only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_predictions: Vec<MethodForecast>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ForecastOutcome {
    Forecast(Forecast),
    InsufficientData { required: usize, available: usize },
}

impl ForecastOutcome {
    pub fn forecast(&self) -> Option<&Forecast> {
        match self {
            ForecastOutcome::Forecast(forecast) => Some(forecast),
            ForecastOutcome::InsufficientData { .. } => None,
        }
    }

    pub fn is_insufficient(&self) -> bool {
        matches!(self, ForecastOutcome::InsufficientData { .. })
    }
}

/// Point predictions with bounds for one method before confidence is trimmed
struct Projection {
    values: Vec<f64>,
    intervals: Vec<ConfidenceInterval>,
}

impl Projection {
    fn into_method_forecast(self, method: ForecastMethod, with_confidence: bool) -> MethodForecast {
        MethodForecast {
            method,
            values: self.values,
            confidence_intervals: with_confidence.then_some(self.intervals),
        }
    }
}

/// Stateless forecasting facade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Forecaster;

impl Forecaster {
    pub fn new() -> Self {
        Self
    }

    /// Forecast `horizon` steps past the end of `values`
    pub fn forecast(
        &self,
        values: &[f64],
        horizon: usize,
        method: ForecastMethod,
        with_confidence: bool,
    ) -> ForecastOutcome {
        if values.len() < MIN_FORECAST_POINTS {
            debug!(
                "{} forecast needs {} points, got {}",
                method,
                MIN_FORECAST_POINTS,
                values.len()
            );
            return ForecastOutcome::InsufficientData {
                required: MIN_FORECAST_POINTS,
                available: values.len(),
            };
        }

        let forecast = match method {
            ForecastMethod::Ensemble => ensemble(values, horizon, with_confidence),
            single => {
                let projected = project(values, horizon, single)
                    .into_method_forecast(single, with_confidence);
                Forecast {
                    method: single,
                    values: projected.values,
                    confidence_intervals: projected.confidence_intervals,
                    all_predictions: Vec::new(),
                }
            }
        };
        ForecastOutcome::Forecast(forecast)
    }
}

fn project(values: &[f64], horizon: usize, method: ForecastMethod) -> Projection {
    match method {
        ForecastMethod::Linear => linear(values, horizon),
        ForecastMethod::ExpSmoothing => exp_smoothing(values, horizon),
        ForecastMethod::Seasonal => seasonal(values, horizon),
        ForecastMethod::Ensemble => {
            let blended = ensemble(values, horizon, true);
            Projection {
                values: blended.values,
                intervals: blended.confidence_intervals.unwrap_or_default(),
            }
        }
    }
}

fn linear(values: &[f64], horizon: usize) -> Projection {
    let fit = LinearFit::over_index(values);
    let last = values.len() - 1;
    let mut projection = Projection {
        values: Vec::with_capacity(horizon),
        intervals: Vec::with_capacity(horizon),
    };
    for step in 1..=horizon {
        let x = (last + step) as f64;
        let value = fit.predict(x);
        projection.values.push(value);
        projection
            .intervals
            .push(ConfidenceInterval::around(value, Z_95 * fit.prediction_std_error(x)));
    }
    projection
}

fn exp_smoothing(values: &[f64], horizon: usize) -> Projection {
    let mut smoothed = Vec::with_capacity(values.len());
    let mut one_step_errors = Vec::with_capacity(values.len());
    let mut level = values[0];
    smoothed.push(level);
    for &value in &values[1..] {
        one_step_errors.push((value - level).abs());
        level = SMOOTHING_ALPHA * value + (1.0 - SMOOTHING_ALPHA) * level;
        smoothed.push(level);
    }

    let window = SMOOTHING_SLOPE_WINDOW.min(smoothed.len());
    let slope = LinearFit::over_index(&smoothed[smoothed.len() - window..]).slope;
    let half_width = Z_95 * mean(&one_step_errors);

    let values: Vec<f64> = (1..=horizon).map(|step| level + slope * step as f64).collect();
    let intervals = values
        .iter()
        .map(|&value| ConfidenceInterval::around(value, half_width))
        .collect();
    Projection { values, intervals }
}

fn seasonal(values: &[f64], horizon: usize) -> Projection {
    let n = values.len();
    let period = MAX_SEASONAL_PERIOD.min(n / 2).max(1);
    let fit = LinearFit::over_index(values);

    let residuals: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(i, &value)| value - fit.predict(i as f64))
        .collect();
    let profile: Vec<f64> = (0..period)
        .map(|phase| {
            let phase_residuals: Vec<f64> = residuals
                .iter()
                .skip(phase)
                .step_by(period)
                .copied()
                .collect();
            mean(&phase_residuals)
        })
        .collect();
    let sigma = population_std(&residuals, mean(&residuals));

    let mut projection = Projection {
        values: Vec::with_capacity(horizon),
        intervals: Vec::with_capacity(horizon),
    };
    for step in 0..horizon {
        let x = n + step;
        let value = fit.predict(x as f64) + profile[x % period];
        let half_width = Z_95 * sigma * (1.0 + SEASONAL_WIDENING * step as f64);
        projection.values.push(value);
        projection.intervals.push(ConfidenceInterval::around(value, half_width));
    }
    projection
}

fn ensemble(values: &[f64], horizon: usize, with_confidence: bool) -> Forecast {
    let members: Vec<(f64, Projection, ForecastMethod)> = ENSEMBLE_WEIGHTS
        .iter()
        .map(|&(method, weight)| (weight, project(values, horizon, method), method))
        .collect();

    let mut blended = vec![0.0; horizon];
    let mut intervals = vec![ConfidenceInterval { lower: 0.0, upper: 0.0 }; horizon];
    for (weight, projection, _) in &members {
        for step in 0..horizon {
            blended[step] += weight * projection.values[step];
            intervals[step].lower += weight * projection.intervals[step].lower;
            intervals[step].upper += weight * projection.intervals[step].upper;
        }
    }

    Forecast {
        method: ForecastMethod::Ensemble,
        values: blended,
        confidence_intervals: with_confidence.then_some(intervals),
        all_predictions: members
            .into_iter()
            .map(|(_, projection, method)| projection.into_method_forecast(method, with_confidence))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: [f64; 5] = [1.0, 2.0, 3.0, 4.0, 5.0];

    fn forecast_of(
        values: &[f64],
        horizon: usize,
        method: ForecastMethod,
        with_confidence: bool,
    ) -> Forecast {
        match Forecaster::new().forecast(values, horizon, method, with_confidence) {
            ForecastOutcome::Forecast(forecast) => forecast,
            other => panic!("expected forecast, got {:?}", other),
        }
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("linear".parse::<ForecastMethod>().unwrap(), ForecastMethod::Linear);
        assert_eq!(
            "exponential_smoothing".parse::<ForecastMethod>().unwrap(),
            ForecastMethod::ExpSmoothing
        );
        assert_eq!("Seasonal".parse::<ForecastMethod>().unwrap(), ForecastMethod::Seasonal);
        assert_eq!("ensemble".parse::<ForecastMethod>().unwrap(), ForecastMethod::Ensemble);
        assert!(matches!(
            "arima".parse::<ForecastMethod>(),
            Err(AnalyticsError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_linear_on_perfect_line() {
        let forecast = forecast_of(&LINE, 2, ForecastMethod::Linear, true);
        assert_eq!(forecast.values.len(), 2);
        assert!((forecast.values[0] - 6.0).abs() < 1e-9);
        assert!((forecast.values[1] - 7.0).abs() < 1e-9);
        let intervals = forecast.confidence_intervals.unwrap();
        assert!(intervals.iter().all(|ci| ci.width().abs() < 1e-9));
        assert!(forecast.all_predictions.is_empty());
    }

    #[test]
    fn test_linear_interval_widens_with_distance() {
        let series = [10.0, 12.0, 11.0, 14.0, 13.0, 15.0, 14.0];
        let forecast = forecast_of(&series, 4, ForecastMethod::Linear, true);
        let widths: Vec<f64> = forecast
            .confidence_intervals
            .unwrap()
            .iter()
            .map(ConfidenceInterval::width)
            .collect();
        assert!(widths.windows(2).all(|pair| pair[1] > pair[0]));
    }

    #[test]
    fn test_insufficient_data_for_every_method() {
        for method in [
            ForecastMethod::Linear,
            ForecastMethod::ExpSmoothing,
            ForecastMethod::Seasonal,
            ForecastMethod::Ensemble,
        ] {
            let outcome = Forecaster::new().forecast(&[1.0, 2.0, 3.0, 4.0], 3, method, true);
            assert_eq!(
                outcome,
                ForecastOutcome::InsufficientData {
                    required: 5,
                    available: 4
                }
            );
            assert!(outcome.forecast().is_none());
        }
    }

    #[test]
    fn test_exp_smoothing_constant_series() {
        let forecast = forecast_of(&[8.0; 6], 3, ForecastMethod::ExpSmoothing, true);
        assert!(forecast.values.iter().all(|v| (v - 8.0).abs() < 1e-9));
        assert!(forecast
            .confidence_intervals
            .unwrap()
            .iter()
            .all(|ci| ci.width().abs() < 1e-9));
    }

    #[test]
    fn test_exp_smoothing_constant_width() {
        let series = [10.0, 12.0, 11.0, 14.0, 13.0, 15.0];
        let forecast = forecast_of(&series, 3, ForecastMethod::ExpSmoothing, true);
        let intervals = forecast.confidence_intervals.unwrap();
        assert!(intervals[0].width() > 0.0);
        assert!(intervals
            .iter()
            .all(|ci| (ci.width() - intervals[0].width()).abs() < 1e-9));
        // Rising series keeps rising
        assert!(forecast.values[2] > forecast.values[0]);
    }

    #[test]
    fn test_seasonal_repeats_weekly_pattern() {
        let week = [10.0, 20.0, 10.0, 20.0, 10.0, 20.0, 10.0];
        let series: Vec<f64> = week.iter().chain(week.iter()).copied().collect();
        let forecast = forecast_of(&series, 3, ForecastMethod::Seasonal, true);
        assert_eq!(forecast.values.len(), 3);
        // Next index is 14, phase 0 of the 7-bucket period
        assert!(forecast.values[0] < forecast.values[1]);

        let widths: Vec<f64> = forecast
            .confidence_intervals
            .unwrap()
            .iter()
            .map(ConfidenceInterval::width)
            .collect();
        assert!((widths[1] / widths[0] - 1.1).abs() < 1e-9);
        assert!((widths[2] / widths[0] - 1.2).abs() < 1e-9);
    }

    #[test]
    fn test_ensemble_includes_all_predictions() {
        let forecast = forecast_of(&LINE, 2, ForecastMethod::Ensemble, false);
        let methods: Vec<ForecastMethod> =
            forecast.all_predictions.iter().map(|p| p.method).collect();
        assert_eq!(
            methods,
            vec![
                ForecastMethod::Linear,
                ForecastMethod::ExpSmoothing,
                ForecastMethod::Seasonal
            ]
        );
        assert!(forecast.confidence_intervals.is_none());
        assert!(forecast
            .all_predictions
            .iter()
            .all(|p| p.confidence_intervals.is_none()));
    }

    #[test]
    fn test_zero_horizon() {
        let forecast = forecast_of(&LINE, 0, ForecastMethod::Ensemble, true);
        assert!(forecast.values.is_empty());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(ForecastOutcome::InsufficientData {
            required: 5,
            available: 2,
        })
        .unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["required"], 5);

        let forecast = Forecaster::new().forecast(&LINE, 1, ForecastMethod::Linear, false);
        let json = serde_json::to_value(forecast).unwrap();
        assert_eq!(json["status"], "forecast");
        assert_eq!(json["method"], "linear");
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    fn single(values: &[f64], horizon: usize, method: ForecastMethod) -> Forecast {
        match Forecaster::new().forecast(values, horizon, method, true) {
            ForecastOutcome::Forecast(forecast) => forecast,
            ForecastOutcome::InsufficientData { .. } => unreachable!(),
        }
    }

    // The ensemble is the fixed 0.3/0.3/0.4 blend of its members, point and interval wise
    #[quickcheck]
    fn prop_ensemble_is_weighted_blend(raw: Vec<i16>, horizon: u8) -> TestResult {
        if raw.len() < MIN_FORECAST_POINTS {
            return TestResult::discard();
        }
        let values: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
        let horizon = (horizon % 10) as usize + 1;

        let blended = single(&values, horizon, ForecastMethod::Ensemble);
        let linear = single(&values, horizon, ForecastMethod::Linear);
        let smoothing = single(&values, horizon, ForecastMethod::ExpSmoothing);
        let seasonal = single(&values, horizon, ForecastMethod::Seasonal);

        let close = |a: f64, b: f64| (a - b).abs() <= 1e-6 * (1.0 + a.abs().max(b.abs()));
        let blended_intervals = blended.confidence_intervals.unwrap_or_default();
        let linear_intervals = linear.confidence_intervals.unwrap_or_default();
        let smoothing_intervals = smoothing.confidence_intervals.unwrap_or_default();
        let seasonal_intervals = seasonal.confidence_intervals.unwrap_or_default();

        let ok = (0..horizon).all(|i| {
            let expected =
                0.3 * linear.values[i] + 0.3 * smoothing.values[i] + 0.4 * seasonal.values[i];
            let expected_lower = 0.3 * linear_intervals[i].lower
                + 0.3 * smoothing_intervals[i].lower
                + 0.4 * seasonal_intervals[i].lower;
            close(blended.values[i], expected) && close(blended_intervals[i].lower, expected_lower)
        });
        TestResult::from_bool(ok)
    }

    // Short series never produce a forecast
    #[quickcheck]
    fn prop_short_series_is_insufficient(raw: Vec<i16>) -> bool {
        let values: Vec<f64> = raw.iter().take(4).map(|&v| v as f64).collect();
        Forecaster::new()
            .forecast(&values, 3, ForecastMethod::Ensemble, true)
            .is_insufficient()
    }
}
