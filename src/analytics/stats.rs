//! Shared descriptive statistics and least-squares fitting

use serde::{Deserialize, Serialize};

/// Summary statistics of a numeric series
///
/// `std` is the population standard deviation; an empty series reports zeros.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
}

impl SeriesStats {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let mean = mean(values);
        Self {
            count: values.len(),
            mean,
            median: median(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            std: population_std(values, mean),
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

pub fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Copy of `values` in ascending order
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Ordinary least-squares line over `(index, value)` pairs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Number of fitted points
    pub n: usize,
    /// Mean of the x values
    pub x_mean: f64,
    /// Sum of squared x deviations
    pub sxx: f64,
    /// Sum of squared residuals
    pub ssr: f64,
}

impl LinearFit {
    /// Fit `value ~ slope * index + intercept` with x = 0..n-1
    ///
    /// Fewer than two points yields a flat line through the single value (or 0).
    pub fn over_index(values: &[f64]) -> Self {
        let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        Self::fit(&xs, values)
    }

    pub fn fit(xs: &[f64], ys: &[f64]) -> Self {
        let n = xs.len().min(ys.len());
        let (xs, ys) = (&xs[..n], &ys[..n]);
        let x_mean = mean(xs);
        let y_mean = mean(ys);
        let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

        if n < 2 || sxx.abs() < 1e-12 {
            return Self {
                slope: 0.0,
                intercept: y_mean,
                r_squared: 0.0,
                n,
                x_mean,
                sxx,
                ssr: ys.iter().map(|y| (y - y_mean).powi(2)).sum(),
            };
        }

        let sxy: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (x - x_mean) * (y - y_mean))
            .sum();
        let slope = sxy / sxx;
        let intercept = y_mean - slope * x_mean;

        let ssr: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (y - (slope * x + intercept)).powi(2))
            .sum();
        let sst: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
        let r_squared = if sst > 1e-12 { 1.0 - ssr / sst } else { 0.0 };

        Self {
            slope,
            intercept,
            r_squared,
            n,
            x_mean,
            sxx,
            ssr,
        }
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// Residual standard error `sqrt(SSR / (n - 2))`, 0 with fewer than three points
    pub fn residual_std_error(&self) -> f64 {
        if self.n < 3 {
            0.0
        } else {
            (self.ssr / (self.n - 2) as f64).sqrt()
        }
    }

    /// Standard error of a new observation at `x`
    pub fn prediction_std_error(&self, x: f64) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let leverage = if self.sxx > 1e-12 {
            (x - self.x_mean).powi(2) / self.sxx
        } else {
            0.0
        };
        self.residual_std_error() * (1.0 + 1.0 / self.n as f64 + leverage).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_series_stats() {
        let stats = SeriesStats::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.count, 8);
        assert!(approx(stats.mean, 5.0));
        assert!(approx(stats.median, 4.5));
        assert!(approx(stats.min, 2.0));
        assert!(approx(stats.max, 9.0));
        assert!(approx(stats.std, 2.0));
    }

    #[test]
    fn test_series_stats_empty_and_single() {
        assert_eq!(SeriesStats::from_values(&[]), SeriesStats::default());
        let single = SeriesStats::from_values(&[42.0]);
        assert_eq!(single.count, 1);
        assert_eq!(single.std, 0.0);
        assert_eq!(single.median, 42.0);
    }

    #[test]
    fn test_linear_fit_perfect_line() {
        let fit = LinearFit::over_index(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(approx(fit.slope, 1.0));
        assert!(approx(fit.intercept, 1.0));
        assert!(approx(fit.r_squared, 1.0));
        assert!(approx(fit.ssr, 0.0));
        assert!(approx(fit.predict(5.0), 6.0));
        assert!(approx(fit.prediction_std_error(6.0), 0.0));
    }

    #[test]
    fn test_linear_fit_degenerate() {
        let flat = LinearFit::over_index(&[3.0, 3.0, 3.0]);
        assert_eq!(flat.slope, 0.0);
        assert_eq!(flat.r_squared, 0.0);
        assert!(approx(flat.intercept, 3.0));

        let single = LinearFit::over_index(&[7.0]);
        assert_eq!(single.slope, 0.0);
        assert_eq!(single.intercept, 7.0);
        assert_eq!(single.residual_std_error(), 0.0);
    }

    #[test]
    fn test_prediction_error_widens_away_from_mean() {
        let fit = LinearFit::over_index(&[1.0, 3.0, 2.0, 5.0, 4.0, 6.0]);
        let near = fit.prediction_std_error(fit.x_mean);
        let far = fit.prediction_std_error(fit.x_mean + 10.0);
        assert!(far > near);
    }
}
