//! Series analytics: anomaly detection, calendar aggregation, trend and forecasting
//!
//! Everything here is a pure computation over an input series and can run in
//! parallel across patients without shared state.

pub mod aggregator;
pub mod anomaly;
pub mod forecast;
pub mod stats;
pub mod trend;

pub use aggregator::{Bucket, Interval, SeriesAggregator};
pub use anomaly::{Anomaly, AnomalyDetector, AnomalyReport, DetectionMethod};
pub use forecast::{
    ConfidenceInterval, Forecast, ForecastMethod, ForecastOutcome, Forecaster, MethodForecast,
};
pub use stats::{LinearFit, SeriesStats};
pub use trend::{TrendDirection, TrendEstimate, TrendEstimator};
