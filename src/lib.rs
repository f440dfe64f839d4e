/// Error types for the analytics engine
pub mod error;

/// Measurement, series and status types
pub mod measurement;

/// Threshold registry, range classification and clinical defaults
pub mod thresholds;

/// Anomaly detection, aggregation, trend and forecasting
pub mod analytics;

/// Device health scoring
pub mod devices;

/// Alert ledger and lifecycle
pub mod alerts;

/// Storage seams for measurements, thresholds and alerts
pub mod store;

/// Configuration management
pub mod config;

/// Engine facade composing all components
pub mod engine;

// Re-export commonly used types
pub use engine::{AlertScope, AnalyticsEngine, DataType, PatientScan};
pub use error::{AlertError, AnalyticsError, ConfigError, RegistryError, StoreError};
pub use measurement::{Measurement, MeasurementValue, RangeStatus, SeriesPoint, Severity};
