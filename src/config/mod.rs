/// Engine configuration loaded from TOML
pub mod engine_config;

pub use engine_config::{
    AlertSettings, AnomalySettings, DeviceSettings, EngineConfig, ThresholdSettings, TrendSettings,
};
