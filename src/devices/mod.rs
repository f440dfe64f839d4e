/// Device health scoring
pub mod heuristics;
pub mod status_scorer;

pub use heuristics::{DeviceHeuristic, Finding};
pub use status_scorer::{Device, DeviceHealth, DeviceState, DeviceStatusScorer, LiveSignals};
