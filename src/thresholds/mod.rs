/// Threshold configuration registry, range classification and built-in defaults
pub mod classifier;
pub mod defaults;
pub mod registry;

pub use classifier::{classify, Classification, ComponentStatus};
pub use registry::{
    Band, Bands, ComponentRange, MatchMode, Predicate, RangeSpec, ThresholdConfig,
    ThresholdRegistry,
};
