/// Alert ledger and lifecycle
pub mod alert_manager;

pub use alert_manager::{
    Alert, AlertCandidate, AlertCounts, AlertFilter, AlertManager, AlertSource, AlertStatus,
    AlertSubject, Resolution,
};
