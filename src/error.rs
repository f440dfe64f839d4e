use crate::alerts::AlertStatus;
use thiserror::Error;

/// Errors raised by the external stores the engine talks to
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Errors that can occur while running an analytic operation
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Unsupported method: {0}")]
    InvalidMethod(String),

    #[error("Unsupported interval: {0}")]
    InvalidInterval(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Alert error: {0}")]
    Alert(#[from] AlertError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

/// Errors that can occur in the threshold registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No threshold configured for {category}/{}", .sub_type.as_deref().unwrap_or("-"))]
    NotFound {
        category: String,
        sub_type: Option<String>,
    },

    #[error("Invalid threshold configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur when creating or transitioning alerts
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Alert {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AlertStatus,
        to: AlertStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_not_found_message() {
        let err = RegistryError::NotFound {
            category: "vital_sign".to_string(),
            sub_type: Some("heart_rate".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "No threshold configured for vital_sign/heart_rate"
        );

        let err = RegistryError::NotFound {
            category: "lab_result".to_string(),
            sub_type: None,
        };
        assert_eq!(err.to_string(), "No threshold configured for lab_result/-");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = AlertError::InvalidTransition {
            id: "a1".to_string(),
            from: AlertStatus::Resolved,
            to: AlertStatus::Ignored,
        };
        assert_eq!(err.to_string(), "Alert a1 cannot move from resolved to ignored");
    }

    #[test]
    fn test_store_error_converts() {
        let err: AnalyticsError = StoreError::Unavailable("db down".to_string()).into();
        assert!(matches!(err, AnalyticsError::Store(_)));
        assert_eq!(err.to_string(), "Store error: Store unavailable: db down");
    }
}
