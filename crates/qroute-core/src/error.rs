//! Error types for qroute

use thiserror::Error;

/// Main error type for qroute
#[derive(Error, Debug)]
pub enum RouterError {
    /// Invalid call parameters; surfaced synchronously, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Estimator unavailable")]
    EstimatorUnavailable,

    #[error("Estimator error: {0}")]
    Estimator(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouterError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors caused by the caller's parameters rather than the system.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::InsufficientData(_) | Self::InvalidArgument(_)
        )
    }
}

/// Result type alias for qroute operations
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::configuration("max_workers must be >= 1");
        assert_eq!(
            err.to_string(),
            "Configuration error: max_workers must be >= 1"
        );
        assert_eq!(
            RouterError::EstimatorUnavailable.to_string(),
            "Estimator unavailable"
        );
    }

    #[test]
    fn test_caller_errors() {
        assert!(RouterError::InvalidArgument("n".into()).is_caller_error());
        assert!(RouterError::InsufficientData("empty".into()).is_caller_error());
        assert!(!RouterError::Internal("boom".into()).is_caller_error());
    }

    #[test]
    fn test_from_serde_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: RouterError = parse_err.into();
        assert!(matches!(err, RouterError::Serialization(_)));
    }
}
