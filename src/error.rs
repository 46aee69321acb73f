use thiserror::Error;

/// Main error type for the Vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Process lifecycle errors (recorded on the process, never fatal)
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Process exited: {0}")]
    ExitError(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Supervision errors
    #[error("Health check failed: {0}")]
    HealthCheckError(String),

    #[error("Resource limit exceeded for {0}: {1}")]
    ResourceLimitExceeded(String, String),

    #[error("Process restart limit exceeded for {0}")]
    RestartLimitExceeded(String),

    #[error("Failed to sample process {0}: {1}")]
    SamplingError(u32, String),

    // Control surface errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VigilError {
    /// Whether the error refers to an unknown process name
    pub fn is_not_found(&self) -> bool {
        matches!(self, VigilError::ProcessNotFound(_))
    }

    /// Whether the error was caused by bad caller or configuration input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            VigilError::ConfigError(_)
                | VigilError::InvalidConfig(_)
                | VigilError::ConfigValidationError(_)
        )
    }
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = VigilError::ProcessNotFound("web".to_string());
        assert!(err.is_not_found());
        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "Process not found: web");
    }

    #[test]
    fn test_validation_classification() {
        let err = VigilError::ConfigValidationError("bad interval".to_string());
        assert!(err.is_validation());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: VigilError = io.into();
        assert!(matches!(err, VigilError::Io(_)));
    }
}
