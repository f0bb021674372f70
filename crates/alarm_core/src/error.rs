use thiserror::Error;

/// Failures reported by the platform services the pipeline talks to.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("resource setup failed: {0}")]
    Resource(String),
}

impl PlatformError {
    pub fn is_permission(&self) -> bool {
        matches!(self, PlatformError::PermissionDenied(_))
    }
}

/// A configuration variable that is set but unusable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} value {value} is out of range")]
    OutOfRange { key: &'static str, value: u64 },
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("fire time {0} is outside the representable range")]
    InvalidTimestamp(i64),
    #[error("failed to encode registration payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error("failed to read preference file: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference file is not a JSON object: {0}")]
    Format(#[from] serde_json::Error),
}
