use thiserror::Error;

/// Top-level error type for graphwarden shared code.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid permission level {0}: expected 1-4")]
    InvalidPermissionLevel(u8),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
