//! Error types for the graphwarden-audit crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Backend error: {0}")]
    Backend(#[from] graphwarden_core::BackendError),

    #[error("Malformed audit row: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuditError>;
