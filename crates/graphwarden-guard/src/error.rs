//! Error types for the graphwarden-guard crate.

use thiserror::Error;

use graphwarden_core::{BackendError, PermissionLevel};

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Query blocked: {reason}")]
    Validation { reason: String },

    #[error("Permission denied: {reason}")]
    Policy {
        required: PermissionLevel,
        current: PermissionLevel,
        reason: String,
    },

    #[error("Query complexity too high: score {score} exceeds ceiling {ceiling}")]
    Complexity { score: u8, ceiling: u8 },

    #[error("Execution failed (transaction {}): {source}", txn(.transaction_id))]
    Execution {
        transaction_id: Option<String>,
        #[source]
        source: BackendError,
    },

    #[error("Timed out after {timeout_ms} ms (transaction {})", txn(.transaction_id))]
    Timeout {
        transaction_id: Option<String>,
        timeout_ms: u64,
    },

    #[error("Operation ceiling exceeded: {count} operations, limit {ceiling}")]
    OperationCeiling {
        transaction_id: Option<String>,
        count: usize,
        ceiling: usize,
    },

    #[error("Batch operation {index} rejected: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<GuardError>,
    },
}

impl GuardError {
    /// Transaction the failure happened in, for correlation with the audit trail.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Execution { transaction_id, .. }
            | Self::Timeout { transaction_id, .. }
            | Self::OperationCeiling { transaction_id, .. } => transaction_id.as_deref(),
            Self::BatchItem { source, .. } => source.transaction_id(),
            _ => None,
        }
    }

    /// Whether the query was refused before reaching the database.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::Policy { .. } | Self::Complexity { .. } => true,
            Self::BatchItem { source, .. } => source.is_rejection(),
            _ => false,
        }
    }
}

fn txn(id: &Option<String>) -> &str {
    id.as_deref().unwrap_or("none")
}

pub type Result<T> = std::result::Result<T, GuardError>;
