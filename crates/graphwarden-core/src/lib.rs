//! graphwarden-core: Shared types, backend contract, configuration, and error handling.
//!
//! This crate provides the foundations used across all graphwarden components:
//! - Query, parameter, and row types plus the operation/permission vocabulary
//! - The [`DatabaseExecutor`] contract every backend implements
//! - An in-memory backend for tests and dry runs
//! - The audit event model
//! - Layered configuration

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod memory;
pub mod types;

pub use backend::{BackendError, BackendTransaction, DatabaseExecutor, QueryOutcome};
pub use error::CoreError;
pub use events::{AuditEvent, EventId, EventType};
pub use types::{
    AuditResult, DatabaseKind, OperationKind, Params, PermissionLevel, Query, RiskLevel, Row,
};
