//! The uniform executor contract implemented by every database backend.
//!
//! The guard pipeline talks to the graph through this trait, and the audit
//! writer talks to the relational store through the same trait. A backend is
//! chosen once when the process wires itself up; call sites never branch on
//! which one they hold.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{DatabaseKind, Params, Row};

/// Errors raised by a backend while talking to its database.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Value conversion error: {0}")]
    Conversion(String),
}

/// What a successful statement produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    /// Distinct graph nodes touched or returned.
    pub affected_nodes: u64,
    /// Distinct graph relationships touched or returned.
    pub affected_relationships: u64,
    /// Rows affected by a relational statement.
    pub affected_rows: u64,
    /// The node and relationship counts were tallied from returned rows, so
    /// entities a write touched but did not return are missing.
    pub counts_from_rows: bool,
}

impl QueryOutcome {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    /// Read an integer column from the first row, if present.
    pub fn first_i64(&self, column: &str) -> Option<i64> {
        self.rows.first()?.get(column)?.as_i64()
    }
}

/// A connection to one database.
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// The backend family, recorded on audit events.
    fn kind(&self) -> DatabaseKind;

    /// Run a single statement outside any explicit transaction.
    async fn query(&self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError>;

    /// Open a transaction. The returned handle must be committed or rolled back.
    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>, BackendError>;

    /// Cheap liveness check.
    async fn ping(&self) -> Result<(), BackendError>;
}

/// An open transaction on a backend.
///
/// Owned by exactly one call; never shared or resumed across calls.
#[async_trait]
pub trait BackendTransaction: Send {
    async fn query(&mut self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError>;

    async fn commit(self: Box<Self>) -> Result<(), BackendError>;

    async fn rollback(self: Box<Self>) -> Result<(), BackendError>;
}
