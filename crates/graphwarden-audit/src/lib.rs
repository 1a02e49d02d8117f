//! graphwarden-audit: Batched, retention-governed audit trail.
//!
//! Events produced by the query guard are accumulated in memory and flushed
//! to PostgreSQL in batches, either when a batch fills up or on a timer.
//! When storage is unavailable the events are written to the log instead,
//! so a guarded query never fails because auditing did.

pub mod batch;
pub mod error;
pub mod hash;
pub mod reader;
pub mod record;
pub mod retention;
pub mod schema;
pub mod sink;
pub mod sql;
pub mod writer;

pub use batch::{AuditBatch, BatchManager};
pub use error::AuditError;
pub use hash::query_hash;
pub use reader::AuditReader;
pub use retention::{RetentionPolicy, RetentionStage};
pub use schema::{bootstrap, BootstrapOutcome};
pub use sink::{AuditSink, SqlAuditSink};
pub use sql::SqlClient;
pub use writer::{AuditWriter, FlushHandle, WriterStats};
