//! graphwarden-guard: Permission-tiered, audited query execution.
//!
//! Sits between tool-calling clients and the graph. Each query is
//! classified lexically, checked against the caller's permission tier and
//! a complexity ceiling, executed under a timeout (writes inside their own
//! transaction with before/after state capture), and recorded in the audit
//! trail whatever the outcome.

pub mod audit;
pub mod capture;
pub mod classifier;
pub mod complexity;
pub mod engine;
pub mod lexer;
pub mod error;
pub mod policy;
pub mod transaction;
pub mod types;
pub mod verdict;

pub use classifier::{classify, Classification};
pub use engine::GuardEngine;
pub use error::GuardError;
pub use policy::PolicyDecision;
pub use transaction::{TransactionCoordinator, TxnStatus};
pub use types::{BatchOperation, BatchRequest, BatchResponse, QueryRequest, QueryResponse};
pub use verdict::{Rejection, RejectionKind, Verdict};
