//! Request and response shapes at the guard's inbound boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use graphwarden_core::{Params, PermissionLevel, Query, Row};

use crate::error::GuardError;
use crate::transaction::{ExecutedOperation, TxnStatus};

/// One guarded query call.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query: Query,
    pub level: PermissionLevel,
    pub actor: Option<String>,
    /// Requested row limit for reads; never raises the hard cap.
    pub limit: Option<u32>,
}

impl QueryRequest {
    pub fn new(query: Query, level: PermissionLevel) -> Self {
        Self {
            query,
            level,
            actor: None,
            limit: None,
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Entity state around a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditTrail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_state: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub success: bool,
    pub data: Vec<Row>,
    pub affected_nodes: u64,
    pub affected_relationships: u64,
    pub complexity_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub audit_trail: AuditTrail,
}

impl QueryResponse {
    pub(crate) fn succeeded(
        executed: ExecutedOperation,
        complexity_score: u8,
        transaction_id: Option<String>,
    ) -> Self {
        Self {
            success: true,
            affected_nodes: executed.outcome.affected_nodes,
            affected_relationships: executed.outcome.affected_relationships,
            data: executed.outcome.rows,
            complexity_score,
            error: None,
            transaction_id,
            audit_trail: AuditTrail {
                before_state: executed.before_state,
                after_state: executed.after_state,
            },
        }
    }

    /// Response describing a failed call.
    pub fn failed(error: &GuardError, complexity_score: u8) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            affected_nodes: 0,
            affected_relationships: 0,
            complexity_score,
            error: Some(error.to_string()),
            transaction_id: error.transaction_id().map(str::to_string),
            audit_trail: AuditTrail::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of a batch request.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOperation {
    pub query: String,
    #[serde(default)]
    pub params: Params,
    /// Capture before/after state for this operation.
    #[serde(default = "default_true")]
    pub capture_state: bool,
}

/// An ordered batch run in one transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperation>,
    #[serde(default = "default_true")]
    pub stop_on_first_error: bool,
    #[serde(skip, default = "default_level")]
    pub level: PermissionLevel,
    #[serde(default)]
    pub actor: Option<String>,
}

fn default_level() -> PermissionLevel {
    PermissionLevel::ReadOnly
}

/// Per-operation result inside a batch response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResponse {
    pub index: usize,
    pub success: bool,
    pub affected_nodes: u64,
    pub affected_relationships: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub audit_trail: AuditTrail,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub transaction_id: String,
    pub status: TxnStatus,
    pub results: Vec<BatchItemResponse>,
}

impl BatchResponse {
    /// Items that failed.
    pub fn failures(&self) -> impl Iterator<Item = &BatchItemResponse> {
        self.results.iter().filter(|r| !r.success)
    }
}
