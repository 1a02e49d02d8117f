//! Audit event model.
//!
//! One [`AuditEvent`] is produced at the end of every execution attempt,
//! whether it was blocked, succeeded, or failed. Events are immutable once
//! built; the audit writer owns them until they are flushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{AuditResult, DatabaseKind, OperationKind, RiskLevel};

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event categories emitted by the query guard.
///
/// Stored as plain strings so that rows written by other tooling
/// (`security_*`, `oauth_*`, `auth_*`, `system_*`) share the same table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// A read query ran.
    GraphRead,
    /// A single write ran inside a transaction.
    GraphWrite,
    /// A batch of writes ran inside one transaction.
    GraphBatch,
    /// A query was refused before reaching the database.
    GraphBlocked,
    /// Audit trail lifecycle (bootstrap, shutdown flush).
    System,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GraphRead => "neo4j_read",
            Self::GraphWrite => "neo4j_write",
            Self::GraphBatch => "neo4j_batch",
            Self::GraphBlocked => "neo4j_blocked",
            Self::System => "system_audit",
        }
    }
}

/// Prefixes of event types that carry a database-operation detail row.
pub const DATABASE_EVENT_PREFIXES: &[&str] = &["neo4j_", "postgres_"];

/// A single audited execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub actor: Option<String>,
    pub action: String,
    pub result: AuditResult,
    pub risk_level: RiskLevel,
    pub database_type: DatabaseKind,
    pub operation_type: OperationKind,
    /// Hex digest of the sanitized query text.
    pub query_hash: String,
    pub affected_node_count: u64,
    pub affected_relationship_count: u64,
    pub execution_time_ms: u64,
    pub complexity_score: u8,
    pub before_state: Option<serde_json::Value>,
    pub after_state: Option<serde_json::Value>,
    pub transaction_id: Option<String>,
    /// Free-form context (error text, required level, batch size, ...).
    pub details: serde_json::Value,
}

impl AuditEvent {
    /// Start building an event of the given type.
    pub fn builder(event_type: EventType, action: &str) -> AuditEventBuilder {
        AuditEventBuilder::new(event_type.as_str(), action)
    }

    /// Whether this event gets a row in the database-operation detail table.
    pub fn is_database_event(&self) -> bool {
        DATABASE_EVENT_PREFIXES
            .iter()
            .any(|p| self.event_type.starts_with(p))
    }

    /// Size of the event's JSON encoding, used for batch byte accounting.
    pub fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Incremental builder for an [`AuditEvent`].
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(event_type: &str, action: &str) -> Self {
        Self {
            event: AuditEvent {
                id: EventId::new(),
                timestamp: Utc::now(),
                event_type: event_type.to_string(),
                actor: None,
                action: action.to_string(),
                result: AuditResult::Success,
                risk_level: RiskLevel::Low,
                database_type: DatabaseKind::Neo4j,
                operation_type: OperationKind::Read,
                query_hash: String::new(),
                affected_node_count: 0,
                affected_relationship_count: 0,
                execution_time_ms: 0,
                complexity_score: 0,
                before_state: None,
                after_state: None,
                transaction_id: None,
                details: serde_json::Value::Null,
            },
        }
    }

    pub fn actor(mut self, actor: Option<&str>) -> Self {
        self.event.actor = actor.map(str::to_string);
        self
    }

    pub fn result(mut self, result: AuditResult) -> Self {
        self.event.result = result;
        self
    }

    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.event.risk_level = risk;
        self
    }

    pub fn database(mut self, kind: DatabaseKind) -> Self {
        self.event.database_type = kind;
        self
    }

    pub fn operation(mut self, operation: OperationKind, complexity_score: u8) -> Self {
        self.event.operation_type = operation;
        self.event.complexity_score = complexity_score;
        self
    }

    pub fn query_hash(mut self, hash: impl Into<String>) -> Self {
        self.event.query_hash = hash.into();
        self
    }

    pub fn affected(mut self, nodes: u64, relationships: u64) -> Self {
        self.event.affected_node_count = nodes;
        self.event.affected_relationship_count = relationships;
        self
    }

    pub fn execution_time_ms(mut self, ms: u64) -> Self {
        self.event.execution_time_ms = ms;
        self
    }

    pub fn states(
        mut self,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        self.event.before_state = before;
        self.event.after_state = after;
        self
    }

    pub fn transaction_id(mut self, id: Option<String>) -> Self {
        self.event.transaction_id = id;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.event.details = details;
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}
