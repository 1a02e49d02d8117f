//! Mapping between [`AuditEvent`]s and audit table rows.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use graphwarden_core::{AuditEvent, EventId, Params, Row};

use crate::error::{AuditError, Result};

pub const INSERT_EVENT: &str = "INSERT INTO audit_events
    (event_id, occurred_at, event_type, actor, action, result, risk_level, details)
    VALUES ($event_id::uuid, $occurred_at::timestamptz, $event_type, $actor, $action,
            $result, $risk_level, $details::jsonb)
    RETURNING id";

pub const INSERT_DATABASE_EVENT: &str = "INSERT INTO database_audit_events
    (audit_event_id, database_type, operation_type, query_hash, affected_nodes,
     affected_relationships, execution_time_ms, complexity_score, before_state,
     after_state, transaction_id)
    VALUES ($audit_event_id, $database_type, $operation_type, $query_hash, $affected_nodes,
            $affected_relationships, $execution_time_ms, $complexity_score,
            $before_state::jsonb, $after_state::jsonb, $transaction_id)";

/// Columns returned by the audit read queries, one joined row per event.
pub const SELECT_EVENTS: &str = "SELECT e.event_id::text AS event_id, e.occurred_at,
        e.event_type, e.actor, e.action, e.result, e.risk_level, e.details,
        d.database_type, d.operation_type, d.query_hash, d.affected_nodes,
        d.affected_relationships, d.execution_time_ms, d.complexity_score,
        d.before_state, d.after_state, d.transaction_id
    FROM audit_events e
    LEFT JOIN database_audit_events d ON d.audit_event_id = e.id";

/// Replace a state payload larger than `max_bytes` with a size marker.
pub fn bound_state(state: Option<&Value>, max_bytes: usize) -> Option<Value> {
    let state = state?;
    let size = serde_json::to_vec(state).map(|v| v.len()).unwrap_or(0);
    if size > max_bytes {
        Some(json!({ "truncated": true, "original_size": size }))
    } else {
        Some(state.clone())
    }
}

/// Parameters for the `audit_events` row.
pub fn event_params(event: &AuditEvent) -> Params {
    let mut params = Params::new();
    params.insert("event_id".into(), json!(event.id.0.to_string()));
    params.insert(
        "occurred_at".into(),
        json!(event
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
    params.insert("event_type".into(), json!(event.event_type));
    params.insert("actor".into(), json!(event.actor));
    params.insert("action".into(), json!(event.action));
    params.insert("result".into(), json!(event.result.as_str()));
    params.insert("risk_level".into(), json!(event.risk_level.as_str()));
    params.insert("details".into(), event.details.clone());
    params
}

/// Parameters for the `database_audit_events` row keyed by the parent row id.
pub fn database_event_params(
    event: &AuditEvent,
    audit_event_id: i64,
    max_state_bytes: usize,
) -> Params {
    let mut params = Params::new();
    params.insert("audit_event_id".into(), json!(audit_event_id));
    params.insert("database_type".into(), json!(event.database_type.as_str()));
    params.insert(
        "operation_type".into(),
        json!(event.operation_type.as_str()),
    );
    params.insert("query_hash".into(), json!(event.query_hash));
    params.insert("affected_nodes".into(), json!(event.affected_node_count));
    params.insert(
        "affected_relationships".into(),
        json!(event.affected_relationship_count),
    );
    params.insert(
        "execution_time_ms".into(),
        json!(event.execution_time_ms),
    );
    params.insert("complexity_score".into(), json!(event.complexity_score));
    params.insert(
        "before_state".into(),
        bound_state(event.before_state.as_ref(), max_state_bytes).unwrap_or(Value::Null),
    );
    params.insert(
        "after_state".into(),
        bound_state(event.after_state.as_ref(), max_state_bytes).unwrap_or(Value::Null),
    );
    params.insert("transaction_id".into(), json!(event.transaction_id));
    params
}

/// Rebuild an event from a row shaped like [`SELECT_EVENTS`].
///
/// Rows written by other tooling without a detail row come back with
/// the database fields at their defaults.
pub fn event_from_row(row: &Row) -> Result<AuditEvent> {
    let id = Uuid::parse_str(required_str(row, "event_id")?)
        .map_err(|e| AuditError::Decode(format!("event_id: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(required_str(row, "occurred_at")?)
        .map_err(|e| AuditError::Decode(format!("occurred_at: {e}")))?
        .with_timezone(&Utc);

    Ok(AuditEvent {
        id: EventId(id),
        timestamp,
        event_type: required_str(row, "event_type")?.to_string(),
        actor: optional_str(row, "actor").map(str::to_string),
        action: required_str(row, "action")?.to_string(),
        result: parse(required_str(row, "result")?)?,
        risk_level: parse(required_str(row, "risk_level")?)?,
        database_type: optional_str(row, "database_type")
            .map(parse)
            .transpose()?
            .unwrap_or(graphwarden_core::DatabaseKind::Neo4j),
        operation_type: optional_str(row, "operation_type")
            .map(parse)
            .transpose()?
            .unwrap_or(graphwarden_core::OperationKind::Read),
        query_hash: optional_str(row, "query_hash").unwrap_or_default().to_string(),
        affected_node_count: count(row, "affected_nodes"),
        affected_relationship_count: count(row, "affected_relationships"),
        execution_time_ms: count(row, "execution_time_ms"),
        complexity_score: count(row, "complexity_score").min(100) as u8,
        before_state: non_null(row, "before_state"),
        after_state: non_null(row, "after_state"),
        transaction_id: optional_str(row, "transaction_id").map(str::to_string),
        details: row.get("details").cloned().unwrap_or(Value::Null),
    })
}

fn required_str<'a>(row: &'a Row, column: &str) -> Result<&'a str> {
    optional_str(row, column).ok_or_else(|| AuditError::Decode(format!("missing {column}")))
}

fn optional_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn count(row: &Row, column: &str) -> u64 {
    row.get(column).and_then(Value::as_u64).unwrap_or(0)
}

fn non_null(row: &Row, column: &str) -> Option<Value> {
    row.get(column).filter(|v| !v.is_null()).cloned()
}

fn parse<T>(s: &str) -> Result<T>
where
    T: std::str::FromStr<Err = graphwarden_core::CoreError>,
{
    s.parse().map_err(|e: graphwarden_core::CoreError| AuditError::Decode(e.to_string()))
}
