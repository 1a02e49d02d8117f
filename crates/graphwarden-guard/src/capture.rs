//! Before/after state snapshots for write queries.
//!
//! The snapshot query is the write's leading MATCH clause with `RETURN *`
//! appended, run with the same parameters. Derivation is textual: it
//! assumes one leading match clause and stops at the first keyword that
//! filters, projects, or writes. Multiple independent MATCH clauses can
//! produce a wider snapshot than the write actually touches. Keywords
//! inside literals and comments do not end the prefix.
//!
//! Snapshots are ordinary reads through the executor, never statements in
//! the write's transaction: on Bolt a failed statement aborts its whole
//! transaction, and a capture must not be able to fail the write.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use graphwarden_core::{DatabaseExecutor, OperationKind, Params, Row};

use crate::classifier::{classify, pattern_regex};
use crate::lexer;

static CLAUSE_END: Lazy<Regex> = Lazy::new(|| {
    pattern_regex(r"(?i)\b(SET|WHERE|RETURN|WITH|DELETE|REMOVE|CREATE|MERGE)\b")
});
static LEADING_MATCH: Lazy<Regex> = Lazy::new(|| pattern_regex(r"(?i)^(OPTIONAL\s+)?MATCH\b"));
static RELATIONSHIP: Lazy<Regex> = Lazy::new(|| pattern_regex(r"-\[[^\]]*\]-|-->|<--"));

/// How to capture state around one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPlan {
    pub query: String,
    /// Capture a relationships view as well as the nodes view.
    pub with_relationships: bool,
}

impl SnapshotPlan {
    /// Plan a snapshot for a write, if its text has a usable match clause.
    pub fn for_write(operation: OperationKind, sanitized: &str) -> Option<Self> {
        if !operation.is_write() || operation == OperationKind::Forbidden {
            return None;
        }
        let query = snapshot_query(sanitized)?;
        let with_relationships = operation == OperationKind::Merge
            && RELATIONSHIP.is_match(&lexer::code_only(sanitized));
        Some(Self {
            query,
            with_relationships,
        })
    }
}

/// Derive the read-only snapshot query for a write, if it has a match prefix.
///
/// The prefix ends at the first SET, WHERE, RETURN, WITH, DELETE, REMOVE,
/// CREATE, or MERGE. The derived query only comes back if it classifies as
/// READ, so a snapshot can never write.
pub fn snapshot_query(sanitized: &str) -> Option<String> {
    let end = CLAUSE_END
        .find(&lexer::code_only(sanitized))
        .map_or(sanitized.len(), |m| m.start());

    let prefix = sanitized[..end].trim();
    if prefix.is_empty() || !LEADING_MATCH.is_match(prefix) {
        return None;
    }

    let query = format!("{prefix} RETURN *");
    (classify(&query).operation == OperationKind::Read).then_some(query)
}

/// Run a snapshot as a standalone read, bounded by `timeout`.
///
/// Failures never propagate: they come back as a `capture_unavailable`
/// marker so the write itself is unaffected.
pub async fn capture(
    executor: &dyn DatabaseExecutor,
    plan: &SnapshotPlan,
    params: &Params,
    timeout: Duration,
) -> Value {
    let nodes = match run_snapshot(executor, &plan.query, params, timeout).await {
        Ok(nodes) => nodes,
        Err(marker) => return marker,
    };
    if !plan.with_relationships {
        return nodes;
    }
    let relationships = match run_snapshot(executor, &plan.query, params, timeout).await {
        Ok(rels) => rels,
        Err(marker) => marker,
    };
    json!({ "nodes": nodes, "relationships": relationships })
}

async fn run_snapshot(
    executor: &dyn DatabaseExecutor,
    query: &str,
    params: &Params,
    timeout: Duration,
) -> Result<Value, Value> {
    let reason = match tokio::time::timeout(timeout, executor.query(query, params)).await {
        Ok(Ok(outcome)) => {
            return Ok(Value::Array(
                outcome.rows.into_iter().map(entity_of).collect(),
            ))
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("snapshot timed out after {}ms", timeout.as_millis()),
    };
    tracing::warn!(%reason, "State capture failed");
    Err(json!({ "capture_unavailable": true, "reason": reason }))
}

/// A single-column row is the entity itself; wider rows stay as maps.
fn entity_of(row: Row) -> Value {
    if row.len() == 1 {
        row.into_iter()
            .next()
            .map_or(Value::Null, |(_, value)| value)
    } else {
        Value::Object(row)
    }
}
