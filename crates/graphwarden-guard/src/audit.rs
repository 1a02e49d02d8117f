//! Audit event construction and risk assessment for guarded calls.

use serde_json::json;

use graphwarden_audit::query_hash;
use graphwarden_core::events::AuditEventBuilder;
use graphwarden_core::{
    AuditEvent, AuditResult, DatabaseKind, EventType, OperationKind, RiskLevel,
};

use crate::classifier::Classification;
use crate::error::GuardError;
use crate::transaction::ExecutedOperation;
use crate::verdict::{Rejection, RejectionKind};

/// Writes scoring at or above this are always critical.
const CRITICAL_SCORE: u8 = 90;

/// How an execution attempt ended, for risk purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Blocked,
    PolicyDenied,
    TooComplex,
    Executed,
}

pub fn assess_risk(attempt: Attempt, operation: OperationKind, score: u8) -> RiskLevel {
    match attempt {
        Attempt::Blocked => RiskLevel::High,
        Attempt::PolicyDenied => RiskLevel::Medium,
        Attempt::TooComplex => RiskLevel::Critical,
        Attempt::Executed if operation.is_write() && score >= CRITICAL_SCORE => RiskLevel::Critical,
        Attempt::Executed => match operation {
            OperationKind::Read => RiskLevel::Low,
            OperationKind::Create | OperationKind::Merge => RiskLevel::Medium,
            OperationKind::Set | OperationKind::Forbidden => RiskLevel::High,
        },
    }
}

/// Who and what an event is about.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub actor: Option<String>,
    pub database: DatabaseKind,
    pub action: &'static str,
}

impl EventContext {
    fn builder(&self, event_type: EventType, classification: &Classification) -> AuditEventBuilder {
        AuditEvent::builder(event_type, self.action)
            .actor(self.actor.as_deref())
            .database(self.database)
            .operation(classification.operation, classification.complexity_score)
            .query_hash(query_hash(&classification.sanitized))
    }
}

fn event_type_for(operation: OperationKind) -> EventType {
    match operation {
        OperationKind::Read => EventType::GraphRead,
        OperationKind::Forbidden => EventType::GraphBlocked,
        _ => EventType::GraphWrite,
    }
}

/// Event for a query refused before execution.
pub fn rejection_event(ctx: &EventContext, rejection: &Rejection) -> AuditEvent {
    let c = &rejection.classification;
    let (attempt, details) = match &rejection.kind {
        RejectionKind::Blocked => (
            Attempt::Blocked,
            json!({ "rejection": "validation", "reason": rejection.reason }),
        ),
        RejectionKind::Policy(decision) => (
            Attempt::PolicyDenied,
            json!({
                "rejection": "policy",
                "reason": rejection.reason,
                "required_level": decision.required_level.as_u8(),
                "caller_level": rejection.level.as_u8(),
            }),
        ),
        RejectionKind::Complexity { score, ceiling } => (
            Attempt::TooComplex,
            json!({
                "rejection": "complexity",
                "reason": rejection.reason,
                "score": score,
                "ceiling": ceiling,
            }),
        ),
    };

    ctx.builder(EventType::GraphBlocked, c)
        .result(AuditResult::Failure)
        .risk(assess_risk(attempt, c.operation, c.complexity_score))
        .details(details)
        .build()
}

/// Event for a statement that ran.
///
/// `result` is `Warning` for batch items whose effects were rolled back.
pub fn executed_event(
    ctx: &EventContext,
    classification: &Classification,
    executed: &ExecutedOperation,
    transaction_id: Option<&str>,
    result: AuditResult,
) -> AuditEvent {
    let outcome = &executed.outcome;
    ctx.builder(event_type_for(classification.operation), classification)
        .result(result)
        .risk(assess_risk(
            Attempt::Executed,
            classification.operation,
            classification.complexity_score,
        ))
        .affected(outcome.affected_nodes, outcome.affected_relationships)
        .execution_time_ms(executed.execution_time_ms)
        .states(executed.before_state.clone(), executed.after_state.clone())
        .transaction_id(transaction_id.map(str::to_string))
        .details(json!({
            "rows": outcome.rows.len(),
            "rolled_back": result == AuditResult::Warning,
            "affected_counts": if outcome.counts_from_rows { "returned_rows" } else { "reported" },
        }))
        .build()
}

/// Event for a statement that was sent but failed or timed out.
pub fn failure_event(
    ctx: &EventContext,
    classification: &Classification,
    error: &GuardError,
    elapsed_ms: u64,
) -> AuditEvent {
    let execution_time_ms = match error {
        GuardError::Timeout { timeout_ms, .. } => *timeout_ms,
        _ => elapsed_ms,
    };
    ctx.builder(event_type_for(classification.operation), classification)
        .result(AuditResult::Failure)
        .risk(assess_risk(
            Attempt::Executed,
            classification.operation,
            classification.complexity_score,
        ))
        .execution_time_ms(execution_time_ms)
        .transaction_id(error.transaction_id().map(str::to_string))
        .details(json!({ "error": error.to_string() }))
        .build()
}

/// Event for a batch that failed as a whole before or around its items.
pub fn batch_failure_event(
    ctx: &EventContext,
    error: &GuardError,
    operations: usize,
    risk: RiskLevel,
) -> AuditEvent {
    let execution_time_ms = match error {
        GuardError::Timeout { timeout_ms, .. } => *timeout_ms,
        _ => 0,
    };
    AuditEvent::builder(EventType::GraphBatch, ctx.action)
        .actor(ctx.actor.as_deref())
        .database(ctx.database)
        .result(AuditResult::Failure)
        .risk(risk)
        .execution_time_ms(execution_time_ms)
        .transaction_id(error.transaction_id().map(str::to_string))
        .details(json!({ "error": error.to_string(), "operations": operations }))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify;
    use crate::verdict::{assess, Verdict};
    use graphwarden_core::{PermissionLevel, QueryOutcome};

    fn ctx() -> EventContext {
        EventContext {
            actor: Some("tester".into()),
            database: DatabaseKind::Neo4j,
            action: "execute_query",
        }
    }

    #[test]
    fn risk_follows_outcome_and_operation() {
        use OperationKind::*;
        assert_eq!(assess_risk(Attempt::Blocked, Forbidden, 0), RiskLevel::High);
        assert_eq!(assess_risk(Attempt::PolicyDenied, Set, 25), RiskLevel::Medium);
        assert_eq!(assess_risk(Attempt::TooComplex, Merge, 95), RiskLevel::Critical);
        assert_eq!(assess_risk(Attempt::Executed, Read, 100), RiskLevel::Low);
        assert_eq!(assess_risk(Attempt::Executed, Create, 20), RiskLevel::Medium);
        assert_eq!(assess_risk(Attempt::Executed, Merge, 30), RiskLevel::Medium);
        assert_eq!(assess_risk(Attempt::Executed, Set, 25), RiskLevel::High);
        assert_eq!(assess_risk(Attempt::Executed, Create, 90), RiskLevel::Critical);
    }

    #[test]
    fn blocked_event_is_high_risk_failure() {
        let Verdict::Rejected(rejection) =
            assess("MATCH (n) DETACH DELETE n", PermissionLevel::Admin, 80)
        else {
            panic!("expected rejection");
        };
        let event = rejection_event(&ctx(), &rejection);
        assert_eq!(event.event_type, "neo4j_blocked");
        assert_eq!(event.result, AuditResult::Failure);
        assert_eq!(event.risk_level, RiskLevel::High);
        assert_eq!(event.operation_type, OperationKind::Forbidden);
        assert_eq!(event.details["rejection"], json!("validation"));
    }

    #[test]
    fn policy_event_records_required_level() {
        let Verdict::Rejected(rejection) = assess(
            "MATCH (e:Equipment) SET e.status = 'fault'",
            PermissionLevel::Authenticated,
            80,
        ) else {
            panic!("expected rejection");
        };
        let event = rejection_event(&ctx(), &rejection);
        assert_eq!(event.details["required_level"], json!(3));
        assert_eq!(event.details["caller_level"], json!(2));
    }

    #[test]
    fn executed_event_carries_counts_and_states() {
        let classification = classify("MATCH (e) SET e.x = 1");
        let executed = ExecutedOperation {
            outcome: QueryOutcome {
                affected_nodes: 2,
                ..Default::default()
            },
            before_state: Some(json!([{"x": 0}])),
            after_state: Some(json!([{"x": 1}])),
            execution_time_ms: 4,
        };
        let event = executed_event(&ctx(), &classification, &executed, Some("t1"), AuditResult::Success);
        assert_eq!(event.event_type, "neo4j_write");
        assert_eq!(event.affected_node_count, 2);
        assert_eq!(event.transaction_id.as_deref(), Some("t1"));
        assert_eq!(event.query_hash, query_hash("MATCH (e) SET e.x = 1"));
        assert_eq!(event.after_state, Some(json!([{"x": 1}])));
        assert_eq!(event.details["affected_counts"], json!("reported"));
    }

    #[test]
    fn row_tallied_counts_are_marked_in_details() {
        let classification = classify("MATCH (e) SET e.x = 1");
        let executed = ExecutedOperation {
            outcome: QueryOutcome {
                affected_nodes: 1,
                counts_from_rows: true,
                ..Default::default()
            },
            before_state: None,
            after_state: None,
            execution_time_ms: 1,
        };
        let event = executed_event(&ctx(), &classification, &executed, Some("t3"), AuditResult::Success);
        assert_eq!(event.details["affected_counts"], json!("returned_rows"));
    }

    #[test]
    fn timeout_event_uses_timeout_bound() {
        let classification = classify("MATCH (e) SET e.x = 1");
        let err = GuardError::Timeout {
            transaction_id: Some("t2".into()),
            timeout_ms: 30_000,
        };
        let event = failure_event(&ctx(), &classification, &err, 12);
        assert_eq!(event.execution_time_ms, 30_000);
        assert_eq!(event.result, AuditResult::Failure);
        assert_eq!(event.transaction_id.as_deref(), Some("t2"));
    }
}
