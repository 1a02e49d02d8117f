//! Guard pipeline scenarios over the in-memory backend.
//!
//! The graph handler understands just enough statements to model an
//! `Equipment` node whose status can be read and changed, plus sensor
//! creation for batch tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use graphwarden_audit::error::Result as AuditResultT;
use graphwarden_audit::{AuditSink, AuditWriter};
use graphwarden_core::config::{AuditConfig, GuardConfig};
use graphwarden_core::memory::{MemoryCall, MemoryExecutor, MemoryState};
use graphwarden_core::{
    AuditEvent, AuditResult, BackendError, DatabaseKind, OperationKind, Params, PermissionLevel,
    Query, QueryOutcome, RiskLevel, Row,
};
use graphwarden_guard::{
    BatchOperation, BatchRequest, GuardEngine, GuardError, QueryRequest, TxnStatus,
};

const SET_FAULT: &str = "MATCH (e:Equipment) SET e.status='fault' RETURN e";

#[derive(Default)]
struct CollectingSink {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditSink for CollectingSink {
    async fn write_batch(&self, events: &[AuditEvent]) -> AuditResultT<()> {
        self.events.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

struct Harness {
    graph: MemoryExecutor,
    sink: Arc<CollectingSink>,
    engine: GuardEngine,
}

impl Harness {
    fn new(graph: MemoryExecutor) -> Self {
        Self::with_config(graph, GuardConfig::default())
    }

    fn with_config(graph: MemoryExecutor, config: GuardConfig) -> Self {
        let sink = Arc::new(CollectingSink::default());
        let writer = Arc::new(AuditWriter::new(&AuditConfig::default(), Some(sink.clone())));
        let engine = GuardEngine::new(Arc::new(graph.clone()), writer, config);
        Self {
            graph,
            sink,
            engine,
        }
    }

    async fn events(&self) -> Vec<AuditEvent> {
        self.engine.audit().flush().await;
        self.sink.events.lock().unwrap().clone()
    }
}

fn entity_rows(state: &MemoryState) -> Vec<Row> {
    state
        .entities
        .iter()
        .map(|entity| {
            let mut row = Row::new();
            row.insert("e".into(), Value::Object(entity.clone()));
            row
        })
        .collect()
}

fn graph_handler(
    text: &str,
    params: &Params,
    state: &mut MemoryState,
) -> Result<QueryOutcome, BackendError> {
    if text == "MATCH (e:Equipment) RETURN *" || text.starts_with("MATCH (e:Equipment) RETURN e") {
        return Ok(QueryOutcome::from_rows(entity_rows(state)));
    }
    if text == SET_FAULT {
        for entity in &mut state.entities {
            entity.insert("status".into(), json!("fault"));
        }
        let rows = entity_rows(state);
        return Ok(QueryOutcome {
            affected_nodes: rows.len() as u64,
            rows,
            ..Default::default()
        });
    }
    if text.starts_with("CREATE (s:Sensor") {
        if params.get("id") == Some(&json!("bad")) {
            return Err(BackendError::Query("constraint violated: Sensor.id".into()));
        }
        let mut sensor = Row::new();
        sensor.insert("id".into(), params.get("id").cloned().unwrap_or(Value::Null));
        state.entities.push(sensor);
        return Ok(QueryOutcome {
            affected_nodes: 1,
            ..Default::default()
        });
    }
    Ok(QueryOutcome::default())
}

fn seeded_graph() -> MemoryExecutor {
    let mut equipment = Row::new();
    equipment.insert("status".into(), json!("ok"));
    MemoryExecutor::new(DatabaseKind::Neo4j, graph_handler)
        .with_state(MemoryState::with_entities(vec![equipment]))
}

#[tokio::test]
async fn detach_delete_is_blocked_without_touching_the_graph() {
    let h = Harness::new(seeded_graph());
    let request = QueryRequest::new(Query::new("MATCH (n) DETACH DELETE n"), PermissionLevel::Admin);

    let err = h.engine.execute(&request).await.unwrap_err();
    assert!(matches!(err, GuardError::Validation { .. }));
    assert!(err.to_string().contains("DETACH DELETE"));
    assert!(h.graph.calls().is_empty());

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, AuditResult::Failure);
    assert_eq!(events[0].risk_level, RiskLevel::High);
}

#[tokio::test]
async fn danger_keywords_never_reach_the_backend() {
    let h = Harness::new(seeded_graph());
    let keywords = [
        "DETACH DELETE n", "DELETE n", "REMOVE n.status", "DROP INDEX idx",
        "CREATE INDEX FOR (x:X) ON (x.id)", "CREATE CONSTRAINT c FOR (x:X) REQUIRE x.id IS UNIQUE",
        "CALL dbms.components()", "CALL apoc.help('x')", "LOAD CSV FROM 'f' AS r",
    ];
    for keyword in keywords {
        for template in ["{k}", "MATCH (n) {k}", "MATCH (n) WITH n {k} RETURN 1"] {
            for text in [template.replace("{k}", keyword), template.replace("{k}", &keyword.to_lowercase())] {
                let request = QueryRequest::new(Query::new(text.clone()), PermissionLevel::Admin);
                let err = h.engine.execute(&request).await.unwrap_err();
                assert!(matches!(err, GuardError::Validation { .. }), "{text}");
            }
        }
    }
    assert!(h.graph.calls().is_empty());
}

#[tokio::test]
async fn comment_markers_in_literals_cannot_hide_deletes() {
    let h = Harness::new(seeded_graph());
    let texts = [
        "MATCH (n {url: 'http://plant.local'}) DETACH DELETE n RETURN count(*) AS c",
        "MATCH (n {note: '/*'}) DELETE n RETURN '*/' AS c",
    ];
    for text in texts {
        let request = QueryRequest::new(Query::new(text), PermissionLevel::ReadOnly);
        let err = h.engine.execute(&request).await.unwrap_err();
        assert!(matches!(err, GuardError::Validation { .. }), "{text}");
    }
    assert!(h.graph.calls().is_empty());
    assert_eq!(h.graph.state().entities.len(), 1);
}

#[tokio::test]
async fn set_below_level_three_is_denied() {
    let h = Harness::new(seeded_graph());
    let request = QueryRequest::new(Query::new(SET_FAULT), PermissionLevel::Authenticated);

    let err = h.engine.execute(&request).await.unwrap_err();
    match &err {
        GuardError::Policy { required, .. } => assert_eq!(*required, PermissionLevel::Elevated),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains("level 3"));
    assert!(h.graph.calls().is_empty());

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].details["required_level"], json!(3));
}

#[tokio::test]
async fn set_at_level_three_captures_before_and_after() {
    let h = Harness::new(seeded_graph());
    let request = QueryRequest::new(Query::new(SET_FAULT), PermissionLevel::Elevated).actor("ops");

    let response = h.engine.execute(&request).await.unwrap();
    assert!(response.success);
    assert_eq!(response.affected_nodes, 1);
    assert_eq!(response.audit_trail.before_state, Some(json!([{"status": "ok"}])));
    assert_eq!(response.audit_trail.after_state, Some(json!([{"status": "fault"}])));
    assert!(response.transaction_id.is_some());

    assert_eq!(h.graph.state().entities[0]["status"], json!("fault"));

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.operation_type, OperationKind::Set);
    assert_eq!(event.affected_node_count, 1);
    assert_eq!(event.result, AuditResult::Success);
    assert_eq!(event.actor.as_deref(), Some("ops"));
    assert_eq!(event.transaction_id, response.transaction_id);
    assert_eq!(event.before_state, Some(json!([{"status": "ok"}])));
}

#[tokio::test]
async fn reads_bypass_transactions_and_get_a_limit() {
    let h = Harness::new(seeded_graph());
    let request = QueryRequest::new(
        Query::new("MATCH (e:Equipment) RETURN e"),
        PermissionLevel::ReadOnly,
    )
    .limit(5000);

    let response = h.engine.execute(&request).await.unwrap();
    assert_eq!(response.data.len(), 1);
    assert!(response.transaction_id.is_none());

    let calls = h.graph.calls();
    assert!(!calls.contains(&MemoryCall::Begin));
    assert_eq!(
        calls,
        vec![MemoryCall::Query {
            text: "MATCH (e:Equipment) RETURN e\nLIMIT 1000".into(),
            in_transaction: false,
        }]
    );
}

#[tokio::test]
async fn commented_limit_does_not_lift_the_cap() {
    let h = Harness::new(seeded_graph());
    let request = QueryRequest::new(
        Query::new("MATCH (e:Equipment) RETURN e // LIMIT 5"),
        PermissionLevel::ReadOnly,
    );

    h.engine.execute(&request).await.unwrap();
    assert_eq!(
        h.graph.calls(),
        vec![MemoryCall::Query {
            text: "MATCH (e:Equipment) RETURN e // LIMIT 5\nLIMIT 1000".into(),
            in_transaction: false,
        }]
    );
}

fn sensor(id: Value) -> BatchOperation {
    BatchOperation {
        query: "CREATE (s:Sensor {id: $id})".into(),
        params: [("id".to_string(), id)].into_iter().collect(),
        capture_state: true,
    }
}

fn batch(operations: Vec<BatchOperation>, stop_on_first_error: bool) -> BatchRequest {
    BatchRequest {
        operations,
        stop_on_first_error,
        level: PermissionLevel::Authenticated,
        actor: Some("loader".into()),
    }
}

#[tokio::test]
async fn failing_batch_rolls_back_everything() {
    let graph = MemoryExecutor::new(DatabaseKind::Neo4j, graph_handler);
    let h = Harness::new(graph);
    let request = batch(vec![sensor(json!(1)), sensor(json!("bad")), sensor(json!(3))], true);

    let response = h.engine.execute_batch(&request).await.unwrap();
    assert!(!response.success);
    assert_eq!(response.status, TxnStatus::RolledBack);
    assert_eq!(response.failures().count(), 1);
    assert_eq!(response.results.len(), 2);
    assert!(h.graph.state().entities.is_empty());
    assert!(!h.graph.calls().contains(&MemoryCall::Commit));

    let events = h.events().await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].result, AuditResult::Warning);
    assert_eq!(events[1].result, AuditResult::Failure);
    assert!(events.iter().all(|e| e.transaction_id.as_deref() == Some(response.transaction_id.as_str())));
}

#[tokio::test]
async fn best_effort_batch_keeps_successes() {
    let graph = MemoryExecutor::new(DatabaseKind::Neo4j, graph_handler);
    let h = Harness::new(graph);
    let request = batch(vec![sensor(json!(1)), sensor(json!("bad")), sensor(json!(3))], false);

    let response = h.engine.execute_batch(&request).await.unwrap();
    assert_eq!(response.status, TxnStatus::Committed);
    assert_eq!(response.results.len(), 3);
    assert_eq!(h.graph.state().entities.len(), 2);
    assert_eq!(h.events().await.len(), 3);
}

#[tokio::test]
async fn one_rejected_operation_refuses_the_batch() {
    let graph = MemoryExecutor::new(DatabaseKind::Neo4j, graph_handler);
    let h = Harness::new(graph);
    let mut ops = vec![sensor(json!(1))];
    ops.push(BatchOperation {
        query: "MATCH (s:Sensor) DELETE s".into(),
        params: Params::new(),
        capture_state: false,
    });

    let err = h.engine.execute_batch(&batch(ops, true)).await.unwrap_err();
    assert!(matches!(err, GuardError::BatchItem { index: 1, .. }));
    assert!(h.graph.calls().is_empty());
    assert_eq!(h.events().await.len(), 1);
}

#[tokio::test]
async fn oversized_batch_is_refused_up_front() {
    let graph = MemoryExecutor::new(DatabaseKind::Neo4j, graph_handler);
    let config = GuardConfig {
        max_operations: 2,
        ..Default::default()
    };
    let h = Harness::with_config(graph, config);
    let request = batch(vec![sensor(json!(1)), sensor(json!(2)), sensor(json!(3))], true);

    let err = h.engine.execute_batch(&request).await.unwrap_err();
    assert!(matches!(err, GuardError::OperationCeiling { .. }));
    assert!(h.graph.calls().is_empty());

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].risk_level, RiskLevel::Critical);
}

#[tokio::test(start_paused = true)]
async fn timeout_is_audited_with_the_bound() {
    let graph = seeded_graph().with_latency(Duration::from_secs(60));
    let config = GuardConfig {
        query_timeout_ms: 250,
        ..Default::default()
    };
    let h = Harness::with_config(graph, config);
    let request = QueryRequest::new(Query::new(SET_FAULT), PermissionLevel::Elevated);

    let err = h.engine.execute(&request).await.unwrap_err();
    let transaction_id = err.transaction_id().map(str::to_string);
    assert!(matches!(err, GuardError::Timeout { .. }));
    assert_eq!(h.graph.state().entities[0]["status"], json!("ok"));

    let events = h.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].execution_time_ms, 250);
    assert_eq!(events[0].transaction_id, transaction_id);
}

#[tokio::test]
async fn heavy_write_is_rejected_for_complexity() {
    let h = Harness::new(seeded_graph());
    let text = "MATCH (a)-[:R*1..5]->(b) OPTIONAL MATCH (b)-[:S*1..5]->(c) \
                MERGE (a)-[:T]->(c) SET c.flag = true";
    let request = QueryRequest::new(Query::new(text), PermissionLevel::Admin);

    let err = h.engine.execute(&request).await.unwrap_err();
    assert!(matches!(err, GuardError::Complexity { ceiling: 80, .. }));
    assert!(h.graph.calls().is_empty());
    assert_eq!(h.events().await[0].risk_level, RiskLevel::Critical);
}
