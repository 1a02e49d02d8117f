//! In-memory backend for tests and dry runs.
//!
//! Statements are interpreted by a caller-supplied handler that reads and
//! mutates a [`MemoryState`]. Transactions work on a private copy of the
//! state which replaces the shared state on commit and is dropped on
//! rollback, so tests can observe exactly what a rollback discarded.
//! Every call is appended to a log for "was the backend touched" checks.
//!
//! [`MemoryExecutor::abort_on_error`] models Bolt transactions, where one
//! failed statement makes every later statement and the commit fail.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, BackendTransaction, DatabaseExecutor, QueryOutcome};
use crate::types::{DatabaseKind, Params, Row};

/// Mutable world a handler interprets statements against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryState {
    /// Graph-style entities (opaque property maps).
    pub entities: Vec<Row>,
    /// Relational-style tables.
    pub tables: BTreeMap<String, Vec<Row>>,
    /// Next generated identifier for inserted rows.
    pub next_id: i64,
}

impl MemoryState {
    pub fn with_entities(entities: Vec<Row>) -> Self {
        Self {
            entities,
            ..Default::default()
        }
    }

    /// Append a row to a table and return its generated id.
    pub fn insert(&mut self, table: &str, mut row: Row) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        row.insert("id".to_string(), id.into());
        self.tables.entry(table.to_string()).or_default().push(row);
        id
    }

    pub fn table(&self, name: &str) -> &[Row] {
        self.tables.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One interaction with a [`MemoryExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCall {
    Query { text: String, in_transaction: bool },
    Begin,
    Commit,
    Rollback,
    Ping,
}

/// Interprets a statement against the state.
pub type MemoryHandler =
    dyn Fn(&str, &Params, &mut MemoryState) -> Result<QueryOutcome, BackendError> + Send + Sync;

/// Scriptable in-memory [`DatabaseExecutor`]. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct MemoryExecutor {
    kind: DatabaseKind,
    handler: Arc<MemoryHandler>,
    state: Arc<Mutex<MemoryState>>,
    calls: Arc<Mutex<Vec<MemoryCall>>>,
    latency: Option<Duration>,
    abort_on_error: bool,
}

impl MemoryExecutor {
    pub fn new<F>(kind: DatabaseKind, handler: F) -> Self
    where
        F: Fn(&str, &Params, &mut MemoryState) -> Result<QueryOutcome, BackendError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kind,
            handler: Arc::new(handler),
            state: Arc::new(Mutex::new(MemoryState::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: None,
            abort_on_error: false,
        }
    }

    /// A backend that answers every statement with zero rows.
    pub fn empty(kind: DatabaseKind) -> Self {
        Self::new(kind, |_, _, _| Ok(QueryOutcome::default()))
    }

    pub fn with_state(self, state: MemoryState) -> Self {
        *lock(&self.state) = state;
        self
    }

    /// Delay every statement by `latency` before it is interpreted.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// A failed statement poisons its transaction.
    pub fn abort_on_error(mut self) -> Self {
        self.abort_on_error = true;
        self
    }

    /// Copy of the committed state.
    pub fn state(&self) -> MemoryState {
        lock(&self.state).clone()
    }

    pub fn calls(&self) -> Vec<MemoryCall> {
        lock(&self.calls).clone()
    }

    /// Number of statements executed, inside or outside transactions.
    pub fn query_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| matches!(c, MemoryCall::Query { .. }))
            .count()
    }

    fn record(&self, call: MemoryCall) {
        lock(&self.calls).push(call);
    }
}

#[async_trait]
impl DatabaseExecutor for MemoryExecutor {
    fn kind(&self) -> DatabaseKind {
        self.kind
    }

    async fn query(&self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        self.record(MemoryCall::Query {
            text: text.to_string(),
            in_transaction: false,
        });
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = lock(&self.state);
        (self.handler)(text, params, &mut state)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        self.record(MemoryCall::Begin);
        let working = lock(&self.state).clone();
        Ok(Box::new(MemoryTransaction {
            owner: self.clone(),
            working,
            aborted: None,
        }))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.record(MemoryCall::Ping);
        Ok(())
    }
}

struct MemoryTransaction {
    owner: MemoryExecutor,
    working: MemoryState,
    /// Error that aborted the transaction, when aborting is enabled.
    aborted: Option<String>,
}

impl MemoryTransaction {
    fn check_open(&self) -> Result<(), BackendError> {
        match &self.aborted {
            Some(reason) => Err(BackendError::Transaction(format!(
                "transaction aborted by earlier failure: {reason}"
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BackendTransaction for MemoryTransaction {
    async fn query(&mut self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        self.owner.record(MemoryCall::Query {
            text: text.to_string(),
            in_transaction: true,
        });
        self.check_open()?;
        if let Some(latency) = self.owner.latency {
            tokio::time::sleep(latency).await;
        }
        let result = (self.owner.handler)(text, params, &mut self.working);
        if let Err(e) = &result {
            if self.owner.abort_on_error {
                self.aborted = Some(e.to_string());
            }
        }
        result
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.owner.record(MemoryCall::Commit);
        self.check_open()?;
        *lock(&self.owner.state) = self.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.owner.record(MemoryCall::Rollback);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counter_backend() -> MemoryExecutor {
        MemoryExecutor::new(DatabaseKind::Neo4j, |text, _, state| {
            if text.starts_with("CREATE") {
                let mut row = Row::new();
                row.insert("name".into(), json!("n"));
                state.entities.push(row);
                return Ok(QueryOutcome {
                    affected_nodes: 1,
                    ..Default::default()
                });
            }
            Ok(QueryOutcome::from_rows(state.entities.clone()))
        })
    }

    #[tokio::test]
    async fn rollback_discards_transaction_changes() {
        let backend = counter_backend();
        let mut txn = backend.begin_transaction().await.unwrap();
        txn.query("CREATE (n)", &Params::new()).await.unwrap();
        txn.rollback().await.unwrap();

        assert!(backend.state().entities.is_empty());
        assert_eq!(backend.calls().last(), Some(&MemoryCall::Rollback));
    }

    #[tokio::test]
    async fn commit_publishes_transaction_changes() {
        let backend = counter_backend();
        let mut txn = backend.begin_transaction().await.unwrap();
        txn.query("CREATE (n)", &Params::new()).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(backend.state().entities.len(), 1);
        let rows = backend.query("MATCH (n) RETURN n", &Params::new()).await.unwrap();
        assert_eq!(rows.rows.len(), 1);
        assert_eq!(backend.query_count(), 2);
    }

    #[tokio::test]
    async fn failed_statement_aborts_transaction_when_enabled() {
        let backend = MemoryExecutor::new(DatabaseKind::Neo4j, |text, _, state| {
            if text == "BAD" {
                return Err(BackendError::Query("syntax error".into()));
            }
            state.entities.push(Row::new());
            Ok(QueryOutcome::default())
        })
        .abort_on_error();

        let mut txn = backend.begin_transaction().await.unwrap();
        txn.query("CREATE (n)", &Params::new()).await.unwrap();
        assert!(txn.query("BAD", &Params::new()).await.is_err());
        let later = txn.query("CREATE (m)", &Params::new()).await.unwrap_err();
        assert!(matches!(later, BackendError::Transaction(_)));
        assert!(txn.commit().await.is_err());
        assert!(backend.state().entities.is_empty());
    }

    #[tokio::test]
    async fn failed_statement_leaves_transaction_usable_by_default() {
        let backend = MemoryExecutor::new(DatabaseKind::Neo4j, |text, _, state| {
            if text == "BAD" {
                return Err(BackendError::Query("syntax error".into()));
            }
            state.entities.push(Row::new());
            Ok(QueryOutcome::default())
        });

        let mut txn = backend.begin_transaction().await.unwrap();
        assert!(txn.query("BAD", &Params::new()).await.is_err());
        txn.query("CREATE (n)", &Params::new()).await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(backend.state().entities.len(), 1);
    }

    #[test]
    fn insert_assigns_increasing_ids() {
        let mut state = MemoryState::default();
        assert_eq!(state.insert("t", Row::new()), 1);
        assert_eq!(state.insert("t", Row::new()), 2);
        assert_eq!(state.table("t").len(), 2);
        assert!(state.table("missing").is_empty());
    }
}
