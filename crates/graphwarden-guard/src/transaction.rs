//! Transaction coordination: timeouts, rollback, and the operation ceiling.
//!
//! Every write runs in a transaction private to the call that opened it.
//! The whole unit of work races a timer; losing the race, a backend error,
//! or passing the operation ceiling all end in rollback, and the error
//! goes back with the transaction id attached. A timed-out statement is
//! abandoned rather than cancelled at the backend; the rollback tells the
//! database to discard its changes.
//!
//! State snapshots run through the executor outside the transaction, so a
//! failing snapshot cannot abort the write. The before state is read from
//! committed data just ahead of the statement, the after state once the
//! transaction has committed. Within a batch, each before state therefore
//! excludes the batch's own earlier, uncommitted items.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use graphwarden_core::config::GuardConfig;
use graphwarden_core::{
    BackendError, BackendTransaction, DatabaseExecutor, OperationKind, Params, QueryOutcome,
};

use crate::capture::{capture, SnapshotPlan};
use crate::error::{GuardError, Result};

/// Lifecycle of a guarded transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Open,
    Committed,
    RolledBack,
}

/// A statement ready to run, with its snapshot plan if it captures state.
#[derive(Debug, Clone)]
pub struct PlannedOperation {
    pub operation: OperationKind,
    pub text: String,
    pub params: Params,
    pub snapshot: Option<SnapshotPlan>,
}

/// What one statement produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedOperation {
    pub outcome: QueryOutcome,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub execution_time_ms: u64,
}

/// Final view of a transaction after it has been closed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionSummary {
    pub id: String,
    pub status: TxnStatus,
    pub started_at: DateTime<Utc>,
    pub operation_count: usize,
}

/// Result of one item in a batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub index: usize,
    pub result: std::result::Result<ExecutedOperation, BackendError>,
}

#[derive(Debug, Clone)]
pub struct BatchExecution {
    pub transaction: TransactionSummary,
    pub items: Vec<BatchItem>,
}

struct OpenTransaction {
    id: String,
    started_at: DateTime<Utc>,
    status: TxnStatus,
    operation_count: usize,
}

impl OpenTransaction {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            status: TxnStatus::Open,
            operation_count: 0,
        }
    }

    fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id.clone(),
            status: self.status,
            started_at: self.started_at,
            operation_count: self.operation_count,
        }
    }
}

enum StepFailure {
    Backend(BackendError),
    Ceiling { count: usize },
}

/// Runs reads directly and writes inside bounded transactions.
pub struct TransactionCoordinator {
    executor: Arc<dyn DatabaseExecutor>,
    timeout: Duration,
    max_operations: usize,
}

impl TransactionCoordinator {
    pub fn new(executor: Arc<dyn DatabaseExecutor>, config: &GuardConfig) -> Self {
        Self {
            executor,
            timeout: Duration::from_millis(config.query_timeout_ms),
            max_operations: config.max_operations,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    /// Run a read outside any transaction, under the timeout.
    pub async fn execute_read(&self, text: &str, params: &Params) -> Result<ExecutedOperation> {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.timeout, self.executor.query(text, params)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(source)) => {
                return Err(GuardError::Execution {
                    transaction_id: None,
                    source,
                })
            }
            Err(_) => {
                return Err(GuardError::Timeout {
                    transaction_id: None,
                    timeout_ms: self.timeout_ms(),
                })
            }
        };
        Ok(ExecutedOperation {
            outcome,
            before_state: None,
            after_state: None,
            execution_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Run one write in its own transaction.
    pub async fn execute_write(
        &self,
        op: &PlannedOperation,
    ) -> Result<(TransactionSummary, ExecutedOperation)> {
        let mut state = OpenTransaction::new();
        let mut txn = self.begin(&state).await?;
        let before_state = self.snapshot(op).await;

        let raced = tokio::time::timeout(self.timeout, self.step(txn.as_mut(), &mut state, op)).await;
        match raced {
            Ok(Ok(mut executed)) => {
                self.commit(txn, &mut state).await?;
                executed.before_state = before_state;
                executed.after_state = self.snapshot(op).await;
                Ok((state.summary(), executed))
            }
            Ok(Err(failure)) => {
                self.rollback(txn, &mut state).await;
                Err(self.step_error(failure, &state))
            }
            Err(_) => {
                self.rollback(txn, &mut state).await;
                Err(self.timeout_error(&state))
            }
        }
    }

    /// Run a batch in one transaction.
    ///
    /// With `stop_on_first_error`, the first failing item ends the loop and
    /// everything is rolled back. Without it, failures are recorded per item
    /// and the rest still commits.
    pub async fn execute_batch(
        &self,
        ops: &[PlannedOperation],
        stop_on_first_error: bool,
    ) -> Result<BatchExecution> {
        if ops.len() > self.max_operations {
            return Err(GuardError::OperationCeiling {
                transaction_id: None,
                count: ops.len(),
                ceiling: self.max_operations,
            });
        }

        let mut state = OpenTransaction::new();
        let mut txn = self.begin(&state).await?;

        let raced = tokio::time::timeout(
            self.timeout,
            self.run_items(txn.as_mut(), &mut state, ops, stop_on_first_error),
        )
        .await;

        let mut items = match raced {
            Ok(Ok(items)) => items,
            Ok(Err(failure)) => {
                self.rollback(txn, &mut state).await;
                return Err(self.step_error(failure, &state));
            }
            Err(_) => {
                self.rollback(txn, &mut state).await;
                return Err(self.timeout_error(&state));
            }
        };

        let failed = items.iter().any(|item| item.result.is_err());
        if failed && stop_on_first_error {
            self.rollback(txn, &mut state).await;
        } else {
            self.commit(txn, &mut state).await?;
            for item in &mut items {
                if let Ok(executed) = &mut item.result {
                    executed.after_state = self.snapshot(&ops[item.index]).await;
                }
            }
        }

        Ok(BatchExecution {
            transaction: state.summary(),
            items,
        })
    }

    async fn run_items(
        &self,
        txn: &mut dyn BackendTransaction,
        state: &mut OpenTransaction,
        ops: &[PlannedOperation],
        stop_on_first_error: bool,
    ) -> std::result::Result<Vec<BatchItem>, StepFailure> {
        let mut items = Vec::with_capacity(ops.len());
        for (index, op) in ops.iter().enumerate() {
            let before_state = self.snapshot(op).await;
            match self.step(&mut *txn, state, op).await {
                Ok(mut executed) => {
                    executed.before_state = before_state;
                    items.push(BatchItem {
                        index,
                        result: Ok(executed),
                    });
                }
                Err(StepFailure::Backend(e)) => {
                    tracing::warn!(transaction_id = %state.id, index, error = %e, "Batch operation failed");
                    items.push(BatchItem {
                        index,
                        result: Err(e),
                    });
                    if stop_on_first_error {
                        break;
                    }
                }
                Err(ceiling) => return Err(ceiling),
            }
        }
        Ok(items)
    }

    async fn step(
        &self,
        txn: &mut dyn BackendTransaction,
        state: &mut OpenTransaction,
        op: &PlannedOperation,
    ) -> std::result::Result<ExecutedOperation, StepFailure> {
        let started = Instant::now();
        let outcome = txn
            .query(&op.text, &op.params)
            .await
            .map_err(StepFailure::Backend)?;
        let execution_time_ms = started.elapsed().as_millis() as u64;

        state.operation_count += 1;
        if state.operation_count > self.max_operations {
            return Err(StepFailure::Ceiling {
                count: state.operation_count,
            });
        }

        Ok(ExecutedOperation {
            outcome,
            before_state: None,
            after_state: None,
            execution_time_ms,
        })
    }

    async fn snapshot(&self, op: &PlannedOperation) -> Option<Value> {
        let plan = op.snapshot.as_ref()?;
        Some(capture(self.executor.as_ref(), plan, &op.params, self.timeout).await)
    }

    async fn begin(&self, state: &OpenTransaction) -> Result<Box<dyn BackendTransaction>> {
        let txn = self
            .executor
            .begin_transaction()
            .await
            .map_err(|source| GuardError::Execution {
                transaction_id: Some(state.id.clone()),
                source,
            })?;
        tracing::debug!(transaction_id = %state.id, "Transaction opened");
        Ok(txn)
    }

    async fn commit(
        &self,
        txn: Box<dyn BackendTransaction>,
        state: &mut OpenTransaction,
    ) -> Result<()> {
        txn.commit().await.map_err(|source| GuardError::Execution {
            transaction_id: Some(state.id.clone()),
            source,
        })?;
        state.status = TxnStatus::Committed;
        tracing::debug!(
            transaction_id = %state.id,
            operations = state.operation_count,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll back, logging rather than returning a rollback failure so the
    /// original error is what the caller sees.
    async fn rollback(&self, txn: Box<dyn BackendTransaction>, state: &mut OpenTransaction) {
        if let Err(e) = txn.rollback().await {
            tracing::error!(transaction_id = %state.id, error = %e, "Rollback failed");
        }
        state.status = TxnStatus::RolledBack;
        tracing::info!(transaction_id = %state.id, "Transaction rolled back");
    }

    fn step_error(&self, failure: StepFailure, state: &OpenTransaction) -> GuardError {
        match failure {
            StepFailure::Backend(source) => GuardError::Execution {
                transaction_id: Some(state.id.clone()),
                source,
            },
            StepFailure::Ceiling { count } => GuardError::OperationCeiling {
                transaction_id: Some(state.id.clone()),
                count,
                ceiling: self.max_operations,
            },
        }
    }

    fn timeout_error(&self, state: &OpenTransaction) -> GuardError {
        tracing::warn!(transaction_id = %state.id, timeout_ms = self.timeout_ms(), "Transaction timed out");
        GuardError::Timeout {
            transaction_id: Some(state.id.clone()),
            timeout_ms: self.timeout_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwarden_core::memory::{MemoryCall, MemoryExecutor};
    use graphwarden_core::{DatabaseKind, Row};
    use serde_json::json;

    /// `ADD <name>` appends an entity, `FAIL` errors, `SNAP` reads every
    /// entity, anything else is a no-op.
    fn backend() -> MemoryExecutor {
        MemoryExecutor::new(DatabaseKind::Neo4j, |text, _, state| {
            if text == "SNAP" {
                return Ok(QueryOutcome::from_rows(state.entities.clone()));
            }
            if let Some(name) = text.strip_prefix("ADD ") {
                let mut row = Row::new();
                row.insert("name".into(), json!(name));
                state.entities.push(row);
                return Ok(QueryOutcome {
                    affected_nodes: 1,
                    ..Default::default()
                });
            }
            if text == "FAIL" {
                return Err(BackendError::Query("constraint violated".into()));
            }
            Ok(QueryOutcome::default())
        })
    }

    fn op(text: &str) -> PlannedOperation {
        PlannedOperation {
            operation: OperationKind::Create,
            text: text.to_string(),
            params: Params::new(),
            snapshot: None,
        }
    }

    fn captured(text: &str, snapshot: &str) -> PlannedOperation {
        PlannedOperation {
            snapshot: Some(SnapshotPlan {
                query: snapshot.to_string(),
                with_relationships: false,
            }),
            ..op(text)
        }
    }

    fn coordinator(backend: &MemoryExecutor, config: GuardConfig) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(backend.clone()), &config)
    }

    #[tokio::test]
    async fn write_commits_on_success() {
        let backend = backend();
        let coord = coordinator(&backend, GuardConfig::default());

        let (summary, executed) = coord.execute_write(&op("ADD pump")).await.unwrap();
        assert_eq!(summary.status, TxnStatus::Committed);
        assert_eq!(summary.operation_count, 1);
        assert_eq!(executed.outcome.affected_nodes, 1);
        assert_eq!(backend.state().entities.len(), 1);
    }

    #[tokio::test]
    async fn failure_rolls_back_with_transaction_id() {
        let backend = backend();
        let coord = coordinator(&backend, GuardConfig::default());

        let err = coord.execute_write(&op("FAIL")).await.unwrap_err();
        assert!(matches!(err, GuardError::Execution { .. }));
        assert!(err.transaction_id().is_some());
        assert_eq!(backend.calls().last(), Some(&MemoryCall::Rollback));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_times_out_and_rolls_back() {
        let backend = backend().with_latency(Duration::from_secs(5));
        let config = GuardConfig {
            query_timeout_ms: 100,
            ..Default::default()
        };
        let coord = coordinator(&backend, config);

        let err = coord.execute_write(&op("ADD pump")).await.unwrap_err();
        match err {
            GuardError::Timeout {
                transaction_id,
                timeout_ms,
            } => {
                assert!(transaction_id.is_some());
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(backend.state().entities.is_empty());
        assert_eq!(backend.calls().last(), Some(&MemoryCall::Rollback));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read_times_out() {
        let backend = backend().with_latency(Duration::from_secs(5));
        let config = GuardConfig {
            query_timeout_ms: 100,
            ..Default::default()
        };
        let coord = coordinator(&backend, config);
        let err = coord.execute_read("MATCH (n) RETURN n", &Params::new()).await.unwrap_err();
        assert!(matches!(err, GuardError::Timeout { transaction_id: None, .. }));
    }

    #[tokio::test]
    async fn exceeding_ceiling_forces_rollback() {
        let backend = backend();
        let config = GuardConfig {
            max_operations: 0,
            ..Default::default()
        };
        let coord = coordinator(&backend, config);

        let err = coord.execute_write(&op("ADD pump")).await.unwrap_err();
        assert!(matches!(err, GuardError::OperationCeiling { count: 1, ceiling: 0, .. }));
        assert!(backend.state().entities.is_empty());
    }

    #[tokio::test]
    async fn oversized_batch_never_starts() {
        let backend = backend();
        let config = GuardConfig {
            max_operations: 2,
            ..Default::default()
        };
        let coord = coordinator(&backend, config);
        let ops = vec![op("ADD a"), op("ADD b"), op("ADD c")];

        let err = coord.execute_batch(&ops, true).await.unwrap_err();
        assert!(matches!(err, GuardError::OperationCeiling { count: 3, .. }));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn batch_stops_and_rolls_back_on_first_error() {
        let backend = backend();
        let coord = coordinator(&backend, GuardConfig::default());
        let ops = vec![op("ADD a"), op("FAIL"), op("ADD c")];

        let batch = coord.execute_batch(&ops, true).await.unwrap();
        assert_eq!(batch.transaction.status, TxnStatus::RolledBack);
        assert_eq!(batch.items.len(), 2);
        assert!(batch.items[0].result.is_ok());
        assert!(batch.items[1].result.is_err());
        assert!(backend.state().entities.is_empty());
    }

    #[tokio::test]
    async fn best_effort_batch_commits_survivors() {
        let backend = backend();
        let coord = coordinator(&backend, GuardConfig::default());
        let ops = vec![op("ADD a"), op("FAIL"), op("ADD c")];

        let batch = coord.execute_batch(&ops, false).await.unwrap();
        assert_eq!(batch.transaction.status, TxnStatus::Committed);
        assert_eq!(batch.items.len(), 3);
        assert_eq!(batch.transaction.operation_count, 2);
        assert_eq!(backend.state().entities.len(), 2);
    }

    #[tokio::test]
    async fn snapshots_run_outside_the_transaction() {
        let backend = backend();
        let coord = coordinator(&backend, GuardConfig::default());

        let (_, executed) = coord.execute_write(&captured("ADD pump", "SNAP")).await.unwrap();
        assert_eq!(executed.before_state, Some(json!([])));
        assert_eq!(executed.after_state, Some(json!(["pump"])));
        assert_eq!(
            backend.calls(),
            vec![
                MemoryCall::Begin,
                MemoryCall::Query {
                    text: "SNAP".into(),
                    in_transaction: false,
                },
                MemoryCall::Query {
                    text: "ADD pump".into(),
                    in_transaction: true,
                },
                MemoryCall::Commit,
                MemoryCall::Query {
                    text: "SNAP".into(),
                    in_transaction: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn failing_snapshot_does_not_abort_the_write() {
        let backend = backend().abort_on_error();
        let coord = coordinator(&backend, GuardConfig::default());

        let (summary, executed) = coord.execute_write(&captured("ADD pump", "FAIL")).await.unwrap();
        assert_eq!(summary.status, TxnStatus::Committed);
        assert_eq!(backend.state().entities.len(), 1);
        assert_eq!(executed.before_state.unwrap()["capture_unavailable"], json!(true));
        assert_eq!(executed.after_state.unwrap()["capture_unavailable"], json!(true));
    }

    #[tokio::test]
    async fn failing_snapshot_does_not_abort_a_batch() {
        let backend = backend().abort_on_error();
        let coord = coordinator(&backend, GuardConfig::default());
        let ops = vec![captured("ADD a", "FAIL"), captured("ADD b", "SNAP")];

        let batch = coord.execute_batch(&ops, true).await.unwrap();
        assert_eq!(batch.transaction.status, TxnStatus::Committed);
        assert_eq!(backend.state().entities.len(), 2);
        let second = batch.items[1].result.as_ref().unwrap();
        assert_eq!(second.before_state, Some(json!([])));
        assert_eq!(second.after_state, Some(json!(["a", "b"])));
    }
}
