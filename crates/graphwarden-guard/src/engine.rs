//! The guarded execution pipeline.
//!
//! classify → policy → complexity → capture (before) → execute → capture
//! (after) → audit. Every call, accepted or not, records exactly one audit
//! event per statement it attempted, or one batch event when a batch fails
//! as a whole.

use std::sync::Arc;
use std::time::Instant;

use graphwarden_audit::AuditWriter;
use graphwarden_core::config::GuardConfig;
use graphwarden_core::{
    AuditResult, BackendError, DatabaseExecutor, OperationKind, Params, PermissionLevel,
    RiskLevel,
};

use crate::audit::{
    batch_failure_event, executed_event, failure_event, rejection_event, EventContext,
};
use crate::capture::SnapshotPlan;
use crate::classifier::Classification;
use crate::complexity::enforce_limit;
use crate::error::{GuardError, Result};
use crate::transaction::{PlannedOperation, TransactionCoordinator, TxnStatus};
use crate::types::{
    AuditTrail, BatchItemResponse, BatchRequest, BatchResponse, QueryRequest, QueryResponse,
};
use crate::verdict::{assess, Verdict};

/// Policy-enforcing, audited access to one graph backend.
pub struct GuardEngine {
    executor: Arc<dyn DatabaseExecutor>,
    coordinator: TransactionCoordinator,
    audit: Arc<AuditWriter>,
    config: GuardConfig,
}

impl GuardEngine {
    pub fn new(
        executor: Arc<dyn DatabaseExecutor>,
        audit: Arc<AuditWriter>,
        config: GuardConfig,
    ) -> Self {
        let coordinator = TransactionCoordinator::new(executor.clone(), &config);
        Self {
            executor,
            coordinator,
            audit,
            config,
        }
    }

    pub fn audit(&self) -> &Arc<AuditWriter> {
        &self.audit
    }

    /// Run the pre-execution checks without touching the backend.
    pub fn assess(&self, text: &str, level: PermissionLevel) -> Verdict {
        assess(text, level, self.config.complexity_ceiling)
    }

    /// Liveness of the guarded backend.
    pub async fn ping(&self) -> std::result::Result<(), BackendError> {
        self.executor.ping().await
    }

    /// Execute one query on behalf of a caller.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let ctx = self.context(request.actor.clone(), "execute_query");

        let accepted = match self.assess(request.query.text(), request.level) {
            Verdict::Accepted(accepted) => accepted,
            Verdict::Rejected(rejection) => {
                tracing::warn!(
                    level = %request.level,
                    operation = %rejection.classification.operation,
                    reason = %rejection.reason,
                    "Query rejected"
                );
                self.audit.record(rejection_event(&ctx, &rejection)).await;
                return Err(rejection.into());
            }
        };
        let classification = &accepted.classification;

        let started = Instant::now();
        let result = if classification.operation == OperationKind::Read {
            let (text, params) = self.bounded_read(request.query.text(), request.query.params(), request.limit);
            self.coordinator
                .execute_read(&text, &params)
                .await
                .map(|executed| (None, executed))
        } else {
            let op = plan_write(classification, request.query.text(), request.query.params(), true);
            self.coordinator
                .execute_write(&op)
                .await
                .map(|(summary, executed)| (Some(summary.id), executed))
        };

        match result {
            Ok((transaction_id, executed)) => {
                tracing::info!(
                    operation = %classification.operation,
                    complexity = classification.complexity_score,
                    affected_nodes = executed.outcome.affected_nodes,
                    elapsed_ms = executed.execution_time_ms,
                    "Query executed"
                );
                self.audit
                    .record(executed_event(
                        &ctx,
                        classification,
                        &executed,
                        transaction_id.as_deref(),
                        AuditResult::Success,
                    ))
                    .await;
                Ok(QueryResponse::succeeded(
                    executed,
                    classification.complexity_score,
                    transaction_id,
                ))
            }
            Err(e) => {
                tracing::error!(error = %e, operation = %classification.operation, "Query failed");
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.audit
                    .record(failure_event(&ctx, classification, &e, elapsed_ms))
                    .await;
                Err(e)
            }
        }
    }

    /// Execute a batch in one transaction.
    ///
    /// The length and every operation are checked before the transaction
    /// opens; one rejected operation refuses the whole batch.
    pub async fn execute_batch(&self, request: &BatchRequest) -> Result<BatchResponse> {
        let ctx = self.context(request.actor.clone(), "execute_batch");
        let count = request.operations.len();

        if count == 0 {
            let err = GuardError::Validation {
                reason: "empty batch".to_string(),
            };
            self.audit
                .record(batch_failure_event(&ctx, &err, 0, RiskLevel::Low))
                .await;
            return Err(err);
        }
        if count > self.config.max_operations {
            let err = GuardError::OperationCeiling {
                transaction_id: None,
                count,
                ceiling: self.config.max_operations,
            };
            self.audit
                .record(batch_failure_event(&ctx, &err, count, RiskLevel::Critical))
                .await;
            return Err(err);
        }

        let mut classifications = Vec::with_capacity(count);
        let mut planned = Vec::with_capacity(count);
        for (index, op) in request.operations.iter().enumerate() {
            match self.assess(&op.query, request.level) {
                Verdict::Accepted(accepted) => {
                    let c = accepted.classification;
                    let plan = if c.operation == OperationKind::Read {
                        let (text, params) = self.bounded_read(&op.query, &op.params, None);
                        PlannedOperation {
                            operation: c.operation,
                            text,
                            params,
                            snapshot: None,
                        }
                    } else {
                        plan_write(&c, &op.query, &op.params, op.capture_state)
                    };
                    planned.push(plan);
                    classifications.push(c);
                }
                Verdict::Rejected(rejection) => {
                    tracing::warn!(index, reason = %rejection.reason, "Batch operation rejected");
                    self.audit.record(rejection_event(&ctx, &rejection)).await;
                    return Err(GuardError::BatchItem {
                        index,
                        source: Box::new(rejection.into()),
                    });
                }
            }
        }

        let batch = match self
            .coordinator
            .execute_batch(&planned, request.stop_on_first_error)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(error = %e, operations = count, "Batch failed");
                let risk = match e {
                    GuardError::OperationCeiling { .. } => RiskLevel::Critical,
                    _ => RiskLevel::High,
                };
                self.audit
                    .record(batch_failure_event(&ctx, &e, count, risk))
                    .await;
                return Err(e);
            }
        };

        let transaction_id = batch.transaction.id.clone();
        let committed = batch.transaction.status == TxnStatus::Committed;
        let mut results = Vec::with_capacity(batch.items.len());

        for item in batch.items {
            let c = &classifications[item.index];
            match item.result {
                Ok(executed) => {
                    let result = if committed {
                        AuditResult::Success
                    } else {
                        AuditResult::Warning
                    };
                    self.audit
                        .record(executed_event(&ctx, c, &executed, Some(&transaction_id), result))
                        .await;
                    results.push(BatchItemResponse {
                        index: item.index,
                        success: true,
                        affected_nodes: executed.outcome.affected_nodes,
                        affected_relationships: executed.outcome.affected_relationships,
                        error: None,
                        audit_trail: AuditTrail {
                            before_state: executed.before_state,
                            after_state: executed.after_state,
                        },
                    });
                }
                Err(source) => {
                    let err = GuardError::Execution {
                        transaction_id: Some(transaction_id.clone()),
                        source,
                    };
                    self.audit.record(failure_event(&ctx, c, &err, 0)).await;
                    results.push(BatchItemResponse {
                        index: item.index,
                        success: false,
                        affected_nodes: 0,
                        affected_relationships: 0,
                        error: Some(err.to_string()),
                        audit_trail: AuditTrail::default(),
                    });
                }
            }
        }

        let success = committed && results.iter().all(|r| r.success);
        tracing::info!(
            transaction_id = %transaction_id,
            status = ?batch.transaction.status,
            operations = results.len(),
            success,
            "Batch finished"
        );

        Ok(BatchResponse {
            success,
            transaction_id,
            status: batch.transaction.status,
            results,
        })
    }

    fn context(&self, actor: Option<String>, action: &'static str) -> EventContext {
        EventContext {
            actor,
            database: self.executor.kind(),
            action,
        }
    }

    fn bounded_read(&self, text: &str, params: &Params, limit: Option<u32>) -> (String, Params) {
        let mut params = params.clone();
        let text = enforce_limit(text, &mut params, limit, self.config.max_result_rows);
        (text, params)
    }
}

fn plan_write(
    classification: &Classification,
    text: &str,
    params: &Params,
    capture_state: bool,
) -> PlannedOperation {
    let snapshot = if capture_state {
        SnapshotPlan::for_write(classification.operation, &classification.sanitized)
    } else {
        None
    };
    PlannedOperation {
        operation: classification.operation,
        text: text.to_string(),
        params: params.clone(),
        snapshot,
    }
}
