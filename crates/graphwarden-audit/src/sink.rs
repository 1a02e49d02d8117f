//! Durable audit storage.

use std::sync::Arc;

use async_trait::async_trait;

use graphwarden_core::{AuditEvent, BackendError, BackendTransaction, DatabaseExecutor};

use crate::error::{AuditError, Result};
use crate::record::{database_event_params, event_params, INSERT_DATABASE_EVENT, INSERT_EVENT};

/// Trait for audit persistence backends.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist a batch of events. All or nothing.
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<()>;
}

/// Writes events to the relational audit tables through any executor.
pub struct SqlAuditSink {
    executor: Arc<dyn DatabaseExecutor>,
    max_state_bytes: usize,
}

impl SqlAuditSink {
    pub fn new(executor: Arc<dyn DatabaseExecutor>, max_state_kib: usize) -> Self {
        Self {
            executor,
            max_state_bytes: max_state_kib * 1024,
        }
    }

    async fn write_all(
        &self,
        txn: &mut dyn BackendTransaction,
        events: &[AuditEvent],
    ) -> Result<()> {
        for event in events {
            let inserted = txn.query(INSERT_EVENT, &event_params(event)).await?;
            let row_id = inserted.first_i64("id").ok_or_else(|| {
                AuditError::Decode(format!("no id returned for audit event {}", event.id))
            })?;

            if event.is_database_event() {
                txn.query(
                    INSERT_DATABASE_EVENT,
                    &database_event_params(event, row_id, self.max_state_bytes),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqlAuditSink {
    async fn write_batch(&self, events: &[AuditEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut txn = self.executor.begin_transaction().await?;
        match self.write_all(txn.as_mut(), events).await {
            Ok(()) => {
                txn.commit().await.map_err(AuditError::from)?;
                tracing::debug!(count = events.len(), "Audit batch persisted");
                Ok(())
            }
            Err(err) => {
                if let Err(rb) = txn.rollback().await {
                    log_rollback_failure(&rb);
                }
                Err(err)
            }
        }
    }
}

fn log_rollback_failure(err: &BackendError) {
    tracing::warn!(error = %err, "Rollback of failed audit batch also failed");
}
