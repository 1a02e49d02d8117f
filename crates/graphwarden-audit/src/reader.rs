//! Read access to the persisted audit trail.

use std::sync::Arc;

use serde_json::json;

use graphwarden_core::{AuditEvent, DatabaseExecutor, Params};

use crate::error::Result;
use crate::record::{event_from_row, SELECT_EVENTS};

/// Queries the audit tables.
pub struct AuditReader {
    executor: Arc<dyn DatabaseExecutor>,
}

impl AuditReader {
    pub fn new(executor: Arc<dyn DatabaseExecutor>) -> Self {
        Self { executor }
    }

    /// The newest `limit` events, newest first.
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<AuditEvent>> {
        let sql = format!("{SELECT_EVENTS}\n    ORDER BY e.occurred_at DESC, e.id DESC\n    LIMIT $limit");
        let mut params = Params::new();
        params.insert("limit".into(), json!(limit));
        self.fetch(&sql, &params).await
    }

    /// Every event recorded under one guarded transaction, oldest first.
    pub async fn events_for_transaction(&self, transaction_id: &str) -> Result<Vec<AuditEvent>> {
        let sql = format!(
            "{SELECT_EVENTS}\n    WHERE d.transaction_id = $transaction_id\n    ORDER BY e.occurred_at, e.id"
        );
        let mut params = Params::new();
        params.insert("transaction_id".into(), json!(transaction_id));
        self.fetch(&sql, &params).await
    }

    async fn fetch(&self, sql: &str, params: &Params) -> Result<Vec<AuditEvent>> {
        let outcome = self.executor.query(sql, params).await?;
        outcome.rows.iter().map(event_from_row).collect()
    }
}
