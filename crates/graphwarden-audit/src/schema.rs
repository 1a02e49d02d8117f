//! Audit schema bootstrap.
//!
//! On first use the writer checks for the three audit tables. If any is
//! missing the DDL below runs and default retention policies are seeded.
//! If all exist, bootstrap does nothing, so an out-of-band migration can
//! own the schema where the service account lacks DDL privileges.

use serde_json::json;

use graphwarden_core::{BackendError, BackendTransaction, DatabaseExecutor, Params};

use crate::error::Result;
use crate::retention::RetentionPolicy;

pub const EVENTS_TABLE: &str = "audit_events";
pub const DATABASE_EVENTS_TABLE: &str = "database_audit_events";
pub const RETENTION_TABLE: &str = "audit_retention_policy";

pub const AUDIT_TABLES: [&str; 3] = [EVENTS_TABLE, DATABASE_EVENTS_TABLE, RETENTION_TABLE];

const EXISTING_TABLES: &str = "SELECT table_name::text AS table_name
    FROM information_schema.tables
    WHERE table_schema = current_schema()
      AND table_name IN ('audit_events', 'database_audit_events', 'audit_retention_policy')";

const DDL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS audit_events (
        id BIGSERIAL PRIMARY KEY,
        event_id UUID NOT NULL UNIQUE,
        occurred_at TIMESTAMPTZ NOT NULL,
        event_type VARCHAR(64) NOT NULL,
        actor VARCHAR(255),
        action VARCHAR(255) NOT NULL,
        result VARCHAR(16) NOT NULL,
        risk_level VARCHAR(16) NOT NULL,
        details JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_audit_events_occurred_at ON audit_events (occurred_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_events_type ON audit_events (event_type)",
    "CREATE TABLE IF NOT EXISTS database_audit_events (
        id BIGSERIAL PRIMARY KEY,
        audit_event_id BIGINT NOT NULL REFERENCES audit_events (id) ON DELETE CASCADE,
        database_type VARCHAR(32) NOT NULL,
        operation_type VARCHAR(16) NOT NULL,
        query_hash VARCHAR(64) NOT NULL,
        affected_nodes BIGINT NOT NULL DEFAULT 0,
        affected_relationships BIGINT NOT NULL DEFAULT 0,
        execution_time_ms BIGINT NOT NULL DEFAULT 0,
        complexity_score SMALLINT NOT NULL DEFAULT 0,
        before_state JSONB,
        after_state JSONB,
        transaction_id VARCHAR(64)
    )",
    "CREATE INDEX IF NOT EXISTS idx_database_audit_events_txn ON database_audit_events (transaction_id)",
    "CREATE INDEX IF NOT EXISTS idx_database_audit_events_hash ON database_audit_events (query_hash)",
    "CREATE TABLE IF NOT EXISTS audit_retention_policy (
        id BIGSERIAL PRIMARY KEY,
        event_type_pattern VARCHAR(64) NOT NULL UNIQUE,
        retention_days INTEGER NOT NULL,
        archive_after_days INTEGER NOT NULL,
        delete_after_days INTEGER NOT NULL,
        compress_after_days INTEGER NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_used TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
];

const SEED_POLICY: &str = "INSERT INTO audit_retention_policy
    (event_type_pattern, retention_days, archive_after_days, delete_after_days, compress_after_days)
    VALUES ($event_type_pattern, $retention_days, $archive_after_days, $delete_after_days, $compress_after_days)
    ON CONFLICT (event_type_pattern) DO NOTHING";

const SELECT_POLICIES: &str = "SELECT event_type_pattern, retention_days, archive_after_days,
        delete_after_days, compress_after_days
    FROM audit_retention_policy
    WHERE is_active";

/// What bootstrap found or did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every audit table already existed; nothing ran.
    AlreadyPresent,
    /// Tables were created and retention policies seeded.
    Created { seeded_policies: usize },
    /// The account may not create tables; audit degrades to the log.
    Unavailable { reason: String },
}

impl BootstrapOutcome {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::Unavailable { .. })
    }
}

/// Create the audit schema if any table is missing.
pub async fn bootstrap(executor: &dyn DatabaseExecutor) -> Result<BootstrapOutcome> {
    let existing = executor.query(EXISTING_TABLES, &Params::new()).await?;
    let present: Vec<&str> = existing
        .rows
        .iter()
        .filter_map(|row| row.get("table_name").and_then(|v| v.as_str()))
        .collect();

    if AUDIT_TABLES.iter().all(|t| present.contains(t)) {
        tracing::debug!("Audit tables present, skipping bootstrap");
        return Ok(BootstrapOutcome::AlreadyPresent);
    }

    tracing::info!(present = ?present, "Audit tables missing, running bootstrap");

    let mut txn = executor.begin_transaction().await?;
    match create_and_seed(txn.as_mut()).await {
        Ok(seeded) => {
            txn.commit().await?;
            tracing::info!(seeded_policies = seeded, "Audit schema created");
            Ok(BootstrapOutcome::Created {
                seeded_policies: seeded,
            })
        }
        Err(err) => {
            if let Err(rb) = txn.rollback().await {
                tracing::warn!(error = %rb, "Rollback after failed bootstrap also failed");
            }
            match err {
                BackendError::PermissionDenied(reason) => {
                    tracing::warn!(
                        reason = %reason,
                        "No privilege to create audit tables, audit trail is log-only"
                    );
                    Ok(BootstrapOutcome::Unavailable { reason })
                }
                other => Err(other.into()),
            }
        }
    }
}

async fn create_and_seed(
    txn: &mut dyn BackendTransaction,
) -> std::result::Result<usize, BackendError> {
    for statement in DDL {
        txn.query(statement, &Params::new()).await?;
    }

    let policies = RetentionPolicy::defaults();
    for policy in &policies {
        txn.query(SEED_POLICY, &policy_params(policy)).await?;
    }
    Ok(policies.len())
}

fn policy_params(policy: &RetentionPolicy) -> Params {
    let mut params = Params::new();
    params.insert(
        "event_type_pattern".into(),
        json!(policy.event_type_pattern),
    );
    params.insert("retention_days".into(), json!(policy.retention_days));
    params.insert("archive_after_days".into(), json!(policy.archive_after_days));
    params.insert("delete_after_days".into(), json!(policy.delete_after_days));
    params.insert(
        "compress_after_days".into(),
        json!(policy.compress_after_days),
    );
    params
}

/// Load active retention policies from the store.
pub async fn load_policies(executor: &dyn DatabaseExecutor) -> Result<Vec<RetentionPolicy>> {
    let outcome = executor.query(SELECT_POLICIES, &Params::new()).await?;
    outcome
        .rows
        .into_iter()
        .map(|row| {
            serde_json::from_value(serde_json::Value::Object(row)).map_err(Into::into)
        })
        .collect()
}
