//! PostgreSQL backend for audit persistence.
//!
//! Statements use the same `$name` placeholders as Cypher. They are
//! rewritten to positional `$1..$n` in order of first appearance before
//! being handed to sqlx.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo};

use graphwarden_core::config::PostgresConfig;
use graphwarden_core::{
    BackendError, BackendTransaction, DatabaseExecutor, DatabaseKind, Params, QueryOutcome, Row,
};

/// SQLSTATE for insufficient_privilege.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Pooled PostgreSQL client. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct SqlClient {
    pool: PgPool,
}

impl SqlClient {
    /// Create a connection pool from configuration.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, BackendError> {
        tracing::info!("Connecting to PostgreSQL...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }
}

#[async_trait]
impl DatabaseExecutor for SqlClient {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Postgres
    }

    async fn query(&self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        run(&self.pool, text, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        let tx = self.pool.begin().await.map_err(map_sqlx)?;
        Ok(Box::new(SqlTransaction { tx }))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(())
    }
}

/// An open PostgreSQL transaction.
pub struct SqlTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl BackendTransaction for SqlTransaction {
    async fn query(&mut self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        run(&mut *self.tx, text, params).await
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.tx
            .commit()
            .await
            .map_err(|e| BackendError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| BackendError::Transaction(e.to_string()))
    }
}

async fn run<'c, E>(executor: E, text: &str, params: &Params) -> Result<QueryOutcome, BackendError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let (sql, values) = bind_named(text, params)?;
    let mut query = sqlx::query(&sql);
    for value in &values {
        query = bind_value(query, value);
    }

    if returns_rows(&sql) {
        let rows = query.fetch_all(executor).await.map_err(map_sqlx)?;
        let decoded = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        let affected_rows = decoded.len() as u64;
        Ok(QueryOutcome {
            rows: decoded,
            affected_rows,
            ..Default::default()
        })
    } else {
        let result = query.execute(executor).await.map_err(map_sqlx)?;
        Ok(QueryOutcome {
            affected_rows: result.rows_affected(),
            ..Default::default()
        })
    }
}

/// Rewrite `$name` placeholders to `$1..$n` and collect values in order.
///
/// Quoted literals are left alone, as are already-positional `$1` markers.
pub fn bind_named(text: &str, params: &Params) -> Result<(String, Vec<Value>), BackendError> {
    let mut sql = String::with_capacity(text.len());
    let mut order: Vec<&str> = Vec::new();
    let mut in_quote = false;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            in_quote = !in_quote;
        }
        if c == '$' && !in_quote {
            let ident_len: usize = rest[1..]
                .chars()
                .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
                .map(char::len_utf8)
                .sum();
            let ident = &rest[1..1 + ident_len];
            let named = ident
                .chars()
                .next()
                .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
            if named {
                let position = match order.iter().position(|n| *n == ident) {
                    Some(p) => p + 1,
                    None => {
                        if !params.contains_key(ident) {
                            return Err(BackendError::Query(format!(
                                "missing parameter ${ident}"
                            )));
                        }
                        order.push(ident);
                        order.len()
                    }
                };
                sql.push('$');
                sql.push_str(&position.to_string());
                rest = &rest[1 + ident_len..];
                continue;
            }
        }
        sql.push(c);
        rest = &rest[c.len_utf8()..];
    }

    let values = order
        .iter()
        .map(|name| params.get(*name).cloned().unwrap_or(Value::Null))
        .collect();
    Ok((sql, values))
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("SELECT") || upper.starts_with("WITH") || upper.contains(" RETURNING ")
}

fn map_sqlx(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE) => {
            BackendError::PermissionDenied(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::Connection(err.to_string())
        }
        _ => BackendError::Query(err.to_string()),
    }
}

fn decode_row(row: &PgRow) -> Result<Row, BackendError> {
    let mut out = Row::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let value = match col.type_info().name() {
            "BOOL" => column::<bool>(row, idx),
            "INT2" => column::<i16>(row, idx),
            "INT4" => column::<i32>(row, idx),
            "INT8" => column::<i64>(row, idx),
            "FLOAT4" => column::<f32>(row, idx),
            "FLOAT8" => column::<f64>(row, idx),
            "JSON" | "JSONB" => column::<Value>(row, idx),
            "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(idx).map(|v| {
                v.map(|ts| Value::String(ts.to_rfc3339_opts(SecondsFormat::Micros, true)))
                    .unwrap_or(Value::Null)
            }),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .map(|v| v.map(|ts| Value::String(ts.to_string())).unwrap_or(Value::Null)),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .map(|v| v.map(|id| Value::String(id.to_string())).unwrap_or(Value::Null)),
            _ => column::<String>(row, idx),
        }
        .map_err(|e| BackendError::Conversion(format!("column {}: {e}", col.name())))?;
        out.insert(col.name().to_string(), value);
    }
    Ok(out)
}

fn column<'r, T>(row: &'r PgRow, idx: usize) -> Result<Value, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Into<Value>,
{
    Ok(row
        .try_get::<Option<T>, _>(idx)?
        .map(Into::into)
        .unwrap_or(Value::Null))
}
