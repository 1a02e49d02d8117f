//! Neo4j connection management and the graph backend executor.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::{BoltType, ConfigBuilder, Graph, Query, Txn};

use graphwarden_core::{
    BackendError, BackendTransaction, DatabaseExecutor, DatabaseKind, Params, QueryOutcome, Row,
};

use crate::convert::{bolt_to_json, json_to_bolt, EntityTally};

pub use graphwarden_core::config::GraphConfig;

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error("Neo4j query error: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Row decoding error: {0}")]
    Decode(String),
}

impl From<GraphError> for BackendError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Connection(msg) => BackendError::Connection(msg),
            GraphError::Query(e) => BackendError::Query(e.to_string()),
            GraphError::Decode(msg) => BackendError::Conversion(msg),
        }
    }
}

/// Thread-safe Neo4j graph client with connection pooling.
///
/// Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a statement and collect every row.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, GraphError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Begin a transaction.
    pub async fn start_txn(&self) -> Result<Txn, GraphError> {
        Ok(self.graph.start_txn().await?)
    }
}

#[async_trait]
impl DatabaseExecutor for GraphClient {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Neo4j
    }

    async fn query(&self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        let rows = self.query_rows(build_query(text, params)).await?;
        Ok(decode_rows(&rows)?)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn BackendTransaction>, BackendError> {
        let txn = self.start_txn().await?;
        Ok(Box::new(GraphTransaction { txn }))
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.graph
            .run(neo4rs::query("RETURN 1"))
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))
    }
}

/// An open Neo4j transaction.
pub struct GraphTransaction {
    txn: Txn,
}

#[async_trait]
impl BackendTransaction for GraphTransaction {
    async fn query(&mut self, text: &str, params: &Params) -> Result<QueryOutcome, BackendError> {
        let mut stream = self
            .txn
            .execute(build_query(text, params))
            .await
            .map_err(GraphError::from)?;
        let mut rows = Vec::new();
        while let Some(row) = stream
            .next(self.txn.handle())
            .await
            .map_err(GraphError::from)?
        {
            rows.push(row);
        }
        Ok(decode_rows(&rows)?)
    }

    async fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.txn
            .commit()
            .await
            .map_err(|e| BackendError::Transaction(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), BackendError> {
        self.txn
            .rollback()
            .await
            .map_err(|e| BackendError::Transaction(e.to_string()))
    }
}

/// Bind JSON parameters onto a neo4rs query.
fn build_query(text: &str, params: &Params) -> Query {
    params
        .iter()
        .fold(neo4rs::query(text), |q, (name, value)| {
            q.param(name, json_to_bolt(value))
        })
}

/// Convert Bolt rows to JSON rows and count the distinct entities they hold.
fn decode_rows(rows: &[neo4rs::Row]) -> Result<QueryOutcome, GraphError> {
    let mut tally = EntityTally::default();
    let mut decoded = Vec::with_capacity(rows.len());

    for row in rows {
        let columns: HashMap<String, BoltType> = row
            .to()
            .map_err(|e| GraphError::Decode(format!("Failed to decode row: {e}")))?;
        let mut out = Row::new();
        for (name, value) in &columns {
            tally.observe(value);
            out.insert(name.clone(), bolt_to_json(value));
        }
        decoded.push(out);
    }

    Ok(QueryOutcome {
        rows: decoded,
        affected_nodes: tally.nodes(),
        affected_relationships: tally.relationships(),
        affected_rows: 0,
        counts_from_rows: true,
    })
}
