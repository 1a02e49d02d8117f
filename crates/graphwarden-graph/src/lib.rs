//! graphwarden-graph: Neo4j backend for the query guard.
//!
//! Implements the uniform [`DatabaseExecutor`](graphwarden_core::DatabaseExecutor)
//! contract over Bolt. All guarded graph reads and writes flow through this
//! crate; parameters travel as JSON and are converted to Bolt at the edge.

pub mod client;
pub mod convert;

pub use client::{GraphClient, GraphConfig, GraphError, GraphTransaction};
