//! CLI entry point for the graphwarden query guard.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tracing_subscriber::{fmt, EnvFilter};

use graphwarden_audit::schema::{bootstrap, load_policies, BootstrapOutcome};
use graphwarden_audit::{AuditReader, AuditWriter, SqlAuditSink, SqlClient};
use graphwarden_core::config::Settings;
use graphwarden_core::{DatabaseExecutor, Params, PermissionLevel, Query};
use graphwarden_graph::GraphClient;

use graphwarden_guard::{BatchRequest, GuardEngine, QueryRequest, QueryResponse};

#[derive(Parser)]
#[command(name = "graphwarden")]
#[command(about = "Permission-tiered, audited access to a Neo4j knowledge graph")]
struct Cli {
    /// Config file prefix (default: graphwarden).
    #[arg(short, long, default_value = "graphwarden", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one guarded query.
    Run {
        #[arg(short, long)]
        query: String,
        /// Caller permission level (1-4).
        #[arg(short, long, default_value_t = 1)]
        level: u8,
        /// Query parameter as name=value; value is parsed as JSON when possible.
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Requested row limit for reads.
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Execute a JSON batch file in one transaction.
    Batch {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        level: u8,
        #[arg(long)]
        actor: Option<String>,
        /// Keep going after a failed operation and commit the rest.
        #[arg(long)]
        continue_on_error: bool,
    },
    /// Create the audit tables and seed retention policies.
    Bootstrap,
    /// Verify both backends are reachable.
    Check,
    /// Show recorded audit events.
    Audit {
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
        /// Only events from this transaction, oldest first.
        #[arg(long)]
        transaction_id: Option<String>,
    },
    /// List retention policies stored in the audit database.
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Command::Bootstrap => {
            let sql = SqlClient::connect(&settings.postgres).await?;
            let outcome = bootstrap(&sql).await?;
            tracing::info!(?outcome, "Audit bootstrap finished");
            if let BootstrapOutcome::Unavailable { reason } = outcome {
                anyhow::bail!("audit tables could not be created: {reason}");
            }
        }
        Command::Check => check(&settings).await?,
        Command::Audit {
            limit,
            transaction_id,
        } => {
            let sql = SqlClient::connect(&settings.postgres).await?;
            let reader = AuditReader::new(Arc::new(sql));
            let events = match transaction_id {
                Some(id) => reader.events_for_transaction(&id).await?,
                None => reader.recent_events(limit).await?,
            };
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
        Command::Policies => {
            let sql = SqlClient::connect(&settings.postgres).await?;
            let policies = load_policies(&sql).await?;
            println!("{}", serde_json::to_string_pretty(&policies)?);
        }
        Command::Run {
            query,
            level,
            params,
            limit,
            actor,
        } => {
            let mut request = QueryRequest::new(
                Query::with_params(query, parse_params(&params)?),
                PermissionLevel::try_from(level)?,
            );
            request.limit = limit;
            request.actor = actor;
            with_engine(&settings, |engine| async move {
                let response = match engine.execute(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        let verdict = engine.assess(request.query.text(), request.level);
                        QueryResponse::failed(&e, verdict.classification().complexity_score)
                    }
                };
                Ok(serde_json::to_value(response)?)
            })
            .await?;
        }
        Command::Batch {
            file,
            level,
            actor,
            continue_on_error,
        } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading batch file {}", file.display()))?;
            let mut request: BatchRequest = serde_json::from_str(&raw)?;
            request.level = PermissionLevel::try_from(level)?;
            if actor.is_some() {
                request.actor = actor;
            }
            if continue_on_error {
                request.stop_on_first_error = false;
            }
            with_engine(&settings, |engine| async move {
                let output = match engine.execute_batch(&request).await {
                    Ok(response) => serde_json::to_value(response)?,
                    Err(e) => serde_json::to_value(QueryResponse::failed(&e, 0))?,
                };
                Ok(output)
            })
            .await?;
        }
    }

    Ok(())
}

/// Build the engine, run `work` unless interrupted, print its JSON result,
/// and flush the audit trail before returning. A result with
/// `"success": false` is printed and then reported as an error.
async fn with_engine<F, Fut>(settings: &Settings, work: F) -> anyhow::Result<()>
where
    F: FnOnce(Arc<GuardEngine>) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<Value>>,
{
    let graph = GraphClient::connect(&settings.neo4j).await?;
    tracing::info!("Connected to Neo4j");

    let writer = Arc::new(audit_writer(settings).await);
    let flusher = writer.spawn_flush_loop();
    let engine = Arc::new(GuardEngine::new(
        Arc::new(graph),
        writer.clone(),
        settings.guard.clone(),
    ));

    let result = tokio::select! {
        result = work(engine) => result,
        _ = shutdown_signal() => Err(anyhow::anyhow!("interrupted")),
    };

    flusher.shutdown().await;
    let stats = writer.stats();
    tracing::info!(
        flushes = stats.flushes,
        persisted = stats.persisted_events,
        fallback = stats.fallback_events,
        "Audit trail flushed"
    );

    let output = result?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    if output["success"] == Value::Bool(false) {
        anyhow::bail!("query did not succeed");
    }
    Ok(())
}

/// Audit writer backed by Postgres, or log-only when the store is out of reach.
async fn audit_writer(settings: &Settings) -> AuditWriter {
    if !settings.audit.enabled {
        return AuditWriter::log_only(&settings.audit);
    }

    let sql = match SqlClient::connect(&settings.postgres).await {
        Ok(sql) => Arc::new(sql),
        Err(e) => {
            tracing::warn!(error = %e, "Audit database unavailable, logging events only");
            return AuditWriter::log_only(&settings.audit);
        }
    };

    match bootstrap(&*sql).await {
        Ok(BootstrapOutcome::Unavailable { reason }) => {
            tracing::warn!(%reason, "Audit tables unavailable, logging events only");
            AuditWriter::log_only(&settings.audit)
        }
        Ok(outcome) => {
            tracing::info!(?outcome, "Audit store ready");
            let sink = SqlAuditSink::new(sql, settings.audit.max_state_kib);
            AuditWriter::new(&settings.audit, Some(Arc::new(sink)))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Audit bootstrap failed, logging events only");
            AuditWriter::log_only(&settings.audit)
        }
    }
}

async fn check(settings: &Settings) -> anyhow::Result<()> {
    let graph = GraphClient::connect(&settings.neo4j).await?;
    let graph_ok = report("neo4j", graph.ping().await);

    let sql_ok = match SqlClient::connect(&settings.postgres).await {
        Ok(sql) => report("postgres", sql.ping().await),
        Err(e) => report("postgres", Err(e)),
    };

    if !(graph_ok && sql_ok) {
        anyhow::bail!("one or more backends are unreachable");
    }
    Ok(())
}

fn report(backend: &str, result: Result<(), graphwarden_core::BackendError>) -> bool {
    match result {
        Ok(()) => {
            tracing::info!(backend, "Backend reachable");
            true
        }
        Err(e) => {
            tracing::error!(backend, error = %e, "Backend unreachable");
            false
        }
    }
}

fn parse_params(raw: &[String]) -> anyhow::Result<Params> {
    let mut params = Params::new();
    for entry in raw {
        let (name, value) = entry
            .split_once('=')
            .with_context(|| format!("parameter {entry:?} is not name=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(name.trim().to_string(), value);
    }
    Ok(params)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
