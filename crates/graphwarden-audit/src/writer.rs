//! The audit writer: batching, periodic flush, and log fallback.
//!
//! Every event handed to [`AuditWriter::record`] ends up either in durable
//! storage or, if the sink is missing or a write fails, in the log under
//! the `graphwarden::audit` target. Storage failures never reach callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use graphwarden_core::config::AuditConfig;
use graphwarden_core::AuditEvent;

use crate::batch::{AuditBatch, BatchLimits, BatchManager};
use crate::sink::AuditSink;

/// Counters describing what the writer has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub flushes: u64,
    pub persisted_events: u64,
    pub fallback_events: u64,
}

/// Batches audit events and flushes them to a sink.
pub struct AuditWriter {
    batches: BatchManager,
    sink: Option<Arc<dyn AuditSink>>,
    flush_interval: Duration,
    flushes: AtomicU64,
    persisted: AtomicU64,
    fallback: AtomicU64,
}

impl AuditWriter {
    /// Writer persisting through `sink`; `None` means log-only.
    pub fn new(config: &AuditConfig, sink: Option<Arc<dyn AuditSink>>) -> Self {
        let sink = if config.enabled { sink } else { None };
        Self {
            batches: BatchManager::new(BatchLimits {
                max_events: config.batch_size.max(1),
                max_bytes: config.max_batch_bytes,
            }),
            sink,
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            flushes: AtomicU64::new(0),
            persisted: AtomicU64::new(0),
            fallback: AtomicU64::new(0),
        }
    }

    /// Writer that only ever logs.
    pub fn log_only(config: &AuditConfig) -> Self {
        Self::new(config, None)
    }

    pub fn is_persistent(&self) -> bool {
        self.sink.is_some()
    }

    /// Queue an event, flushing if the batch is full.
    pub async fn record(&self, event: AuditEvent) {
        if let Some(batch) = self.batches.append(event) {
            self.write(batch).await;
        }
    }

    /// Flush whatever is pending. Returns the number of events flushed.
    pub async fn flush(&self) -> usize {
        match self.batches.take() {
            Some(batch) => {
                let count = batch.len();
                self.write(batch).await;
                count
            }
            None => 0,
        }
    }

    /// Pending event count and encoded size.
    pub fn pending(&self) -> (usize, usize) {
        self.batches.pending()
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            persisted_events: self.persisted.load(Ordering::Relaxed),
            fallback_events: self.fallback.load(Ordering::Relaxed),
        }
    }

    async fn write(&self, batch: AuditBatch) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        let count = batch.len() as u64;

        let Some(sink) = &self.sink else {
            self.log_fallback(batch.events());
            return;
        };

        match sink.write_batch(batch.events()).await {
            Ok(()) => {
                self.persisted.fetch_add(count, Ordering::Relaxed);
                tracing::debug!(
                    count,
                    bytes = batch.total_bytes(),
                    age_ms = (chrono::Utc::now() - batch.created_at()).num_milliseconds(),
                    "Audit batch flushed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, count, "Audit flush failed, writing events to log");
                self.log_fallback(batch.events());
            }
        }
    }

    fn log_fallback(&self, events: &[AuditEvent]) {
        self.fallback
            .fetch_add(events.len() as u64, Ordering::Relaxed);
        for event in events {
            match serde_json::to_string(event) {
                Ok(json) => tracing::warn!(
                    target: "graphwarden::audit",
                    event_id = %event.id,
                    event = %json,
                    "audit event"
                ),
                Err(e) => tracing::warn!(
                    target: "graphwarden::audit",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    error = %e,
                    "audit event (unserializable)"
                ),
            }
        }
    }

    /// Spawn the periodic flush task.
    ///
    /// The returned handle must be shut down to run the final flush.
    pub fn spawn_flush_loop(self: &Arc<Self>) -> FlushHandle {
        let writer = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let period = self.flush_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let flushed = writer.flush().await;
                        if flushed > 0 {
                            tracing::debug!(flushed, "Periodic audit flush");
                        }
                    }
                    _ = &mut stop_rx => {
                        let flushed = writer.flush().await;
                        tracing::info!(flushed, "Final audit flush on shutdown");
                        break;
                    }
                }
            }
        });

        FlushHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Handle to the background flush task.
pub struct FlushHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Stop the loop after one last flush and wait for it.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Audit flush task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuditError, Result};
    use async_trait::async_trait;
    use graphwarden_core::{BackendError, EventType};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        batches: Mutex<Vec<usize>>,
        fail: bool,
    }

    #[async_trait]
    impl AuditSink for CollectingSink {
        async fn write_batch(&self, events: &[AuditEvent]) -> Result<()> {
            if self.fail {
                return Err(AuditError::Backend(BackendError::Connection("down".into())));
            }
            self.batches.lock().unwrap().push(events.len());
            Ok(())
        }
    }

    fn config(batch_size: usize) -> AuditConfig {
        AuditConfig {
            batch_size,
            ..Default::default()
        }
    }

    fn event() -> AuditEvent {
        AuditEvent::builder(EventType::GraphRead, "read").build()
    }

    #[tokio::test]
    async fn flushes_on_fiftieth_event() {
        let sink = Arc::new(CollectingSink::default());
        let writer = AuditWriter::new(&config(50), Some(sink.clone()));

        for _ in 0..49 {
            writer.record(event()).await;
        }
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(writer.pending().0, 49);

        writer.record(event()).await;
        assert_eq!(*sink.batches.lock().unwrap(), vec![50]);
        assert_eq!(writer.pending().0, 0);
        assert_eq!(writer.stats().persisted_events, 50);
    }

    #[tokio::test]
    async fn sink_failure_falls_back_to_log() {
        let sink = Arc::new(CollectingSink {
            fail: true,
            ..Default::default()
        });
        let writer = AuditWriter::new(&config(2), Some(sink));

        writer.record(event()).await;
        writer.record(event()).await;

        let stats = writer.stats();
        assert_eq!(stats.persisted_events, 0);
        assert_eq!(stats.fallback_events, 2);
    }

    #[tokio::test]
    async fn disabled_audit_is_log_only() {
        let sink = Arc::new(CollectingSink::default());
        let cfg = AuditConfig {
            enabled: false,
            batch_size: 1,
            ..Default::default()
        };
        let writer = AuditWriter::new(&cfg, Some(sink.clone()));
        assert!(!writer.is_persistent());

        writer.record(event()).await;
        assert!(sink.batches.lock().unwrap().is_empty());
        assert_eq!(writer.stats().fallback_events, 1);
    }

    #[tokio::test]
    async fn manual_flush_drains_pending() {
        let sink = Arc::new(CollectingSink::default());
        let writer = AuditWriter::new(&config(50), Some(sink.clone()));
        writer.record(event()).await;
        writer.record(event()).await;

        assert_eq!(writer.flush().await, 2);
        assert_eq!(writer.flush().await, 0);
        assert_eq!(*sink.batches.lock().unwrap(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_flushes_partial_batch() {
        let sink = Arc::new(CollectingSink::default());
        let writer = Arc::new(AuditWriter::new(&config(50), Some(sink.clone())));
        let handle = writer.spawn_flush_loop();

        writer.record(event()).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*sink.batches.lock().unwrap(), vec![1]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_runs_final_flush() {
        let sink = Arc::new(CollectingSink::default());
        let writer = Arc::new(AuditWriter::new(&config(50), Some(sink.clone())));
        let handle = writer.spawn_flush_loop();

        writer.record(event()).await;
        writer.record(event()).await;
        handle.shutdown().await;

        assert_eq!(*sink.batches.lock().unwrap(), vec![2]);
    }
}
