//! In-memory accumulation of audit events.
//!
//! The [`BatchManager`] owns the pending [`AuditBatch`]. Appends and flushes
//! both go through one lock; a flush swaps in a fresh batch and hands the
//! full one to the caller, so events appended while a write is in flight
//! land in the new batch instead of being lost.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use graphwarden_core::AuditEvent;

/// Events waiting to be flushed together.
#[derive(Debug, Clone)]
pub struct AuditBatch {
    events: Vec<AuditEvent>,
    total_bytes: usize,
    created_at: DateTime<Utc>,
}

impl AuditBatch {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            total_bytes: 0,
            created_at: Utc::now(),
        }
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.total_bytes += event.encoded_len();
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<AuditEvent> {
        self.events
    }
}

impl Default for AuditBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Thresholds that force a flush.
#[derive(Debug, Clone, Copy)]
pub struct BatchLimits {
    pub max_events: usize,
    pub max_bytes: usize,
}

/// Owner of the pending audit batch.
pub struct BatchManager {
    limits: BatchLimits,
    current: Mutex<AuditBatch>,
}

impl BatchManager {
    pub fn new(limits: BatchLimits) -> Self {
        Self {
            limits,
            current: Mutex::new(AuditBatch::new()),
        }
    }

    /// Add an event. Returns the swapped-out batch when a threshold is hit.
    pub fn append(&self, event: AuditEvent) -> Option<AuditBatch> {
        let mut current = self.lock();
        current.push(event);
        let full = current.len() >= self.limits.max_events
            || current.total_bytes() > self.limits.max_bytes;
        full.then(|| std::mem::take(&mut *current))
    }

    /// Swap out whatever is pending, if anything.
    pub fn take(&self) -> Option<AuditBatch> {
        let mut current = self.lock();
        (!current.is_empty()).then(|| std::mem::take(&mut *current))
    }

    /// Pending event count and encoded size.
    pub fn pending(&self) -> (usize, usize) {
        let current = self.lock();
        (current.len(), current.total_bytes())
    }

    fn lock(&self) -> MutexGuard<'_, AuditBatch> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphwarden_core::EventType;

    fn event() -> AuditEvent {
        AuditEvent::builder(EventType::GraphRead, "read").build()
    }

    #[test]
    fn swaps_at_event_threshold() {
        let manager = BatchManager::new(BatchLimits {
            max_events: 3,
            max_bytes: usize::MAX,
        });
        assert!(manager.append(event()).is_none());
        assert!(manager.append(event()).is_none());
        let batch = manager.append(event()).expect("third event fills the batch");
        assert_eq!(batch.len(), 3);
        assert_eq!(manager.pending().0, 0);
    }

    #[test]
    fn swaps_when_bytes_exceeded() {
        let manager = BatchManager::new(BatchLimits {
            max_events: 100,
            max_bytes: 10,
        });
        let batch = manager.append(event()).expect("one event exceeds 10 bytes");
        assert_eq!(batch.len(), 1);
        assert!(batch.total_bytes() > 10);
    }

    #[test]
    fn take_returns_none_when_empty() {
        let manager = BatchManager::new(BatchLimits {
            max_events: 10,
            max_bytes: usize::MAX,
        });
        assert!(manager.take().is_none());
        manager.append(event());
        let batch = manager.take().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(manager.take().is_none());
    }

    #[test]
    fn appends_after_swap_start_fresh_batch() {
        let manager = BatchManager::new(BatchLimits {
            max_events: 2,
            max_bytes: usize::MAX,
        });
        manager.append(event());
        let first = manager.append(event()).unwrap();
        manager.append(event());
        assert_eq!(first.len(), 2);
        assert_eq!(manager.pending().0, 1);
    }
}
