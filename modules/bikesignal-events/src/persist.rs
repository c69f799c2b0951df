//! EventPersister trait and its implementations.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use bikesignal_common::ReportId;
use chrono::Utc;

use crate::store::EventStore;
use crate::types::{AppendEvent, StoredEvent};

/// Persists audit facts and reads them back per report.
///
/// Implemented by EventStore (postgres) and MemoryEventStore (tests).
/// Also implemented for `Arc<P>` so the store can be shared for assertions.
#[async_trait]
pub trait EventPersister: Send + Sync {
    async fn persist(&self, event: AppendEvent) -> Result<StoredEvent>;

    /// Facts for one report in sequence order.
    async fn events_for_report(&self, report_id: ReportId) -> Result<Vec<StoredEvent>>;
}

// ---------------------------------------------------------------------------
// EventStore adapter (Postgres)
// ---------------------------------------------------------------------------

#[async_trait]
impl EventPersister for EventStore {
    async fn persist(&self, event: AppendEvent) -> Result<StoredEvent> {
        self.append_and_read(event).await
    }

    async fn events_for_report(&self, report_id: ReportId) -> Result<Vec<StoredEvent>> {
        self.read_for_report(report_id).await
    }
}

// ---------------------------------------------------------------------------
// MemoryEventStore (no database required)
// ---------------------------------------------------------------------------

/// In-memory audit log. Assigns incrementing sequence numbers. Thread-safe.
pub struct MemoryEventStore {
    next_seq: AtomicI64,
    events: Mutex<Vec<StoredEvent>>,
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            next_seq: AtomicI64::new(1),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Read all persisted events (for test assertions).
    pub fn events(&self) -> Vec<StoredEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// All events of one type, in sequence order.
    pub fn events_of_type(&self, event_type: &str) -> Vec<StoredEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

#[async_trait]
impl EventPersister for MemoryEventStore {
    async fn persist(&self, event: AppendEvent) -> Result<StoredEvent> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let stored = StoredEvent {
            seq,
            ts: Utc::now(),
            event_type: event.event_type,
            report_id: event.report_id,
            actor: event.actor,
            payload: event.payload,
            schema_v: event.schema_v,
        };
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stored.clone());
        Ok(stored)
    }

    async fn events_for_report(&self, report_id: ReportId) -> Result<Vec<StoredEvent>> {
        Ok(self
            .events()
            .into_iter()
            .filter(|e| e.report_id == report_id)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Arc<P> blanket
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: EventPersister + ?Sized> EventPersister for Arc<P> {
    async fn persist(&self, event: AppendEvent) -> Result<StoredEvent> {
        (**self).persist(event).await
    }

    async fn events_for_report(&self, report_id: ReportId) -> Result<Vec<StoredEvent>> {
        (**self).events_for_report(report_id).await
    }
}
