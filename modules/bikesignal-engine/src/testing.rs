// Test fixtures for the signal engine.
//
// - `Harness`: a SignalService over MemorySignalStore + MemoryEventStore,
//   with both stores kept reachable for assertions
// - report builders anchored at a fixed test epoch
// - a failing EventPersister to exercise swallowed audit failures

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use bikesignal_common::{EngineConfig, NewReport, ReportId, ReportLocation, ReporterId};
use bikesignal_events::{AppendEvent, EventPersister, MemoryEventStore, StoredEvent};
use bikesignal_store::MemorySignalStore;

use crate::service::SignalService;

// ---------------------------------------------------------------------------
// Test constants
// ---------------------------------------------------------------------------

/// Amsterdam Centraal bike racks.
pub const CENTRAAL: (f64, f64) = (52.3791, 4.9003);
/// Dam square, about 1 km south of Centraal.
pub const DAM: (f64, f64) = (52.3731, 4.8926);

/// 2024-01-01 09:00:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

pub fn days(n: i64) -> Duration {
    Duration::days(n)
}

pub fn hours(n: i64) -> Duration {
    Duration::hours(n)
}

/// `(lat, lng)` moved `meters` due north.
pub fn north_of(origin: (f64, f64), meters: f64) -> (f64, f64) {
    (origin.0 + meters / 111_195.0, origin.1)
}

// ---------------------------------------------------------------------------
// Report builders
// ---------------------------------------------------------------------------

pub fn user(id: i64) -> ReporterId {
    ReporterId::user(id)
}

pub fn anon(device_token: &str) -> ReporterId {
    ReporterId::anonymous(device_token, "test-secret")
}

/// A new report at `at` with `tags` filed by `reporter` at `created_at`.
pub fn new_report(
    at: (f64, f64),
    tags: &[&str],
    reporter: ReporterId,
    created_at: DateTime<Utc>,
) -> NewReport {
    NewReport::builder()
        .location(ReportLocation::new(at.0, at.1, 5.0))
        .tags(tags.iter().map(|t| t.to_string()).collect())
        .reporter(reporter)
        .created_at(created_at)
        .build()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub service: SignalService,
    pub store: Arc<MemorySignalStore>,
    pub events: Arc<MemoryEventStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemorySignalStore::new());
        let events = Arc::new(MemoryEventStore::new());
        let service = SignalService::new(store.clone(), events.clone(), config);
        Self {
            service,
            store,
            events,
        }
    }

    /// Event types recorded for `report_id`, in append order.
    pub fn event_types_for(&self, report_id: ReportId) -> Vec<String> {
        self.events
            .events()
            .into_iter()
            .filter(|e| e.report_id == report_id)
            .map(|e| e.event_type)
            .collect()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// FailingEventPersister
// ---------------------------------------------------------------------------

/// Rejects every append. Reads return nothing.
pub struct FailingEventPersister;

#[async_trait]
impl EventPersister for FailingEventPersister {
    async fn persist(&self, event: AppendEvent) -> Result<StoredEvent> {
        bail!("audit log unavailable for {}", event.event_type)
    }

    async fn events_for_report(&self, _report_id: ReportId) -> Result<Vec<StoredEvent>> {
        Ok(Vec::new())
    }
}
