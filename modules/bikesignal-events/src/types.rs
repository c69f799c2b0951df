//! Core types for the audit log.

use bikesignal_common::{ReportEvent, ReportId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An event as stored. Returned by all read methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub event_type: String,
    pub report_id: ReportId,
    pub actor: Option<String>,
    pub payload: serde_json::Value,
    pub schema_v: i16,
}

impl StoredEvent {
    /// Decode the payload back into the domain event, if it is one.
    pub fn decode(&self) -> Option<ReportEvent> {
        ReportEvent::from_payload(&self.payload).ok()
    }
}

/// An event to be appended. The caller builds this; the store assigns seq/ts.
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub event_type: String,
    pub report_id: ReportId,
    pub payload: serde_json::Value,
    pub actor: Option<String>,
    pub schema_v: i16,
}

impl AppendEvent {
    pub fn new(
        event_type: impl Into<String>,
        report_id: ReportId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            report_id,
            payload,
            actor: None,
            schema_v: 1,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_schema_v(mut self, v: i16) -> Self {
        self.schema_v = v;
        self
    }
}

impl From<&ReportEvent> for AppendEvent {
    /// The `event_type` is taken from the serde tag.
    fn from(event: &ReportEvent) -> Self {
        AppendEvent::new(event.event_type(), event.report_id(), event.to_payload())
    }
}
