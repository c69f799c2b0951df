//! Append-only audit log of per-report facts.
//!
//! Stores opaque JSONB payloads keyed by report id. The engine writes
//! [`bikesignal_common::ReportEvent`] values; operators read them back on the
//! report detail page.

pub mod persist;
pub mod store;
pub mod types;

pub use persist::{EventPersister, MemoryEventStore};
pub use store::EventStore;
pub use types::{AppendEvent, StoredEvent};
