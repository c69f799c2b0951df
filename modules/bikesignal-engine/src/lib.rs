//! The signal aggregation engine: cluster matching, reconfirmation replay,
//! duplicate suggestions and operator merges, orchestrated by
//! [`SignalService`].

pub mod locks;
pub mod matcher;
pub mod merge;
pub mod ranker;
pub mod reconfirmation;
pub mod service;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod timeline;
pub mod triage;

pub use matcher::{BikeGroupMatcher, GroupMatch};
pub use merge::MergeCoordinator;
pub use ranker::{DedupeCandidate, DuplicateCandidateRanker};
pub use reconfirmation::{Classification, Recomputation, ReconfirmationEngine};
pub use service::{GroupRecompute, ReportDetails, ReportOutcome, SignalService};
pub use timeline::{build_signal_details, reporter_label, SignalDetails, TimelineEntry};
pub use triage::{OperatorReportView, ReportSort, SignalFilter};
