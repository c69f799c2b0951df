// Trait abstraction for everything the engine reads from or writes to storage.
//
// PgSignalStore backs production; MemorySignalStore backs tests and keeps
// `cargo test` free of any database.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use typed_builder::TypedBuilder;

use bikesignal_common::{
    BikeGroup, BikeGroupId, DedupeGroup, DedupeGroupId, GeoBounds, GeoPoint, NewReport, Report,
    ReportId, ReportStatus, SignalResult,
};

// ---------------------------------------------------------------------------
// Query / result types
// ---------------------------------------------------------------------------

/// Selects the candidate pool for matching or duplicate ranking.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CandidateQuery {
    /// Inclusive lower bound on `created_at`.
    pub created_since: DateTime<Utc>,
    pub statuses: Vec<ReportStatus>,
    /// Coarse spatial prefilter. The caller still applies the exact radius.
    #[builder(default, setter(strip_option))]
    pub bounds: Option<GeoBounds>,
}

impl CandidateQuery {
    pub fn matches(&self, report: &Report) -> bool {
        report.created_at >= self.created_since
            && self.statuses.contains(&report.status)
            && self
                .bounds
                .map_or(true, |b| b.contains(report.location.point()))
    }
}

/// Result of an operator merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub group: DedupeGroup,
    /// True when this merge created the dedupe group.
    pub created: bool,
    /// Duplicates that were not members before this call.
    pub newly_merged: BTreeSet<ReportId>,
}

/// A lifecycle transition that was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub from: ReportStatus,
    pub report: Report,
}

// ---------------------------------------------------------------------------
// SignalStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SignalStore: Send + Sync {
    // --- Reports ---

    async fn report(&self, id: ReportId) -> SignalResult<Option<Report>>;

    /// Reports selected by `query`, ordered by `(created_at, id)`.
    async fn candidate_reports(&self, query: &CandidateQuery) -> SignalResult<Vec<Report>>;

    /// A cluster's full history ordered by `(created_at, id)`.
    async fn reports_in_group(&self, bike_group_id: BikeGroupId) -> SignalResult<Vec<Report>>;

    /// Operator listing, newest first.
    async fn list_reports(&self, status: Option<ReportStatus>) -> SignalResult<Vec<Report>>;

    /// Persist a report with its cluster assignment. Status starts at `new`.
    async fn insert_report(
        &self,
        report: &NewReport,
        bike_group_id: BikeGroupId,
    ) -> SignalResult<Report>;

    /// Move a report to `to` if its current status allows it.
    /// Fails with `ReportNotFound` or `InvalidTransition`.
    async fn transition_status(
        &self,
        id: ReportId,
        to: ReportStatus,
        now: DateTime<Utc>,
    ) -> SignalResult<StatusChange>;

    // --- Bike groups ---

    async fn create_bike_group(
        &self,
        anchor: GeoPoint,
        now: DateTime<Utc>,
    ) -> SignalResult<BikeGroup>;

    async fn bike_group(&self, id: BikeGroupId) -> SignalResult<Option<BikeGroup>>;

    async fn bike_group_ids(&self) -> SignalResult<Vec<BikeGroupId>>;

    /// Overwrite counters, timestamps and strength. Anchor and created_at are
    /// never touched.
    async fn update_bike_group(&self, group: &BikeGroup) -> SignalResult<()>;

    // --- Dedupe groups ---

    /// Union `duplicates` into the canonical report's dedupe group, creating
    /// it if needed, and point every member at the group. All-or-nothing:
    /// an unknown id fails with `CanonicalNotFound` / `DuplicateNotFound`
    /// and leaves storage untouched.
    async fn merge_reports(
        &self,
        canonical_id: ReportId,
        duplicates: &BTreeSet<ReportId>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<MergeOutcome>;

    async fn dedupe_group(&self, id: DedupeGroupId) -> SignalResult<Option<DedupeGroup>>;

    async fn dedupe_group_for(&self, canonical_id: ReportId) -> SignalResult<Option<DedupeGroup>>;
}
