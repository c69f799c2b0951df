//! In-memory SignalStore. Used by tests and local tooling.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use bikesignal_common::{
    generate_public_id, BikeGroup, BikeGroupId, DedupeGroup, DedupeGroupId, GeoPoint, NewReport,
    Report, ReportId, ReportStatus, SignalError, SignalResult,
};

use crate::traits::{CandidateQuery, MergeOutcome, SignalStore, StatusChange};

#[derive(Default)]
struct Inner {
    reports: BTreeMap<ReportId, Report>,
    bike_groups: BTreeMap<BikeGroupId, BikeGroup>,
    dedupe_groups: BTreeMap<DedupeGroupId, DedupeGroup>,
    next_report_id: ReportId,
    next_bike_group_id: BikeGroupId,
    next_dedupe_group_id: DedupeGroupId,
}

/// Every operation runs under one mutex, so each call is atomic.
#[derive(Default)]
pub struct MemorySignalStore {
    inner: Mutex<Inner>,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn chronological(reports: &mut [Report]) {
    reports.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn report(&self, id: ReportId) -> SignalResult<Option<Report>> {
        Ok(self.lock().reports.get(&id).cloned())
    }

    async fn candidate_reports(&self, query: &CandidateQuery) -> SignalResult<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .lock()
            .reports
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        chronological(&mut reports);
        Ok(reports)
    }

    async fn reports_in_group(&self, bike_group_id: BikeGroupId) -> SignalResult<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .lock()
            .reports
            .values()
            .filter(|r| r.bike_group_id == bike_group_id)
            .cloned()
            .collect();
        chronological(&mut reports);
        Ok(reports)
    }

    async fn list_reports(&self, status: Option<ReportStatus>) -> SignalResult<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .lock()
            .reports
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        chronological(&mut reports);
        reports.reverse();
        Ok(reports)
    }

    async fn insert_report(
        &self,
        report: &NewReport,
        bike_group_id: BikeGroupId,
    ) -> SignalResult<Report> {
        let mut inner = self.lock();
        inner.next_report_id += 1;
        let stored = Report {
            id: inner.next_report_id,
            public_id: generate_public_id(),
            created_at: report.created_at,
            updated_at: report.created_at,
            status: ReportStatus::New,
            location: report.location,
            tags: report.tags.clone(),
            note: report.note.clone(),
            source: report.source,
            reporter: report.reporter.clone(),
            bike_group_id,
            dedupe_group_id: None,
        };
        inner.reports.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn transition_status(
        &self,
        id: ReportId,
        to: ReportStatus,
        now: DateTime<Utc>,
    ) -> SignalResult<StatusChange> {
        let mut inner = self.lock();
        let report = inner
            .reports
            .get_mut(&id)
            .ok_or(SignalError::ReportNotFound(id))?;

        let from = report.status;
        if !from.can_transition_to(to) {
            return Err(SignalError::InvalidTransition { from, to });
        }
        report.status = to;
        report.updated_at = now;

        Ok(StatusChange {
            from,
            report: report.clone(),
        })
    }

    async fn create_bike_group(
        &self,
        anchor: GeoPoint,
        now: DateTime<Utc>,
    ) -> SignalResult<BikeGroup> {
        let mut inner = self.lock();
        inner.next_bike_group_id += 1;
        let group = BikeGroup::anchored_at(inner.next_bike_group_id, anchor, now);
        inner.bike_groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn bike_group(&self, id: BikeGroupId) -> SignalResult<Option<BikeGroup>> {
        Ok(self.lock().bike_groups.get(&id).cloned())
    }

    async fn bike_group_ids(&self) -> SignalResult<Vec<BikeGroupId>> {
        Ok(self.lock().bike_groups.keys().copied().collect())
    }

    async fn update_bike_group(&self, group: &BikeGroup) -> SignalResult<()> {
        let mut inner = self.lock();
        let stored = inner
            .bike_groups
            .get_mut(&group.id)
            .ok_or(SignalError::MissingBikeGroup {
                bike_group_id: group.id,
                report_id: None,
            })?;

        *stored = BikeGroup {
            id: stored.id,
            created_at: stored.created_at,
            anchor: stored.anchor,
            ..group.clone()
        };
        Ok(())
    }

    async fn merge_reports(
        &self,
        canonical_id: ReportId,
        duplicates: &BTreeSet<ReportId>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<MergeOutcome> {
        let mut inner = self.lock();

        // Validate everything before the first write.
        if !inner.reports.contains_key(&canonical_id) {
            return Err(SignalError::CanonicalNotFound(canonical_id));
        }
        if let Some(missing) = duplicates.iter().find(|id| !inner.reports.contains_key(*id)) {
            return Err(SignalError::DuplicateNotFound(*missing));
        }

        let existing = inner
            .dedupe_groups
            .values()
            .find(|g| g.canonical_report_id == canonical_id)
            .cloned();
        let created = existing.is_none();
        let mut group = match existing {
            Some(group) => group,
            None => {
                inner.next_dedupe_group_id += 1;
                DedupeGroup {
                    id: inner.next_dedupe_group_id,
                    canonical_report_id: canonical_id,
                    merged_report_ids: BTreeSet::new(),
                    created_at: now,
                    created_by: created_by.to_string(),
                }
            }
        };

        let newly_merged: BTreeSet<ReportId> = duplicates
            .difference(&group.merged_report_ids)
            .copied()
            .collect();
        group.merged_report_ids.extend(newly_merged.iter().copied());
        inner.dedupe_groups.insert(group.id, group.clone());

        for id in group.members() {
            if let Some(report) = inner.reports.get_mut(&id) {
                report.dedupe_group_id = Some(group.id);
                report.updated_at = now;
            }
        }

        Ok(MergeOutcome {
            group,
            created,
            newly_merged,
        })
    }

    async fn dedupe_group(&self, id: DedupeGroupId) -> SignalResult<Option<DedupeGroup>> {
        Ok(self.lock().dedupe_groups.get(&id).cloned())
    }

    async fn dedupe_group_for(&self, canonical_id: ReportId) -> SignalResult<Option<DedupeGroup>> {
        Ok(self
            .lock()
            .dedupe_groups
            .values()
            .find(|g| g.canonical_report_id == canonical_id)
            .cloned())
    }
}
