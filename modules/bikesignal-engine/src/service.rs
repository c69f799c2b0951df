//! Request-facing orchestrator over the engine components.
//!
//! Wires the pure engine components to storage and the audit log:
//!
//! create_report → lock cell neighbourhood → match or create cluster →
//! insert report → unlock → recompute cluster under its lock → audit →
//! rank duplicate suggestions

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use bikesignal_common::{
    BikeGroup, BikeGroupId, DedupeGroup, EngineConfig, NewReport, Report, ReportEvent, ReportId,
    ReportStatus, SignalError, SignalResult, SignalStrength, SYSTEM_ACTOR,
};
use bikesignal_events::{AppendEvent, EventPersister, StoredEvent};
use bikesignal_store::{MergeOutcome, SignalStore};

use crate::locks::{cell_neighbourhood, KeyedLocks};
use crate::matcher::BikeGroupMatcher;
use crate::merge::MergeCoordinator;
use crate::ranker::{DedupeCandidate, DuplicateCandidateRanker};
use crate::reconfirmation::{Classification, Recomputation, ReconfirmationEngine};
use crate::timeline::{build_signal_details, SignalDetails};
use crate::triage::{OperatorReportView, SignalFilter};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of filing one report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportOutcome {
    pub report: Report,
    /// The cluster after recomputation.
    pub bike_group: BikeGroup,
    /// Whether the report opened a new cluster.
    pub created_bike_group: bool,
    pub classification: Classification,
    pub previous_signal_strength: SignalStrength,
    /// Advisory merge suggestions, best first.
    pub dedupe_candidates: Vec<DedupeCandidate>,
}

impl ReportOutcome {
    pub fn signal_strength(&self) -> SignalStrength {
        self.bike_group.signal_strength
    }

    pub fn strength_changed(&self) -> bool {
        self.previous_signal_strength != self.bike_group.signal_strength
    }

    pub fn dedupe_report_ids(&self) -> Vec<ReportId> {
        self.dedupe_candidates.iter().map(|c| c.report_id).collect()
    }
}

/// Result of replaying one cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecompute {
    pub bike_group: BikeGroup,
    pub previous_signal_strength: SignalStrength,
    pub replay: Recomputation,
}

impl GroupRecompute {
    pub fn strength_changed(&self) -> bool {
        self.previous_signal_strength != self.bike_group.signal_strength
    }
}

/// Operator detail page for one report.
#[derive(Debug, Clone)]
pub struct ReportDetails {
    pub report: Report,
    pub events: Vec<StoredEvent>,
    pub signal: SignalDetails,
    pub dedupe_group: Option<DedupeGroup>,
}

// ---------------------------------------------------------------------------
// SignalService
// ---------------------------------------------------------------------------

pub struct SignalService {
    store: Arc<dyn SignalStore>,
    events: Arc<dyn EventPersister>,
    config: EngineConfig,
    matcher: BikeGroupMatcher,
    engine: ReconfirmationEngine,
    ranker: DuplicateCandidateRanker,
    merger: MergeCoordinator,
    cell_locks: KeyedLocks<String>,
    group_locks: KeyedLocks<BikeGroupId>,
}

impl SignalService {
    pub fn new(
        store: Arc<dyn SignalStore>,
        events: Arc<dyn EventPersister>,
        config: EngineConfig,
    ) -> Self {
        Self {
            matcher: BikeGroupMatcher::new(&config),
            engine: ReconfirmationEngine::new(&config),
            ranker: DuplicateCandidateRanker::new(&config),
            merger: MergeCoordinator::new(store.clone(), events.clone()),
            cell_locks: KeyedLocks::new(),
            group_locks: KeyedLocks::new(),
            store,
            events,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SignalStore> {
        &self.store
    }

    /// File a report: assign it to a cluster, recompute that cluster and
    /// suggest duplicates. `created_at` of the report is used as "now".
    pub async fn create_report(&self, new_report: NewReport) -> SignalResult<ReportOutcome> {
        let now = new_report.created_at;
        let point = new_report.location.point();

        let cell_lock = if self.config.serialize_by_cell {
            let cells = cell_neighbourhood(point, self.config.cell_precision)?;
            Some(self.cell_locks.acquire(cells).await)
        } else {
            None
        };

        let pool = self
            .store
            .candidate_reports(&self.matcher.candidate_query(point, now))
            .await?;

        let (group, created_bike_group) =
            match self.matcher.best_match(point, &new_report.tags, now, &pool) {
                Some(found) => {
                    let group = self.store.bike_group(found.bike_group_id).await?.ok_or_else(
                        || {
                            error!(
                                bike_group_id = found.bike_group_id,
                                "Matched bike group is missing"
                            );
                            SignalError::MissingBikeGroup {
                                bike_group_id: found.bike_group_id,
                                report_id: None,
                            }
                        },
                    )?;
                    (group, false)
                }
                None => {
                    let group = self.store.create_bike_group(point, now).await?;
                    info!(
                        bike_group_id = group.id,
                        lat = point.lat,
                        lng = point.lng,
                        "Bike group created"
                    );
                    (group, true)
                }
            };

        let report = self.store.insert_report(&new_report, group.id).await?;
        drop(cell_lock);

        self.record(
            ReportEvent::Created {
                report_id: report.id,
                bike_group_id: group.id,
                source: report.source,
            },
            report.reporter.actor_label(),
        )
        .await;

        let recomputed = self.recompute_locked(group.id, Some(report.id), now).await?;
        let classification = recomputed
            .replay
            .classification_of(report.id)
            .ok_or_else(|| {
                anyhow!(
                    "report {} missing from history of bike group {}",
                    report.id,
                    group.id
                )
            })?;
        self.record_classification(&report, group.id, classification)
            .await;
        self.record_strength_change(&recomputed, report.id).await;

        let dedupe_pool = self
            .store
            .candidate_reports(&self.ranker.candidate_query(&report, now))
            .await?;
        let dedupe_candidates = self.ranker.rank(&report, &dedupe_pool, now);

        info!(
            report_id = report.id,
            bike_group_id = group.id,
            classification = classification.as_str(),
            signal_strength = %recomputed.bike_group.signal_strength,
            dedupe_candidates = dedupe_candidates.len(),
            "Report filed"
        );

        Ok(ReportOutcome {
            report,
            bike_group: recomputed.bike_group,
            created_bike_group,
            classification,
            previous_signal_strength: recomputed.previous_signal_strength,
            dedupe_candidates,
        })
    }

    /// Replay a cluster's stored history and overwrite its counters.
    /// Idempotent; used to heal clusters left stale by an interrupted request.
    pub async fn recompute_group(
        &self,
        bike_group_id: BikeGroupId,
        now: DateTime<Utc>,
    ) -> SignalResult<GroupRecompute> {
        let recomputed = self.recompute_locked(bike_group_id, None, now).await?;
        // Attributed to the chronologically last report of the cluster.
        if let Some((report_id, _)) = recomputed.replay.classifications.last() {
            self.record_strength_change(&recomputed, *report_id).await;
        }
        Ok(recomputed)
    }

    async fn recompute_locked(
        &self,
        bike_group_id: BikeGroupId,
        trigger: Option<ReportId>,
        now: DateTime<Utc>,
    ) -> SignalResult<GroupRecompute> {
        let _lock = self.group_locks.acquire([bike_group_id]).await;

        let group = self.store.bike_group(bike_group_id).await?.ok_or_else(|| {
            error!(bike_group_id, report_id = ?trigger, "Bike group missing during recompute");
            SignalError::MissingBikeGroup {
                bike_group_id,
                report_id: trigger,
            }
        })?;

        let history = self.store.reports_in_group(bike_group_id).await?;
        let replay = self.engine.replay(&history);
        let updated = replay.apply_to(&group, now);
        self.store.update_bike_group(&updated).await?;

        if updated.signal_strength != group.signal_strength {
            info!(
                bike_group_id,
                previous_signal_strength = %group.signal_strength,
                signal_strength = %updated.signal_strength,
                "Signal strength changed"
            );
        }

        Ok(GroupRecompute {
            bike_group: updated,
            previous_signal_strength: group.signal_strength,
            replay,
        })
    }

    /// Move a report through its lifecycle and record who did it.
    pub async fn update_status(
        &self,
        report_id: ReportId,
        to: ReportStatus,
        actor: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<Report> {
        let change = self.store.transition_status(report_id, to, now).await?;
        self.record(
            ReportEvent::StatusChanged {
                report_id,
                from: change.from,
                to,
            },
            actor,
        )
        .await;
        info!(report_id, from = %change.from, to = %to, actor, "Report status changed");
        Ok(change.report)
    }

    /// Operator-confirmed merge; see [`MergeCoordinator::merge`].
    pub async fn merge_duplicates(
        &self,
        canonical_id: ReportId,
        duplicates: &BTreeSet<ReportId>,
        operator: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<MergeOutcome> {
        self.merger
            .merge(canonical_id, duplicates, operator, now)
            .await
    }

    pub async fn report_details(&self, report_id: ReportId) -> SignalResult<ReportDetails> {
        let report = self
            .store
            .report(report_id)
            .await?
            .ok_or(SignalError::ReportNotFound(report_id))?;
        let group = self.load_group_for(&report).await?;
        let history = self.store.reports_in_group(group.id).await?;
        let events = self.events.events_for_report(report_id).await?;
        let dedupe_group = match report.dedupe_group_id {
            Some(id) => self.store.dedupe_group(id).await?,
            None => None,
        };

        Ok(ReportDetails {
            signal: build_signal_details(&self.engine, &group, &history),
            report,
            events,
            dedupe_group,
        })
    }

    /// Operator listing enriched with cluster signal, filtered and sorted.
    pub async fn operator_reports(
        &self,
        filter: &SignalFilter,
    ) -> SignalResult<Vec<OperatorReportView>> {
        let reports = self.store.list_reports(filter.status).await?;

        let mut groups: HashMap<BikeGroupId, BikeGroup> = HashMap::new();
        let mut views = Vec::with_capacity(reports.len());
        for report in reports {
            if let Some(group) = groups.get(&report.bike_group_id) {
                views.push(OperatorReportView::new(report, group));
                continue;
            }
            let group = self.load_group_for(&report).await?;
            views.push(OperatorReportView::new(report, &group));
            groups.insert(group.id, group);
        }
        Ok(filter.apply(views))
    }

    async fn load_group_for(&self, report: &Report) -> SignalResult<BikeGroup> {
        self.store
            .bike_group(report.bike_group_id)
            .await?
            .ok_or_else(|| {
                error!(
                    report_id = report.id,
                    bike_group_id = report.bike_group_id,
                    "Report points at a missing bike group"
                );
                SignalError::MissingBikeGroup {
                    bike_group_id: report.bike_group_id,
                    report_id: Some(report.id),
                }
            })
    }

    // --- Audit ---

    async fn record_classification(
        &self,
        report: &Report,
        bike_group_id: BikeGroupId,
        classification: Classification,
    ) {
        let event = if let Some(reporter_match_kind) = classification.reporter_match_kind() {
            ReportEvent::ReconfirmationCounted {
                report_id: report.id,
                bike_group_id,
                reporter_match_kind,
            }
        } else if classification == Classification::IgnoredSameDay {
            ReportEvent::ReconfirmationIgnoredSameDay {
                report_id: report.id,
                bike_group_id,
            }
        } else {
            return;
        };
        self.record(event, SYSTEM_ACTOR).await;
    }

    async fn record_strength_change(&self, recomputed: &GroupRecompute, report_id: ReportId) {
        if !recomputed.strength_changed() {
            return;
        }
        self.record(
            ReportEvent::SignalStrengthChanged {
                report_id,
                bike_group_id: recomputed.bike_group.id,
                previous_signal_strength: recomputed.previous_signal_strength,
                signal_strength: recomputed.bike_group.signal_strength,
            },
            SYSTEM_ACTOR,
        )
        .await;
    }

    /// Audit appends never fail the request.
    async fn record(&self, event: ReportEvent, actor: &str) {
        if let Err(e) = self
            .events
            .persist(AppendEvent::from(&event).with_actor(actor))
            .await
        {
            warn!(
                error = %e,
                event_type = event.event_type(),
                report_id = event.report_id(),
                "Failed to record audit event"
            );
        }
    }
}
