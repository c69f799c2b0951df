//! Operator-confirmed duplicate merges.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use bikesignal_common::{ReportEvent, ReportId, SignalError, SignalResult};
use bikesignal_events::{AppendEvent, EventPersister};
use bikesignal_store::{MergeOutcome, SignalStore};

pub struct MergeCoordinator {
    store: Arc<dyn SignalStore>,
    events: Arc<dyn EventPersister>,
}

impl MergeCoordinator {
    pub fn new(store: Arc<dyn SignalStore>, events: Arc<dyn EventPersister>) -> Self {
        Self { store, events }
    }

    /// Union `duplicates` into the dedupe group of `canonical_id`.
    ///
    /// Storage applies the union atomically; unknown ids abort the whole
    /// merge. Only duplicates that were not already members get a `merged`
    /// audit event, attributed to `operator`.
    pub async fn merge(
        &self,
        canonical_id: ReportId,
        duplicates: &BTreeSet<ReportId>,
        operator: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<MergeOutcome> {
        if duplicates.is_empty() {
            return Err(SignalError::InvalidMerge(
                "at least one duplicate report is required".to_string(),
            ));
        }
        if duplicates.contains(&canonical_id) {
            return Err(SignalError::InvalidMerge(format!(
                "report {canonical_id} cannot be merged into itself"
            )));
        }

        let outcome = self
            .store
            .merge_reports(canonical_id, duplicates, operator, now)
            .await?;

        for report_id in &outcome.newly_merged {
            let event = ReportEvent::Merged {
                report_id: *report_id,
                canonical_report_id: canonical_id,
                dedupe_group_id: outcome.group.id,
            };
            if let Err(e) = self
                .events
                .persist(AppendEvent::from(&event).with_actor(operator))
                .await
            {
                warn!(error = %e, report_id, "Failed to record merged event");
            }
        }

        info!(
            canonical_report_id = canonical_id,
            dedupe_group_id = outcome.group.id,
            newly_merged = outcome.newly_merged.len(),
            members = outcome.group.members().len(),
            created = outcome.created,
            "Duplicate reports merged"
        );
        Ok(outcome)
    }
}
