//! Cluster assignment for incoming reports.
//!
//! Pure functions over a candidate pool. The caller loads the pool with
//! [`BikeGroupMatcher::candidate_query`] and persists whatever is decided.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use bikesignal_common::geo::{
    composite_score, distance_meters, distance_score, has_shared_tags, recency, tag_overlap,
};
use bikesignal_common::{BikeGroupId, EngineConfig, GeoBounds, GeoPoint, Report, ReportStatus};
use bikesignal_store::CandidateQuery;

/// Statuses eligible to anchor a match. Only `invalid` is excluded.
const MATCHABLE_STATUSES: [ReportStatus; 4] = [
    ReportStatus::New,
    ReportStatus::Triaged,
    ReportStatus::Forwarded,
    ReportStatus::Resolved,
];

/// The cluster an incoming report should join.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroupMatch {
    pub bike_group_id: BikeGroupId,
    /// Best composite score among the cluster's candidates.
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct BikeGroupMatcher {
    radius_m: f64,
    lookback_days: i64,
}

impl BikeGroupMatcher {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            radius_m: config.signal_match_radius_m,
            lookback_days: config.signal_lookback_days,
        }
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.lookback_days)
    }

    /// Candidate pool for a report filed at `location` at `now`.
    pub fn candidate_query(&self, location: GeoPoint, now: DateTime<Utc>) -> CandidateQuery {
        CandidateQuery::builder()
            .created_since(self.window_start(now))
            .statuses(MATCHABLE_STATUSES.to_vec())
            .bounds(GeoBounds::around(location, self.radius_m))
            .build()
    }

    /// Score one candidate, or `None` if it fails a hard gate.
    ///
    /// 1. Status `invalid` or created before the lookback window → excluded
    /// 2. No tag in common → excluded
    /// 3. Farther than the match radius → excluded
    /// 4. Otherwise the composite of distance, tag overlap and recency
    pub fn score_candidate(
        &self,
        location: GeoPoint,
        tags: &[String],
        now: DateTime<Utc>,
        candidate: &Report,
    ) -> Option<f64> {
        if candidate.status == ReportStatus::Invalid || candidate.created_at < self.window_start(now)
        {
            return None;
        }
        if !has_shared_tags(tags, &candidate.tags) {
            return None;
        }
        let distance = distance_meters(location, candidate.location.point());
        if distance > self.radius_m {
            return None;
        }

        Some(composite_score(
            distance_score(distance, self.radius_m),
            tag_overlap(tags, &candidate.tags),
            recency(candidate.created_at, now, self.lookback_days),
        ))
    }

    /// Pick the cluster whose best-scoring member scores highest overall.
    /// Ties go to the lowest cluster id. `None` means a new cluster is needed.
    pub fn best_match(
        &self,
        location: GeoPoint,
        tags: &[String],
        now: DateTime<Utc>,
        candidates: &[Report],
    ) -> Option<GroupMatch> {
        let mut best_per_group: BTreeMap<BikeGroupId, f64> = BTreeMap::new();

        for candidate in candidates {
            let Some(score) = self.score_candidate(location, tags, now, candidate) else {
                continue;
            };
            debug!(
                candidate_id = candidate.id,
                bike_group_id = candidate.bike_group_id,
                score,
                "Cluster candidate passed gates"
            );
            best_per_group
                .entry(candidate.bike_group_id)
                .and_modify(|best| *best = best.max(score))
                .or_insert(score);
        }

        // BTreeMap iterates in ascending id order; strict `>` keeps the
        // lowest id on equal scores.
        let mut winner: Option<GroupMatch> = None;
        for (bike_group_id, score) in best_per_group {
            if winner.map_or(true, |w| score > w.score) {
                winner = Some(GroupMatch {
                    bike_group_id,
                    score,
                });
            }
        }
        winner
    }
}
