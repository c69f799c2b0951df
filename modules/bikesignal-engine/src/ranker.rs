//! Advisory duplicate suggestions for a freshly created report.
//!
//! Never mutates anything. Operators decide whether to merge.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use bikesignal_common::geo::{
    composite_score, distance_meters, distance_score, recency, tag_overlap,
};
use bikesignal_common::{EngineConfig, GeoBounds, Report, ReportId, ReportStatus};
use bikesignal_store::CandidateQuery;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupeCandidate {
    pub report_id: ReportId,
    pub score: f64,
    pub distance_meters: f64,
}

#[derive(Debug, Clone)]
pub struct DuplicateCandidateRanker {
    radius_m: f64,
    lookback_days: i64,
    max_candidates: usize,
}

impl DuplicateCandidateRanker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            radius_m: config.dedupe_radius_m,
            lookback_days: config.dedupe_lookback_days,
            max_candidates: config.max_dedupe_candidates,
        }
    }

    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.lookback_days)
    }

    /// Open reports near `source` filed within the lookback window.
    pub fn candidate_query(&self, source: &Report, now: DateTime<Utc>) -> CandidateQuery {
        CandidateQuery::builder()
            .created_since(self.window_start(now))
            .statuses(ReportStatus::OPEN.to_vec())
            .bounds(GeoBounds::around(source.location.point(), self.radius_m))
            .build()
    }

    /// Score `candidate` as a duplicate of `source`. No tag gate: distance
    /// alone can qualify a candidate.
    pub fn score(
        &self,
        source: &Report,
        candidate: &Report,
        now: DateTime<Utc>,
    ) -> Option<DedupeCandidate> {
        if candidate.id == source.id
            || !candidate.status.is_open()
            || candidate.created_at < self.window_start(now)
        {
            return None;
        }
        let distance = distance_meters(source.location.point(), candidate.location.point());
        if distance > self.radius_m {
            return None;
        }

        Some(DedupeCandidate {
            report_id: candidate.id,
            score: composite_score(
                distance_score(distance, self.radius_m),
                tag_overlap(&source.tags, &candidate.tags),
                recency(candidate.created_at, now, self.lookback_days),
            ),
            distance_meters: distance,
        })
    }

    /// At most `max_candidates` suggestions, best first. Equal scores keep
    /// the newer report (higher id) first.
    pub fn rank(
        &self,
        source: &Report,
        candidates: &[Report],
        now: DateTime<Utc>,
    ) -> Vec<DedupeCandidate> {
        let mut scored: Vec<DedupeCandidate> = candidates
            .iter()
            .filter_map(|c| self.score(source, c, now))
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(b.report_id.cmp(&a.report_id))
        });
        scored.truncate(self.max_candidates);
        scored
    }
}
