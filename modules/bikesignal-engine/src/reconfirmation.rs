//! Chronological replay of a cluster's history.
//!
//! [`ReconfirmationEngine::replay`] is a pure function of the report list:
//! the same history always yields the same classifications and counters.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bikesignal_common::geo::age_days;
use bikesignal_common::{
    BikeGroup, EngineConfig, Report, ReportId, ReporterId, ReporterMatchKind, SignalStrength,
};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How one report contributes to its cluster's evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// First report of the cluster.
    Initial,
    /// Same reporter already reported this cluster on the same UTC day.
    IgnoredSameDay,
    /// Too soon after the preceding report to count as a reconfirmation.
    NonQualifying,
    CountedSameReporter,
    CountedDistinctReporter,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Initial => "initial",
            Classification::IgnoredSameDay => "ignored_same_day",
            Classification::NonQualifying => "non_qualifying",
            Classification::CountedSameReporter => "counted_same_reporter",
            Classification::CountedDistinctReporter => "counted_distinct_reporter",
        }
    }

    pub fn is_qualifying(&self) -> bool {
        self.reporter_match_kind().is_some()
    }

    pub fn reporter_match_kind(&self) -> Option<ReporterMatchKind> {
        match self {
            Classification::CountedSameReporter => Some(ReporterMatchKind::SameReporter),
            Classification::CountedDistinctReporter => Some(ReporterMatchKind::DistinctReporter),
            _ => None,
        }
    }
}

/// Everything derived from one replay.
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputation {
    /// Report ids in replay order with their classification.
    pub classifications: Vec<(ReportId, Classification)>,
    pub total_reports: u32,
    pub unique_reporters: u32,
    pub same_reporter_reconfirmations: u32,
    pub distinct_reporter_reconfirmations: u32,
    pub first_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    pub last_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    /// `None` only for an empty history.
    pub last_report_at: Option<DateTime<Utc>>,
    pub signal_strength: SignalStrength,
}

impl Recomputation {
    pub fn classification_of(&self, report_id: ReportId) -> Option<Classification> {
        self.classifications
            .iter()
            .find(|(id, _)| *id == report_id)
            .map(|(_, c)| *c)
    }

    pub fn has_qualifying_reconfirmation(&self) -> bool {
        self.same_reporter_reconfirmations + self.distinct_reporter_reconfirmations > 0
    }

    /// The stored group with its counters replaced by this replay.
    /// Identity, anchor and creation time are carried over untouched.
    pub fn apply_to(&self, group: &BikeGroup, now: DateTime<Utc>) -> BikeGroup {
        BikeGroup {
            updated_at: now,
            last_report_at: self.last_report_at.unwrap_or(group.last_report_at),
            total_reports: self.total_reports,
            unique_reporters: self.unique_reporters,
            same_reporter_reconfirmations: self.same_reporter_reconfirmations,
            distinct_reporter_reconfirmations: self.distinct_reporter_reconfirmations,
            first_qualifying_reconfirmation_at: self.first_qualifying_reconfirmation_at,
            last_qualifying_reconfirmation_at: self.last_qualifying_reconfirmation_at,
            signal_strength: self.signal_strength,
            ..group.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconfirmationEngine {
    gap_days: i64,
    strong_min_unique_reporters: u32,
}

impl ReconfirmationEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            gap_days: config.reconfirmation_gap_days,
            strong_min_unique_reporters: config.strong_min_unique_reporters,
        }
    }

    /// Classify every report of a cluster and rebuild its counters.
    ///
    /// Reports are replayed by ascending `(created_at, id)` regardless of the
    /// input order. For report *i* with earlier reports `prior`:
    ///
    /// 1. i == 0 → `Initial`
    /// 2. Same reporter appears in `prior` on the same UTC day → `IgnoredSameDay`
    /// 3. Less than the gap since the immediately preceding report → `NonQualifying`
    /// 4. Reporter appears anywhere in `prior` → `CountedSameReporter`
    /// 5. Otherwise → `CountedDistinctReporter`
    pub fn replay(&self, history: &[Report]) -> Recomputation {
        let mut sorted: Vec<&Report> = history.iter().collect();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut classifications = Vec::with_capacity(sorted.len());
        let mut same_reporter = 0u32;
        let mut distinct_reporter = 0u32;
        let mut first_qualifying: Option<DateTime<Utc>> = None;
        let mut last_qualifying: Option<DateTime<Utc>> = None;

        // Reporter → UTC days they reported on, among reports already replayed.
        let mut seen: BTreeMap<&ReporterId, HashSet<chrono::NaiveDate>> = BTreeMap::new();

        for (i, current) in sorted.iter().copied().enumerate() {
            let day = current.created_at.date_naive();

            let classification = if i == 0 {
                Classification::Initial
            } else {
                let previous = sorted[i - 1];
                let prior_days = seen.get(&current.reporter);

                if prior_days.is_some_and(|days| days.contains(&day)) {
                    Classification::IgnoredSameDay
                } else if age_days(previous.created_at, current.created_at)
                    < self.gap_days as f64
                {
                    Classification::NonQualifying
                } else if prior_days.is_some() {
                    Classification::CountedSameReporter
                } else {
                    Classification::CountedDistinctReporter
                }
            };

            match classification {
                Classification::CountedSameReporter => same_reporter += 1,
                Classification::CountedDistinctReporter => distinct_reporter += 1,
                _ => {}
            }
            if classification.is_qualifying() {
                first_qualifying.get_or_insert(current.created_at);
                last_qualifying = Some(current.created_at);
            }

            classifications.push((current.id, classification));
            seen.entry(&current.reporter).or_default().insert(day);
        }

        let unique_reporters = seen.len() as u32;
        let has_qualifying = same_reporter + distinct_reporter > 0;

        Recomputation {
            classifications,
            total_reports: sorted.len() as u32,
            unique_reporters,
            same_reporter_reconfirmations: same_reporter,
            distinct_reporter_reconfirmations: distinct_reporter,
            first_qualifying_reconfirmation_at: first_qualifying,
            last_qualifying_reconfirmation_at: last_qualifying,
            last_report_at: sorted.last().map(|r| r.created_at),
            signal_strength: self.derive_strength(distinct_reporter, unique_reporters, has_qualifying),
        }
    }

    /// Checked in order: strong, then weak, then none.
    pub fn derive_strength(
        &self,
        distinct_reporter_reconfirmations: u32,
        unique_reporters: u32,
        has_qualifying_reconfirmation: bool,
    ) -> SignalStrength {
        if distinct_reporter_reconfirmations > 0
            && unique_reporters >= self.strong_min_unique_reporters
        {
            SignalStrength::StrongDistinctReporters
        } else if has_qualifying_reconfirmation {
            SignalStrength::WeakSameReporter
        } else {
            SignalStrength::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikesignal_common::{GeoPoint, ReportLocation, ReportSource, ReportStatus};
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    fn report(id: i64, reporter: &str, created_at: DateTime<Utc>) -> Report {
        Report {
            id,
            public_id: format!("R{id:07}"),
            created_at,
            updated_at: created_at,
            status: ReportStatus::New,
            location: ReportLocation::new(52.3676, 4.9041, 5.0),
            tags: vec!["flat_tires".to_string()],
            note: None,
            source: ReportSource::Web,
            reporter: ReporterId::from_key(reporter).unwrap(),
            bike_group_id: 1,
            dedupe_group_id: None,
        }
    }

    fn engine() -> ReconfirmationEngine {
        ReconfirmationEngine::new(&EngineConfig::default())
    }

    fn a() -> Report {
        report(1, "anon:X", at(2024, 1, 1, 9, 0, 0))
    }

    #[test]
    fn single_report_is_initial_with_no_signal() {
        let result = engine().replay(&[a()]);
        assert_eq!(result.classification_of(1), Some(Classification::Initial));
        assert_eq!(result.total_reports, 1);
        assert_eq!(result.unique_reporters, 1);
        assert_eq!(result.signal_strength, SignalStrength::None);
        assert_eq!(result.last_report_at, Some(at(2024, 1, 1, 9, 0, 0)));
    }

    #[test]
    fn same_day_same_reporter_is_ignored() {
        let b = report(2, "anon:X", at(2024, 1, 1, 15, 0, 0));
        let result = engine().replay(&[a(), b]);

        assert_eq!(result.classification_of(2), Some(Classification::IgnoredSameDay));
        assert_eq!(result.same_reporter_reconfirmations, 0);
        assert_eq!(result.distinct_reporter_reconfirmations, 0);
        assert_eq!(result.unique_reporters, 1);
        assert!(!result.has_qualifying_reconfirmation());
    }

    #[test]
    fn distinct_reporter_after_gap_is_strong() {
        let c = report(3, "anon:Y", at(2024, 1, 29, 9, 0, 1));
        let result = engine().replay(&[a(), c]);

        assert_eq!(
            result.classification_of(3),
            Some(Classification::CountedDistinctReporter)
        );
        assert_eq!(result.unique_reporters, 2);
        assert_eq!(result.distinct_reporter_reconfirmations, 1);
        assert_eq!(result.signal_strength, SignalStrength::StrongDistinctReporters);
        assert_eq!(
            result.first_qualifying_reconfirmation_at,
            Some(at(2024, 1, 29, 9, 0, 1))
        );
    }

    #[test]
    fn short_gap_is_non_qualifying() {
        let d = report(4, "anon:Z", at(2024, 1, 15, 0, 0, 0));
        let result = engine().replay(&[a(), d]);

        assert_eq!(result.classification_of(4), Some(Classification::NonQualifying));
        assert_eq!(result.distinct_reporter_reconfirmations, 0);
        assert_eq!(result.signal_strength, SignalStrength::None);
        // Still counted as a reporter even though it did not qualify.
        assert_eq!(result.unique_reporters, 2);
    }

    #[test]
    fn gap_is_measured_from_immediately_preceding_report() {
        // D at +14d resets the gap: E at +30d is only 16d after D.
        let d = report(4, "anon:Z", at(2024, 1, 15, 9, 0, 0));
        let e = report(5, "anon:W", at(2024, 1, 31, 9, 0, 0));
        let result = engine().replay(&[a(), d, e]);

        assert_eq!(result.classification_of(5), Some(Classification::NonQualifying));
    }

    #[test]
    fn exactly_the_gap_qualifies() {
        let c = report(3, "anon:Y", a().created_at + Duration::days(28));
        let result = engine().replay(&[a(), c]);
        assert_eq!(
            result.classification_of(3),
            Some(Classification::CountedDistinctReporter)
        );
    }

    #[test]
    fn same_reporter_after_gap_is_weak() {
        let later = report(2, "anon:X", at(2024, 3, 1, 9, 0, 0));
        let result = engine().replay(&[a(), later]);

        assert_eq!(
            result.classification_of(2),
            Some(Classification::CountedSameReporter)
        );
        assert_eq!(result.same_reporter_reconfirmations, 1);
        assert_eq!(result.signal_strength, SignalStrength::WeakSameReporter);
    }

    #[test]
    fn same_reporter_on_a_different_day_within_gap_is_non_qualifying() {
        let next_day = report(2, "anon:X", at(2024, 1, 2, 9, 0, 0));
        let result = engine().replay(&[a(), next_day]);
        assert_eq!(result.classification_of(2), Some(Classification::NonQualifying));
    }

    #[test]
    fn replay_ignores_input_order() {
        let c = report(3, "anon:Y", at(2024, 1, 29, 9, 0, 1));
        let d = report(4, "anon:Z", at(2024, 1, 15, 0, 0, 0));
        let forward = engine().replay(&[a(), d.clone(), c.clone()]);
        let shuffled = engine().replay(&[c, a(), d]);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn qualifying_timestamps_track_first_and_last() {
        let r2 = report(2, "anon:Y", at(2024, 2, 1, 9, 0, 0));
        let r3 = report(3, "anon:X", at(2024, 3, 1, 9, 0, 0));
        let result = engine().replay(&[a(), r2, r3]);

        assert_eq!(
            result.first_qualifying_reconfirmation_at,
            Some(at(2024, 2, 1, 9, 0, 0))
        );
        assert_eq!(
            result.last_qualifying_reconfirmation_at,
            Some(at(2024, 3, 1, 9, 0, 0))
        );
        assert_eq!(result.same_reporter_reconfirmations, 1);
        assert_eq!(result.distinct_reporter_reconfirmations, 1);
    }

    #[test]
    fn strength_requires_minimum_unique_reporters() {
        let strict = ReconfirmationEngine::new(&EngineConfig {
            strong_min_unique_reporters: 3,
            ..EngineConfig::default()
        });
        let c = report(3, "anon:Y", at(2024, 1, 29, 9, 0, 1));
        let result = strict.replay(&[a(), c]);
        assert_eq!(result.signal_strength, SignalStrength::WeakSameReporter);
    }

    #[test]
    fn empty_history_is_harmless() {
        let result = engine().replay(&[]);
        assert_eq!(result.total_reports, 0);
        assert_eq!(result.last_report_at, None);
        assert_eq!(result.signal_strength, SignalStrength::None);
    }

    #[test]
    fn apply_to_keeps_identity_and_anchor() {
        let created = at(2024, 1, 1, 9, 0, 0);
        let group = BikeGroup::anchored_at(7, GeoPoint::new(52.3676, 4.9041), created);
        let c = report(3, "anon:Y", at(2024, 1, 29, 9, 0, 1));
        let result = engine().replay(&[a(), c]);

        let now = at(2024, 1, 29, 9, 0, 2);
        let updated = result.apply_to(&group, now);
        assert_eq!(updated.id, 7);
        assert_eq!(updated.anchor, group.anchor);
        assert_eq!(updated.created_at, created);
        assert_eq!(updated.updated_at, now);
        assert_eq!(updated.total_reports, 2);
        assert_eq!(updated.last_report_at, at(2024, 1, 29, 9, 0, 1));
        assert_eq!(updated.signal_strength, SignalStrength::StrongDistinctReporters);
    }
}
