//! Operator detail view of a cluster's evidence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bikesignal_common::{
    BikeGroup, Report, ReportId, ReporterId, ReporterMatchKind, SignalStrength, SignalSummary,
};

use crate::reconfirmation::{Classification, ReconfirmationEngine};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub report_id: ReportId,
    pub public_id: String,
    pub created_at: DateTime<Utc>,
    /// Anonymised reporter label, stable within one cluster.
    pub reporter_label: String,
    pub reporter_match_kind: Option<ReporterMatchKind>,
    pub qualified: bool,
    pub ignored_same_day: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDetails {
    pub bike_group: BikeGroup,
    pub signal_summary: SignalSummary,
    pub signal_strength: SignalStrength,
    pub timeline: Vec<TimelineEntry>,
}

/// `Reporter A` … `Reporter Z`, then `Reporter A2` … `Reporter Z2`, `Reporter A3`, …
pub fn reporter_label(index: usize) -> String {
    let letter = char::from(b'A' + (index % 26) as u8);
    if index >= 26 {
        format!("Reporter {letter}{}", index / 26 + 1)
    } else {
        format!("Reporter {letter}")
    }
}

/// Build the timeline for `group` from its full history. Labels follow the
/// order in which reporters first appear.
pub fn build_signal_details(
    engine: &ReconfirmationEngine,
    group: &BikeGroup,
    history: &[Report],
) -> SignalDetails {
    let replay = engine.replay(history);
    let by_id: HashMap<ReportId, &Report> = history.iter().map(|r| (r.id, r)).collect();

    let mut labels: HashMap<&ReporterId, String> = HashMap::new();
    let mut timeline = Vec::with_capacity(replay.classifications.len());

    for (report_id, classification) in &replay.classifications {
        let Some(report) = by_id.get(report_id) else {
            continue;
        };
        let next_index = labels.len();
        let label = labels
            .entry(&report.reporter)
            .or_insert_with(|| reporter_label(next_index))
            .clone();

        timeline.push(TimelineEntry {
            report_id: report.id,
            public_id: report.public_id.clone(),
            created_at: report.created_at,
            reporter_label: label,
            reporter_match_kind: classification.reporter_match_kind(),
            qualified: classification.is_qualifying(),
            ignored_same_day: *classification == Classification::IgnoredSameDay,
        });
    }

    SignalDetails {
        bike_group: group.clone(),
        signal_summary: group.summary(),
        signal_strength: group.signal_strength,
        timeline,
    }
}
