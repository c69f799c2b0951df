//! Audit facts recorded against individual reports.
//!
//! The serde `type` tag doubles as the `event_type` column of the audit log;
//! the rest of the variant becomes the JSON payload.

use serde::{Deserialize, Serialize};

use crate::types::{
    BikeGroupId, DedupeGroupId, ReportId, ReportSource, ReportStatus, ReporterMatchKind,
    SignalStrength,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportEvent {
    Created {
        report_id: ReportId,
        bike_group_id: BikeGroupId,
        source: ReportSource,
    },

    StatusChanged {
        report_id: ReportId,
        from: ReportStatus,
        to: ReportStatus,
    },

    Merged {
        report_id: ReportId,
        canonical_report_id: ReportId,
        dedupe_group_id: DedupeGroupId,
    },

    #[serde(rename = "signal_reconfirmation_counted")]
    ReconfirmationCounted {
        report_id: ReportId,
        bike_group_id: BikeGroupId,
        reporter_match_kind: ReporterMatchKind,
    },

    #[serde(rename = "signal_reconfirmation_ignored_same_day")]
    ReconfirmationIgnoredSameDay {
        report_id: ReportId,
        bike_group_id: BikeGroupId,
    },

    SignalStrengthChanged {
        report_id: ReportId,
        bike_group_id: BikeGroupId,
        previous_signal_strength: SignalStrength,
        signal_strength: SignalStrength,
    },
}

impl ReportEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ReportEvent::Created { .. } => "created",
            ReportEvent::StatusChanged { .. } => "status_changed",
            ReportEvent::Merged { .. } => "merged",
            ReportEvent::ReconfirmationCounted { .. } => "signal_reconfirmation_counted",
            ReportEvent::ReconfirmationIgnoredSameDay { .. } => {
                "signal_reconfirmation_ignored_same_day"
            }
            ReportEvent::SignalStrengthChanged { .. } => "signal_strength_changed",
        }
    }

    pub fn report_id(&self) -> ReportId {
        match self {
            ReportEvent::Created { report_id, .. }
            | ReportEvent::StatusChanged { report_id, .. }
            | ReportEvent::Merged { report_id, .. }
            | ReportEvent::ReconfirmationCounted { report_id, .. }
            | ReportEvent::ReconfirmationIgnoredSameDay { report_id, .. }
            | ReportEvent::SignalStrengthChanged { report_id, .. } => *report_id,
        }
    }

    /// Serialize this event to a JSON Value for the audit log payload.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<ReportEvent> {
        vec![
            ReportEvent::Created {
                report_id: 1,
                bike_group_id: 10,
                source: ReportSource::Web,
            },
            ReportEvent::StatusChanged {
                report_id: 1,
                from: ReportStatus::New,
                to: ReportStatus::Triaged,
            },
            ReportEvent::Merged {
                report_id: 2,
                canonical_report_id: 1,
                dedupe_group_id: 5,
            },
            ReportEvent::ReconfirmationCounted {
                report_id: 3,
                bike_group_id: 10,
                reporter_match_kind: ReporterMatchKind::DistinctReporter,
            },
            ReportEvent::ReconfirmationIgnoredSameDay {
                report_id: 4,
                bike_group_id: 10,
            },
            ReportEvent::SignalStrengthChanged {
                report_id: 3,
                bike_group_id: 10,
                previous_signal_strength: SignalStrength::None,
                signal_strength: SignalStrength::StrongDistinctReporters,
            },
        ]
    }

    #[test]
    fn event_type_matches_serde_tag() {
        for event in samples() {
            let payload = event.to_payload();
            assert_eq!(payload["type"].as_str(), Some(event.event_type()));
        }
    }

    #[test]
    fn event_types_are_unique() {
        let types: std::collections::HashSet<&str> =
            samples().iter().map(ReportEvent::event_type).collect();
        assert_eq!(types.len(), samples().len());
    }

    #[test]
    fn counted_payload_carries_match_kind() {
        let event = ReportEvent::ReconfirmationCounted {
            report_id: 3,
            bike_group_id: 10,
            reporter_match_kind: ReporterMatchKind::SameReporter,
        };
        let payload = event.to_payload();
        assert_eq!(payload["reporter_match_kind"], "same_reporter");
        assert_eq!(ReportEvent::from_payload(&payload).unwrap(), event);
    }
}
