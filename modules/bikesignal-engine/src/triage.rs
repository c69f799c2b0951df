//! Operator report listing enriched with cluster signal.

use serde::{Deserialize, Serialize};

use bikesignal_common::{
    BikeGroup, BikeGroupId, Report, ReportStatus, SignalStrength, SignalSummary,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorReportView {
    pub report: Report,
    pub bike_group_id: BikeGroupId,
    pub signal_summary: SignalSummary,
    pub signal_strength: SignalStrength,
}

impl OperatorReportView {
    pub fn new(report: Report, group: &BikeGroup) -> Self {
        Self {
            report,
            bike_group_id: group.id,
            signal_summary: group.summary(),
            signal_strength: group.signal_strength,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSort {
    /// Storage order: newest first.
    #[default]
    Newest,
    /// Strong before weak before none, newest first within a tier.
    Signal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalFilter {
    #[serde(default)]
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub signal_strength: Option<SignalStrength>,
    #[serde(default)]
    pub strong_only: bool,
    #[serde(default)]
    pub has_qualifying_reconfirmation: Option<bool>,
    #[serde(default)]
    pub sort: ReportSort,
}

impl SignalFilter {
    pub fn accepts(&self, view: &OperatorReportView) -> bool {
        if self
            .signal_strength
            .is_some_and(|wanted| view.signal_strength != wanted)
        {
            return false;
        }
        if self.strong_only && view.signal_strength != SignalStrength::StrongDistinctReporters {
            return false;
        }
        if self
            .has_qualifying_reconfirmation
            .is_some_and(|wanted| view.signal_summary.has_qualifying_reconfirmation != wanted)
        {
            return false;
        }
        true
    }

    /// Filter and order already-enriched views.
    pub fn apply(&self, views: Vec<OperatorReportView>) -> Vec<OperatorReportView> {
        let mut kept: Vec<OperatorReportView> =
            views.into_iter().filter(|v| self.accepts(v)).collect();

        if self.sort == ReportSort::Signal {
            kept.sort_by(|a, b| {
                b.signal_strength
                    .priority()
                    .cmp(&a.signal_strength.priority())
                    .then(b.report.created_at.cmp(&a.report.created_at))
            });
        }
        kept
    }
}
