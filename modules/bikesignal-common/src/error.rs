use thiserror::Error;

use crate::types::{BikeGroupId, ReportId, ReportStatus};

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("Report not found: {0}")]
    ReportNotFound(ReportId),

    #[error("Canonical report not found: {0}")]
    CanonicalNotFound(ReportId),

    #[error("Duplicate report not found: {0}")]
    DuplicateNotFound(ReportId),

    /// A report points at a bike group that cannot be loaded. This is data
    /// corruption, not an ordinary lookup miss.
    #[error("Bike group {bike_group_id} missing for report {report_id:?}")]
    MissingBikeGroup {
        bike_group_id: BikeGroupId,
        report_id: Option<ReportId>,
    },

    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: ReportStatus, to: ReportStatus },

    #[error("Invalid merge: {0}")]
    InvalidMerge(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl SignalError {
    /// Transient storage failures. The request layer may retry the whole
    /// operation; the engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SignalError::Database(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, SignalError::MissingBikeGroup { .. })
    }
}

pub type SignalResult<T> = std::result::Result<T, SignalError>;

/// Unknown string value for one of the snake_case domain enums.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
