use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::ParseEnumError;

pub type ReportId = i64;
pub type BikeGroupId = i64;
pub type DedupeGroupId = i64;

/// Actor recorded on audit events emitted by the engine itself.
pub const SYSTEM_ACTOR: &str = "system";

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Where a report was filed, with the device-reported horizontal accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub lat: f64,
    pub lng: f64,
    pub accuracy_m: f64,
}

impl ReportLocation {
    pub fn new(lat: f64, lng: f64, accuracy_m: f64) -> Self {
        Self { lat, lng, accuracy_m }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

// --- Enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    New,
    Triaged,
    Forwarded,
    Resolved,
    Invalid,
}

impl ReportStatus {
    /// Statuses that still describe an unresolved problem on the street.
    pub const OPEN: [ReportStatus; 3] = [
        ReportStatus::New,
        ReportStatus::Triaged,
        ReportStatus::Forwarded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::New => "new",
            ReportStatus::Triaged => "triaged",
            ReportStatus::Forwarded => "forwarded",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Invalid => "invalid",
        }
    }

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn allowed_transitions(&self) -> &'static [ReportStatus] {
        match self {
            ReportStatus::New => &[ReportStatus::Triaged, ReportStatus::Invalid],
            ReportStatus::Triaged => &[
                ReportStatus::Forwarded,
                ReportStatus::Resolved,
                ReportStatus::Invalid,
            ],
            ReportStatus::Forwarded => &[ReportStatus::Resolved, ReportStatus::Invalid],
            ReportStatus::Resolved | ReportStatus::Invalid => &[],
        }
    }

    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ReportStatus::New),
            "triaged" => Ok(ReportStatus::Triaged),
            "forwarded" => Ok(ReportStatus::Forwarded),
            "resolved" => Ok(ReportStatus::Resolved),
            "invalid" => Ok(ReportStatus::Invalid),
            other => Err(ParseEnumError::new("report status", other)),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    #[default]
    None,
    WeakSameReporter,
    StrongDistinctReporters,
}

impl SignalStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStrength::None => "none",
            SignalStrength::WeakSameReporter => "weak_same_reporter",
            SignalStrength::StrongDistinctReporters => "strong_distinct_reporters",
        }
    }

    /// Sort priority for operator lists (higher sorts first).
    pub fn priority(&self) -> u8 {
        match self {
            SignalStrength::None => 0,
            SignalStrength::WeakSameReporter => 1,
            SignalStrength::StrongDistinctReporters => 2,
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalStrength {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SignalStrength::None),
            "weak_same_reporter" => Ok(SignalStrength::WeakSameReporter),
            "strong_distinct_reporters" => Ok(SignalStrength::StrongDistinctReporters),
            other => Err(ParseEnumError::new("signal strength", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterMatchKind {
    SameReporter,
    DistinctReporter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    #[default]
    Web,
    PartnerImport,
}

impl ReportSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportSource::Web => "web",
            ReportSource::PartnerImport => "partner_import",
        }
    }
}

impl FromStr for ReportSource {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "web" => Ok(ReportSource::Web),
            "partner_import" => Ok(ReportSource::PartnerImport),
            other => Err(ParseEnumError::new("report source", other)),
        }
    }
}

// --- Reporter identity ---

const USER_PREFIX: &str = "user:";
const ANON_PREFIX: &str = "anon:";

/// Stable key distinguishing one reporter from another: `user:<id>` for
/// authenticated users, `anon:<hash>` for anonymous devices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReporterId(String);

impl ReporterId {
    pub fn user(user_id: i64) -> Self {
        Self(format!("{USER_PREFIX}{user_id}"))
    }

    /// Derive the anonymous identity from the device cookie token and the
    /// server secret. The report payload never feeds into the hash.
    pub fn anonymous(device_token: &str, secret: &str) -> Self {
        let digest = Sha256::digest(format!("{device_token}:{secret}").as_bytes());
        Self(format!("{ANON_PREFIX}{}", hex::encode(digest)))
    }

    /// Accept an already-derived key as stored by the surrounding service.
    pub fn from_key(key: impl Into<String>) -> Result<Self, ParseEnumError> {
        let key = key.into();
        let body = key
            .strip_prefix(USER_PREFIX)
            .or_else(|| key.strip_prefix(ANON_PREFIX));
        match body {
            Some(rest) if !rest.is_empty() => Ok(Self(key)),
            _ => Err(ParseEnumError::new("reporter identity", key)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_authenticated(&self) -> bool {
        self.0.starts_with(USER_PREFIX)
    }

    /// Actor label for the `created` audit event.
    pub fn actor_label(&self) -> &'static str {
        if self.is_authenticated() {
            "citizen_authenticated"
        } else {
            "citizen_anonymous"
        }
    }
}

impl fmt::Display for ReporterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short upper-case id shown to citizens on their tracking page.
pub fn generate_public_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

// --- Reports ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub public_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ReportStatus,
    pub location: ReportLocation,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub source: ReportSource,
    pub reporter: ReporterId,
    /// Set once at creation, never reassigned.
    pub bike_group_id: BikeGroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedupe_group_id: Option<DedupeGroupId>,
}

/// An incoming report that already passed upstream validation
/// (non-empty tag set of at most ten entries, sane coordinates).
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct NewReport {
    pub location: ReportLocation,
    pub tags: Vec<String>,
    #[builder(default)]
    pub note: Option<String>,
    #[builder(default)]
    pub source: ReportSource,
    pub reporter: ReporterId,
    /// Creation time, also used as "now" for lookback windows and recency.
    pub created_at: DateTime<Utc>,
}

// --- Bike groups ---

/// An automatically maintained cluster of reports believed to describe the
/// same physical bicycle. Counters are only written by recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BikeGroup {
    pub id: BikeGroupId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Frozen at the first report, never recentred.
    pub anchor: GeoPoint,
    pub last_report_at: DateTime<Utc>,
    pub total_reports: u32,
    pub unique_reporters: u32,
    pub same_reporter_reconfirmations: u32,
    pub distinct_reporter_reconfirmations: u32,
    pub first_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    pub last_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    pub signal_strength: SignalStrength,
}

impl BikeGroup {
    /// A fresh group with zeroed counters and no signal.
    pub fn anchored_at(id: BikeGroupId, anchor: GeoPoint, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            anchor,
            last_report_at: now,
            total_reports: 0,
            unique_reporters: 0,
            same_reporter_reconfirmations: 0,
            distinct_reporter_reconfirmations: 0,
            first_qualifying_reconfirmation_at: None,
            last_qualifying_reconfirmation_at: None,
            signal_strength: SignalStrength::None,
        }
    }

    pub fn summary(&self) -> SignalSummary {
        SignalSummary::from(self)
    }
}

/// Read view of a bike group's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSummary {
    pub total_reports: u32,
    pub unique_reporters: u32,
    pub same_reporter_reconfirmations: u32,
    pub distinct_reporter_reconfirmations: u32,
    pub first_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    pub last_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    pub last_report_at: DateTime<Utc>,
    pub has_qualifying_reconfirmation: bool,
}

impl From<&BikeGroup> for SignalSummary {
    fn from(group: &BikeGroup) -> Self {
        Self {
            total_reports: group.total_reports,
            unique_reporters: group.unique_reporters,
            same_reporter_reconfirmations: group.same_reporter_reconfirmations,
            distinct_reporter_reconfirmations: group.distinct_reporter_reconfirmations,
            first_qualifying_reconfirmation_at: group.first_qualifying_reconfirmation_at,
            last_qualifying_reconfirmation_at: group.last_qualifying_reconfirmation_at,
            last_report_at: group.last_report_at,
            has_qualifying_reconfirmation: group.same_reporter_reconfirmations
                + group.distinct_reporter_reconfirmations
                > 0,
        }
    }
}

// --- Dedupe groups ---

/// Operator-confirmed set of reports treated as literal duplicates of one
/// canonical report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupeGroup {
    pub id: DedupeGroupId,
    pub canonical_report_id: ReportId,
    pub merged_report_ids: BTreeSet<ReportId>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl DedupeGroup {
    /// Canonical report plus every merged duplicate.
    pub fn members(&self) -> BTreeSet<ReportId> {
        let mut members = self.merged_report_ids.clone();
        members.insert(self.canonical_report_id);
        members
    }
}
