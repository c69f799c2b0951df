use std::env;
use std::str::FromStr;

use anyhow::Context;
use tracing::info;

/// Engine tunables. Composite-score weights are constants in [`crate::geo`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // Cluster matching
    pub signal_match_radius_m: f64,
    pub signal_lookback_days: i64,

    // Reconfirmation
    pub reconfirmation_gap_days: i64,
    pub strong_min_unique_reporters: u32,

    // Duplicate ranking
    pub dedupe_radius_m: f64,
    pub dedupe_lookback_days: i64,
    pub max_dedupe_candidates: usize,

    // Serialization of concurrent creators
    pub cell_precision: usize,
    pub serialize_by_cell: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal_match_radius_m: 10.0,
            signal_lookback_days: 180,
            reconfirmation_gap_days: 28,
            strong_min_unique_reporters: 2,
            dedupe_radius_m: 15.0,
            dedupe_lookback_days: 30,
            max_dedupe_candidates: 5,
            cell_precision: 7,
            serialize_by_cell: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `BIKESIGNAL_*` variables that are set.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            signal_match_radius_m: env_or(
                "BIKESIGNAL_SIGNAL_MATCH_RADIUS_M",
                defaults.signal_match_radius_m,
            )?,
            signal_lookback_days: env_or(
                "BIKESIGNAL_SIGNAL_LOOKBACK_DAYS",
                defaults.signal_lookback_days,
            )?,
            reconfirmation_gap_days: env_or(
                "BIKESIGNAL_RECONFIRMATION_GAP_DAYS",
                defaults.reconfirmation_gap_days,
            )?,
            strong_min_unique_reporters: env_or(
                "BIKESIGNAL_STRONG_MIN_UNIQUE_REPORTERS",
                defaults.strong_min_unique_reporters,
            )?,
            dedupe_radius_m: env_or("BIKESIGNAL_DEDUPE_RADIUS_M", defaults.dedupe_radius_m)?,
            dedupe_lookback_days: env_or(
                "BIKESIGNAL_DEDUPE_LOOKBACK_DAYS",
                defaults.dedupe_lookback_days,
            )?,
            max_dedupe_candidates: env_or(
                "BIKESIGNAL_MAX_DEDUPE_CANDIDATES",
                defaults.max_dedupe_candidates,
            )?,
            cell_precision: env_or("BIKESIGNAL_CELL_PRECISION", defaults.cell_precision)?,
            serialize_by_cell: env_or("BIKESIGNAL_SERIALIZE_BY_CELL", defaults.serialize_by_cell)?,
        })
    }

    pub fn log_summary(&self) {
        info!(
            signal_match_radius_m = self.signal_match_radius_m,
            signal_lookback_days = self.signal_lookback_days,
            reconfirmation_gap_days = self.reconfirmation_gap_days,
            strong_min_unique_reporters = self.strong_min_unique_reporters,
            dedupe_radius_m = self.dedupe_radius_m,
            dedupe_lookback_days = self.dedupe_lookback_days,
            max_dedupe_candidates = self.max_dedupe_candidates,
            cell_precision = self.cell_precision,
            serialize_by_cell = self.serialize_by_cell,
            "Engine config"
        );
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(_) => Ok(default),
    }
}
