//! SignalStore backed by Postgres.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use bikesignal_common::{
    generate_public_id, BikeGroup, BikeGroupId, DedupeGroup, DedupeGroupId, GeoPoint, NewReport,
    Report, ReportId, ReportLocation, ReportStatus, ReporterId, SignalError, SignalResult,
    SignalStrength,
};

use crate::traits::{CandidateQuery, MergeOutcome, SignalStore, StatusChange};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS bike_groups (
        id                                  BIGSERIAL        PRIMARY KEY,
        created_at                          TIMESTAMPTZ      NOT NULL,
        updated_at                          TIMESTAMPTZ      NOT NULL,
        anchor_lat                          DOUBLE PRECISION NOT NULL,
        anchor_lng                          DOUBLE PRECISION NOT NULL,
        last_report_at                      TIMESTAMPTZ      NOT NULL,
        total_reports                       INTEGER          NOT NULL DEFAULT 0,
        unique_reporters                    INTEGER          NOT NULL DEFAULT 0,
        same_reporter_reconfirmations       INTEGER          NOT NULL DEFAULT 0,
        distinct_reporter_reconfirmations   INTEGER          NOT NULL DEFAULT 0,
        first_qualifying_reconfirmation_at  TIMESTAMPTZ,
        last_qualifying_reconfirmation_at   TIMESTAMPTZ,
        signal_strength                     TEXT             NOT NULL DEFAULT 'none'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        id               BIGSERIAL        PRIMARY KEY,
        public_id        TEXT             NOT NULL UNIQUE,
        created_at       TIMESTAMPTZ      NOT NULL,
        updated_at       TIMESTAMPTZ      NOT NULL,
        status           TEXT             NOT NULL DEFAULT 'new',
        lat              DOUBLE PRECISION NOT NULL,
        lng              DOUBLE PRECISION NOT NULL,
        accuracy_m       DOUBLE PRECISION NOT NULL,
        tags             TEXT[]           NOT NULL,
        note             TEXT,
        source           TEXT             NOT NULL DEFAULT 'web',
        reporter_key     TEXT             NOT NULL,
        bike_group_id    BIGINT           NOT NULL REFERENCES bike_groups(id),
        dedupe_group_id  BIGINT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS reports_created_at_idx ON reports (created_at)",
    "CREATE INDEX IF NOT EXISTS reports_bike_group_idx ON reports (bike_group_id, created_at)",
    "CREATE INDEX IF NOT EXISTS reports_lat_lng_idx ON reports (lat, lng)",
    r#"
    CREATE TABLE IF NOT EXISTS dedupe_groups (
        id                   BIGSERIAL    PRIMARY KEY,
        canonical_report_id  BIGINT       NOT NULL UNIQUE REFERENCES reports(id),
        merged_report_ids    BIGINT[]     NOT NULL DEFAULT '{}',
        created_at           TIMESTAMPTZ  NOT NULL,
        created_by           TEXT         NOT NULL
    )
    "#,
];

const REPORT_COLUMNS: &str = "id, public_id, created_at, updated_at, status, lat, lng, accuracy_m, \
     tags, note, source, reporter_key, bike_group_id, dedupe_group_id";

const BIKE_GROUP_COLUMNS: &str = "id, created_at, updated_at, anchor_lat, anchor_lng, \
     last_report_at, total_reports, unique_reporters, same_reporter_reconfirmations, \
     distinct_reporter_reconfirmations, first_qualifying_reconfirmation_at, \
     last_qualifying_reconfirmation_at, signal_strength";

const DEDUPE_GROUP_COLUMNS: &str =
    "id, canonical_report_id, merged_report_ids, created_at, created_by";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i64,
    public_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    status: String,
    lat: f64,
    lng: f64,
    accuracy_m: f64,
    tags: Vec<String>,
    note: Option<String>,
    source: String,
    reporter_key: String,
    bike_group_id: i64,
    dedupe_group_id: Option<i64>,
}

impl TryFrom<ReportRow> for Report {
    type Error = SignalError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: row.id,
            public_id: row.public_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            status: row.status.parse().map_err(corrupt_row)?,
            location: ReportLocation::new(row.lat, row.lng, row.accuracy_m),
            tags: row.tags,
            note: row.note,
            source: row.source.parse().map_err(corrupt_row)?,
            reporter: ReporterId::from_key(row.reporter_key).map_err(corrupt_row)?,
            bike_group_id: row.bike_group_id,
            dedupe_group_id: row.dedupe_group_id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BikeGroupRow {
    id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    anchor_lat: f64,
    anchor_lng: f64,
    last_report_at: DateTime<Utc>,
    total_reports: i32,
    unique_reporters: i32,
    same_reporter_reconfirmations: i32,
    distinct_reporter_reconfirmations: i32,
    first_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    last_qualifying_reconfirmation_at: Option<DateTime<Utc>>,
    signal_strength: String,
}

impl TryFrom<BikeGroupRow> for BikeGroup {
    type Error = SignalError;

    fn try_from(row: BikeGroupRow) -> Result<Self, Self::Error> {
        Ok(BikeGroup {
            id: row.id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            anchor: GeoPoint::new(row.anchor_lat, row.anchor_lng),
            last_report_at: row.last_report_at,
            total_reports: row.total_reports.max(0) as u32,
            unique_reporters: row.unique_reporters.max(0) as u32,
            same_reporter_reconfirmations: row.same_reporter_reconfirmations.max(0) as u32,
            distinct_reporter_reconfirmations: row.distinct_reporter_reconfirmations.max(0) as u32,
            first_qualifying_reconfirmation_at: row.first_qualifying_reconfirmation_at,
            last_qualifying_reconfirmation_at: row.last_qualifying_reconfirmation_at,
            signal_strength: row
                .signal_strength
                .parse::<SignalStrength>()
                .map_err(corrupt_row)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DedupeGroupRow {
    id: i64,
    canonical_report_id: i64,
    merged_report_ids: Vec<i64>,
    created_at: DateTime<Utc>,
    created_by: String,
}

impl From<DedupeGroupRow> for DedupeGroup {
    fn from(row: DedupeGroupRow) -> Self {
        DedupeGroup {
            id: row.id,
            canonical_report_id: row.canonical_report_id,
            merged_report_ids: row.merged_report_ids.into_iter().collect(),
            created_at: row.created_at,
            created_by: row.created_by,
        }
    }
}

fn db_err(e: sqlx::Error) -> SignalError {
    SignalError::Database(e.to_string())
}

fn corrupt_row(e: impl std::error::Error + Send + Sync + 'static) -> SignalError {
    SignalError::Anyhow(anyhow::Error::new(e).context("unreadable row"))
}

fn to_db_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// PgSignalStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgSignalStore {
    pool: PgPool,
}

impl PgSignalStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing. Safe to run on every start.
    pub async fn migrate(&self) -> SignalResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        info!("Signal store migrations applied");
        Ok(())
    }
}

async fn lock_dedupe_group(
    tx: &mut Transaction<'_, Postgres>,
    canonical_id: ReportId,
) -> SignalResult<Option<DedupeGroup>> {
    let sql = format!(
        "SELECT {DEDUPE_GROUP_COLUMNS} FROM dedupe_groups WHERE canonical_report_id = $1 FOR UPDATE"
    );
    let row = sqlx::query_as::<_, DedupeGroupRow>(&sql)
        .bind(canonical_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;
    Ok(row.map(DedupeGroup::from))
}

#[async_trait]
impl SignalStore for PgSignalStore {
    async fn report(&self, id: ReportId) -> SignalResult<Option<Report>> {
        let sql = format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1");
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Report::try_from).transpose()
    }

    async fn candidate_reports(&self, query: &CandidateQuery) -> SignalResult<Vec<Report>> {
        let statuses: Vec<String> = query.statuses.iter().map(|s| s.to_string()).collect();
        let (min_lat, max_lat, [(lng_a_lo, lng_a_hi), (lng_b_lo, lng_b_hi)]) = match query.bounds {
            Some(b) => (b.min_lat, b.max_lat, b.lng_ranges()),
            None => (-90.0, 90.0, [(-180.0, 180.0); 2]),
        };
        let sql = format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM reports
            WHERE created_at >= $1
              AND status = ANY($2)
              AND lat BETWEEN $3 AND $4
              AND (lng BETWEEN $5 AND $6 OR lng BETWEEN $7 AND $8)
            ORDER BY created_at ASC, id ASC
            "#
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(query.created_since)
            .bind(&statuses)
            .bind(min_lat)
            .bind(max_lat)
            .bind(lng_a_lo)
            .bind(lng_a_hi)
            .bind(lng_b_lo)
            .bind(lng_b_hi)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Report::try_from).collect()
    }

    async fn reports_in_group(&self, bike_group_id: BikeGroupId) -> SignalResult<Vec<Report>> {
        let sql = format!(
            "SELECT {REPORT_COLUMNS} FROM reports WHERE bike_group_id = $1 ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(bike_group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Report::try_from).collect()
    }

    async fn list_reports(&self, status: Option<ReportStatus>) -> SignalResult<Vec<Report>> {
        let sql = format!(
            r#"
            SELECT {REPORT_COLUMNS}
            FROM reports
            WHERE $1::TEXT IS NULL OR status = $1
            ORDER BY created_at DESC, id DESC
            "#
        );
        let rows = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(status.map(|s| s.to_string()))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Report::try_from).collect()
    }

    async fn insert_report(
        &self,
        report: &NewReport,
        bike_group_id: BikeGroupId,
    ) -> SignalResult<Report> {
        let sql = format!(
            r#"
            INSERT INTO reports
                (public_id, created_at, updated_at, status, lat, lng, accuracy_m,
                 tags, note, source, reporter_key, bike_group_id)
            VALUES ($1, $2, $2, 'new', $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {REPORT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(generate_public_id())
            .bind(report.created_at)
            .bind(report.location.lat)
            .bind(report.location.lng)
            .bind(report.location.accuracy_m)
            .bind(&report.tags)
            .bind(&report.note)
            .bind(report.source.as_str())
            .bind(report.reporter.as_str())
            .bind(bike_group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let stored = Report::try_from(row)?;
        debug!(report_id = stored.id, bike_group_id, "Report inserted");
        Ok(stored)
    }

    async fn transition_status(
        &self,
        id: ReportId,
        to: ReportStatus,
        now: DateTime<Utc>,
    ) -> SignalResult<StatusChange> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM reports WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?;
        let from: ReportStatus = current
            .ok_or(SignalError::ReportNotFound(id))?
            .0
            .parse()
            .map_err(corrupt_row)?;
        if !from.can_transition_to(to) {
            return Err(SignalError::InvalidTransition { from, to });
        }

        let sql = format!(
            "UPDATE reports SET status = $2, updated_at = $3 WHERE id = $1 RETURNING {REPORT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ReportRow>(&sql)
            .bind(id)
            .bind(to.as_str())
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(StatusChange {
            from,
            report: Report::try_from(row)?,
        })
    }

    async fn create_bike_group(
        &self,
        anchor: GeoPoint,
        now: DateTime<Utc>,
    ) -> SignalResult<BikeGroup> {
        let sql = format!(
            r#"
            INSERT INTO bike_groups (created_at, updated_at, anchor_lat, anchor_lng, last_report_at)
            VALUES ($1, $1, $2, $3, $1)
            RETURNING {BIKE_GROUP_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, BikeGroupRow>(&sql)
            .bind(now)
            .bind(anchor.lat)
            .bind(anchor.lng)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        BikeGroup::try_from(row)
    }

    async fn bike_group(&self, id: BikeGroupId) -> SignalResult<Option<BikeGroup>> {
        let sql = format!("SELECT {BIKE_GROUP_COLUMNS} FROM bike_groups WHERE id = $1");
        let row = sqlx::query_as::<_, BikeGroupRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(BikeGroup::try_from).transpose()
    }

    async fn bike_group_ids(&self) -> SignalResult<Vec<BikeGroupId>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM bike_groups ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    async fn update_bike_group(&self, group: &BikeGroup) -> SignalResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bike_groups SET
                updated_at = $2,
                last_report_at = $3,
                total_reports = $4,
                unique_reporters = $5,
                same_reporter_reconfirmations = $6,
                distinct_reporter_reconfirmations = $7,
                first_qualifying_reconfirmation_at = $8,
                last_qualifying_reconfirmation_at = $9,
                signal_strength = $10
            WHERE id = $1
            "#,
        )
        .bind(group.id)
        .bind(group.updated_at)
        .bind(group.last_report_at)
        .bind(to_db_count(group.total_reports))
        .bind(to_db_count(group.unique_reporters))
        .bind(to_db_count(group.same_reporter_reconfirmations))
        .bind(to_db_count(group.distinct_reporter_reconfirmations))
        .bind(group.first_qualifying_reconfirmation_at)
        .bind(group.last_qualifying_reconfirmation_at)
        .bind(group.signal_strength.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(SignalError::MissingBikeGroup {
                bike_group_id: group.id,
                report_id: None,
            });
        }
        Ok(())
    }

    async fn merge_reports(
        &self,
        canonical_id: ReportId,
        duplicates: &BTreeSet<ReportId>,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> SignalResult<MergeOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock every involved report in id order so concurrent merges queue
        // on the same rows instead of interleaving their set unions.
        let mut involved: Vec<i64> = duplicates.iter().copied().collect();
        involved.push(canonical_id);
        involved.sort_unstable();
        involved.dedup();
        let locked: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM reports WHERE id = ANY($1) ORDER BY id FOR UPDATE")
                .bind(&involved)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?;
        let found: BTreeSet<i64> = locked.into_iter().map(|r| r.0).collect();

        if !found.contains(&canonical_id) {
            return Err(SignalError::CanonicalNotFound(canonical_id));
        }
        if let Some(missing) = duplicates.iter().find(|id| !found.contains(*id)) {
            return Err(SignalError::DuplicateNotFound(*missing));
        }

        let existing = lock_dedupe_group(&mut tx, canonical_id).await?;
        let created = existing.is_none();
        let mut group = match existing {
            Some(group) => group,
            None => {
                let sql = format!(
                    r#"
                    INSERT INTO dedupe_groups (canonical_report_id, created_at, created_by)
                    VALUES ($1, $2, $3)
                    RETURNING {DEDUPE_GROUP_COLUMNS}
                    "#
                );
                let row = sqlx::query_as::<_, DedupeGroupRow>(&sql)
                    .bind(canonical_id)
                    .bind(now)
                    .bind(created_by)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
                DedupeGroup::from(row)
            }
        };

        let newly_merged: BTreeSet<ReportId> = duplicates
            .difference(&group.merged_report_ids)
            .copied()
            .collect();
        group.merged_report_ids.extend(newly_merged.iter().copied());

        let merged: Vec<i64> = group.merged_report_ids.iter().copied().collect();
        sqlx::query("UPDATE dedupe_groups SET merged_report_ids = $2 WHERE id = $1")
            .bind(group.id)
            .bind(&merged)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let members: Vec<i64> = group.members().into_iter().collect();
        sqlx::query("UPDATE reports SET dedupe_group_id = $1, updated_at = $2 WHERE id = ANY($3)")
            .bind(group.id)
            .bind(now)
            .bind(&members)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(MergeOutcome {
            group,
            created,
            newly_merged,
        })
    }

    async fn dedupe_group(&self, id: DedupeGroupId) -> SignalResult<Option<DedupeGroup>> {
        let sql = format!("SELECT {DEDUPE_GROUP_COLUMNS} FROM dedupe_groups WHERE id = $1");
        let row = sqlx::query_as::<_, DedupeGroupRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(DedupeGroup::from))
    }

    async fn dedupe_group_for(&self, canonical_id: ReportId) -> SignalResult<Option<DedupeGroup>> {
        let sql =
            format!("SELECT {DEDUPE_GROUP_COLUMNS} FROM dedupe_groups WHERE canonical_report_id = $1");
        let row = sqlx::query_as::<_, DedupeGroupRow>(&sql)
            .bind(canonical_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(DedupeGroup::from))
    }
}
