//! Append-only audit log backed by Postgres.

use anyhow::{Context, Result};
use bikesignal_common::ReportId;
use sqlx::PgPool;
use tracing::debug;

use crate::types::{AppendEvent, StoredEvent};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS report_events (
        seq         BIGSERIAL    PRIMARY KEY,
        ts          TIMESTAMPTZ  NOT NULL DEFAULT now(),
        event_type  TEXT         NOT NULL,
        report_id   BIGINT       NOT NULL,
        actor       TEXT,
        payload     JSONB        NOT NULL,
        schema_v    SMALLINT     NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS report_events_report_idx ON report_events (report_id, seq)",
    "CREATE INDEX IF NOT EXISTS report_events_type_idx ON report_events (event_type, seq)",
];

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Append-only audit log. Rows are never updated or deleted.
#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the table and indexes if missing. Safe to run on every start.
    pub async fn migrate(&self) -> Result<()> {
        for statement in MIGRATIONS {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .context("report_events migration failed")?;
        }
        Ok(())
    }

    /// Append a fact and return the full StoredEvent (with ts from Postgres).
    pub async fn append_and_read(&self, event: AppendEvent) -> Result<StoredEvent> {
        let stored = sqlx::query_as::<_, StoredEvent>(
            r#"
            INSERT INTO report_events (event_type, report_id, actor, payload, schema_v)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING seq, ts, event_type, report_id, actor, payload, schema_v
            "#,
        )
        .bind(&event.event_type)
        .bind(event.report_id)
        .bind(&event.actor)
        .bind(&event.payload)
        .bind(event.schema_v)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("append {} for report {}", event.event_type, event.report_id))?;

        debug!(
            seq = stored.seq,
            report_id = stored.report_id,
            event_type = %stored.event_type,
            "Audit event appended"
        );
        Ok(stored)
    }

    /// Every fact recorded against one report, oldest first.
    pub async fn read_for_report(&self, report_id: ReportId) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT seq, ts, event_type, report_id, actor, payload, schema_v
            FROM report_events
            WHERE report_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Read facts filtered by event type, in sequence order.
    pub async fn read_by_type(
        &self,
        event_type: &str,
        seq_start: i64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query_as::<_, StoredEvent>(
            r#"
            SELECT seq, ts, event_type, report_id, actor, payload, schema_v
            FROM report_events
            WHERE event_type = $1 AND seq >= $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(event_type)
        .bind(seq_start)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// sqlx::FromRow for StoredEvent
// ---------------------------------------------------------------------------

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEvent {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(StoredEvent {
            seq: row.try_get("seq")?,
            ts: row.try_get("ts")?,
            event_type: row.try_get("event_type")?,
            report_id: row.try_get("report_id")?,
            actor: row.try_get("actor")?,
            payload: row.try_get("payload")?,
            schema_v: row.try_get("schema_v")?,
        })
    }
}
