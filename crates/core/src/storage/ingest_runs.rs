use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    LoadCsv,
    Backfill,
}

impl RunKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoadCsv => "load_csv",
            Self::Backfill => "backfill",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Some rows or files were skipped, the rest were written.
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn from_counts(written: u64, skipped: u64) -> Self {
        match (written, skipped) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failed,
            _ => Self::Partial,
        }
    }
}

/// One worker run, written once when the run ends.
#[derive(Debug, Clone)]
pub struct IngestRun<'a> {
    pub kind: RunKind,
    pub source: &'a str,
    pub ticker: Option<&'a str>,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub rows_written: u64,
    pub rows_skipped: u64,
    pub error: Option<&'a str>,
    pub details: Option<Value>,
}

pub async fn record_ingest_run(pool: &sqlx::PgPool, run: &IngestRun<'_>) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let finished_at: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO ingest_runs \
         (id, kind, source, ticker, started_at, finished_at, status, rows_written, rows_skipped, error, details) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .persistent(false)
    .bind(id)
    .bind(run.kind.as_str())
    .bind(run.source)
    .bind(run.ticker)
    .bind(run.started_at)
    .bind(finished_at)
    .bind(run.status.as_str())
    .bind(i64::try_from(run.rows_written).unwrap_or(i64::MAX))
    .bind(i64::try_from(run.rows_skipped).unwrap_or(i64::MAX))
    .bind(run.error)
    .bind(run.details.clone())
    .execute(pool)
    .await
    .context("insert ingest_runs failed")?;

    Ok(id)
}
