//! Postgres-backed analysis store
//!
//! The schema is created lazily on first use.

use super::{AnalysisStore, AnalysisSummary, SystemStats};
use crate::error::{AnalysisError, ErrorBody};
use crate::models::{AnalysisRecord, Report, ReportStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

pub struct PgAnalysisStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    /// Build a pool without connecting; the first query connects.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| AnalysisError::Database(format!("Invalid database URL: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS analysis_records (
                      record_id UUID PRIMARY KEY,
                      job_id UUID,
                      filename TEXT NOT NULL,
                      query TEXT NOT NULL,
                      status TEXT NOT NULL,
                      report JSONB,
                      error JSONB,
                      processing_ms BIGINT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_analysis_records_created
                    ON analysis_records (created_at DESC);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AnalysisError::Database(format!("Failed to initialize analysis schema: {}", e))
            })?;

        Ok(())
    }
}

fn status_to_db(status: ReportStatus) -> &'static str {
    match status {
        ReportStatus::Success => "success",
        ReportStatus::Partial => "partial",
        ReportStatus::Error => "error",
    }
}

fn status_from_db(status: &str) -> ReportStatus {
    match status {
        "success" => ReportStatus::Success,
        "partial" => ReportStatus::Partial,
        _ => ReportStatus::Error,
    }
}

/// Day count as bound by `make_interval`.
fn interval_days(days: u32) -> Result<i32> {
    i32::try_from(days).map_err(|_| {
        AnalysisError::Validation(format!("Age of {} days is out of range", days))
    })
}

fn db_error(context: &str, e: sqlx::Error) -> AnalysisError {
    AnalysisError::Database(format!("{}: {}", context, e))
}

fn summary_from_row(row: &PgRow) -> Result<AnalysisSummary> {
    let status: String = row.try_get("status")?;
    let processing_ms: i64 = row.try_get("processing_ms")?;
    Ok(AnalysisSummary {
        record_id: row.try_get("record_id")?,
        job_id: row.try_get("job_id")?,
        filename: row.try_get("filename")?,
        query: row.try_get("query")?,
        status: status_from_db(&status),
        processing_ms: processing_ms.max(0) as u64,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait::async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn save(&self, record: AnalysisRecord) -> Result<()> {
        self.ensure_schema().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO analysis_records
              (record_id, job_id, filename, query, status, report, error, processing_ms, created_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (record_id) DO NOTHING
            "#,
        )
        .bind(record.record_id)
        .bind(record.job_id)
        .bind(&record.filename)
        .bind(&record.query)
        .bind(status_to_db(record.status))
        .bind(record.report.as_ref().map(Json))
        .bind(record.error.as_ref().map(Json))
        .bind(record.processing_ms as i64)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to save analysis", e))?;

        if inserted.rows_affected() == 0 {
            return Err(AnalysisError::Conflict(format!(
                "Analysis {} already recorded",
                record.record_id
            )));
        }
        Ok(())
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<AnalysisRecord>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT record_id, job_id, filename, query, status, report, error, processing_ms, created_at
            FROM analysis_records
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load analysis", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let summary = summary_from_row(&row)?;
        let report: Option<Json<Report>> = row.try_get("report")?;
        let error: Option<Json<ErrorBody>> = row.try_get("error")?;

        Ok(Some(AnalysisRecord {
            record_id: summary.record_id,
            job_id: summary.job_id,
            filename: summary.filename,
            query: summary.query,
            status: summary.status,
            report: report.map(|r| r.0),
            error: error.map(|e| e.0),
            processing_ms: summary.processing_ms,
            created_at: summary.created_at,
        }))
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT record_id, job_id, filename, query, status, processing_ms, created_at
            FROM analysis_records
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list analyses", e))?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn stats(&self) -> Result<SystemStats> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT
              COUNT(*) AS total,
              COUNT(*) FILTER (WHERE created_at > NOW() - INTERVAL '7 days') AS recent,
              COUNT(*) FILTER (WHERE status <> 'error') AS successful,
              COALESCE(AVG(processing_ms), 0)::DOUBLE PRECISION AS average_ms
            FROM analysis_records
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to compute system stats", e))?;

        let total: i64 = row.try_get("total")?;
        let recent: i64 = row.try_get("recent")?;
        let successful: i64 = row.try_get("successful")?;
        let average_ms: f64 = row.try_get("average_ms")?;

        Ok(SystemStats::from_counts(
            total.max(0) as u64,
            recent.max(0) as u64,
            successful.max(0) as u64,
            average_ms,
        ))
    }

    async fn delete_older_than(&self, days: u32) -> Result<u64> {
        let days = interval_days(days)?;
        self.ensure_schema().await?;

        let deleted = sqlx::query(
            "DELETE FROM analysis_records WHERE created_at < NOW() - make_interval(days => $1)",
        )
        .bind(days)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to clean up analyses", e))?;

        Ok(deleted.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_interval_days_rejects_values_past_i32() {
        assert_eq!(interval_days(30).unwrap(), 30);
        assert_eq!(interval_days(i32::MAX as u32).unwrap(), i32::MAX);

        let err = interval_days(u32::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
