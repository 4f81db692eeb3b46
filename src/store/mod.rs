//! Persistence of finished analyses
//!
//! Every finished run is written once. In-memory for development,
//! Postgres when `DATABASE_URL` is configured.

use crate::models::{AnalysisRecord, ReportStatus};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryAnalysisStore;
pub use postgres::PgAnalysisStore;

/// Listing view of a record without the report body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisSummary {
    pub record_id: Uuid,
    pub job_id: Option<Uuid>,
    pub filename: String,
    pub query: String,
    pub status: ReportStatus,
    pub processing_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl From<&AnalysisRecord> for AnalysisSummary {
    fn from(record: &AnalysisRecord) -> Self {
        Self {
            record_id: record.record_id,
            job_id: record.job_id,
            filename: record.filename.clone(),
            query: record.query.clone(),
            status: record.status,
            processing_ms: record.processing_ms,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    pub total_analyses: u64,
    /// Analyses created in the last seven days.
    pub recent_analyses: u64,
    /// Runs that produced a report (success or partial).
    pub successful_analyses: u64,
    pub failed_analyses: u64,
    /// Percentage of successful runs.
    pub success_rate: f64,
    pub average_processing_ms: f64,
}

impl SystemStats {
    pub fn from_counts(total: u64, recent: u64, successful: u64, average_ms: f64) -> Self {
        let success_rate = if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_analyses: total,
            recent_analyses: recent,
            successful_analyses: successful,
            failed_analyses: total.saturating_sub(successful),
            success_rate,
            average_processing_ms: average_ms,
        }
    }
}

#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Write-once; a duplicate id is a conflict.
    async fn save(&self, record: AnalysisRecord) -> Result<()>;
    async fn get(&self, record_id: Uuid) -> Result<Option<AnalysisRecord>>;
    /// Newest first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>>;
    async fn stats(&self) -> Result<SystemStats>;
    /// Delete records created more than `days` days ago.
    async fn delete_older_than(&self, days: u32) -> Result<u64>;
}

/// Postgres when a database URL is given and usable, in-memory otherwise.
pub fn build_store(database_url: Option<&str>) -> Arc<dyn AnalysisStore> {
    if let Some(url) = database_url {
        match PgAnalysisStore::connect_lazy(url) {
            Ok(store) => {
                info!("Analysis store backend: postgres");
                return Arc::new(store);
            }
            Err(e) => warn!(
                "Failed to initialize postgres analysis store, falling back to in-memory: {}",
                e
            ),
        }
    }

    info!("Analysis store backend: in-memory");
    Arc::new(InMemoryAnalysisStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_from_counts() {
        let stats = SystemStats::from_counts(4, 2, 3, 120.0);
        assert_eq!(stats.failed_analyses, 1);
        assert!((stats.success_rate - 75.0).abs() < f64::EPSILON);

        let empty = SystemStats::from_counts(0, 0, 0, 0.0);
        assert_eq!(empty.success_rate, 0.0);
    }
}
