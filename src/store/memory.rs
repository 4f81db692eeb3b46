use super::{AnalysisStore, AnalysisSummary, SystemStats};
use crate::error::AnalysisError;
use crate::models::{AnalysisRecord, ReportStatus};
use crate::Result;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub struct InMemoryAnalysisStore {
    records: Arc<RwLock<HashMap<Uuid, AnalysisRecord>>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn save(&self, record: AnalysisRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.record_id) {
            return Err(AnalysisError::Conflict(format!(
                "Analysis {} already recorded",
                record.record_id
            )));
        }
        records.insert(record.record_id, record);
        Ok(())
    }

    async fn get(&self, record_id: Uuid) -> Result<Option<AnalysisRecord>> {
        Ok(self.records.read().await.get(&record_id).cloned())
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisSummary>> {
        let records = self.records.read().await;
        let mut sorted: Vec<&AnalysisRecord> = records.values().collect();
        sorted.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(sorted
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(AnalysisSummary::from)
            .collect())
    }

    async fn stats(&self) -> Result<SystemStats> {
        let records = self.records.read().await;
        let week_ago = Utc::now() - Duration::days(7);

        let total = records.len() as u64;
        let recent = records.values().filter(|r| r.created_at > week_ago).count() as u64;
        let successful = records
            .values()
            .filter(|r| r.status != ReportStatus::Error)
            .count() as u64;
        let average_ms = if total > 0 {
            records.values().map(|r| r.processing_ms as f64).sum::<f64>() / total as f64
        } else {
            0.0
        };

        Ok(SystemStats::from_counts(total, recent, successful, average_ms))
    }

    async fn delete_older_than(&self, days: u32) -> Result<u64> {
        // A cutoff before the representable past matches nothing.
        let Some(cutoff) = Utc::now().checked_sub_signed(Duration::days(days as i64)) else {
            return Ok(0);
        };
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorBody, ErrorKind};
    use tokio_test::assert_err;

    fn record(status: ReportStatus, processing_ms: u64, age_days: i64) -> AnalysisRecord {
        AnalysisRecord {
            record_id: Uuid::new_v4(),
            job_id: None,
            filename: "a.pdf".into(),
            query: "q".into(),
            status,
            report: None,
            error: (status == ReportStatus::Error)
                .then(|| ErrorBody::new(ErrorKind::VerificationFailed, "unreadable")),
            processing_ms,
            created_at: Utc::now() - Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_save_is_write_once() {
        let store = InMemoryAnalysisStore::new();
        let r = record(ReportStatus::Success, 10, 0);
        store.save(r.clone()).await.unwrap();
        assert_err!(store.save(r.clone()).await);
        assert_eq!(store.get(r.record_id).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_paging() {
        let store = InMemoryAnalysisStore::new();
        let old = record(ReportStatus::Success, 10, 3);
        let new = record(ReportStatus::Partial, 10, 0);
        store.save(old.clone()).await.unwrap();
        store.save(new.clone()).await.unwrap();

        let page = store.list(10, 0).await.unwrap();
        assert_eq!(page[0].record_id, new.record_id);
        assert_eq!(page[1].record_id, old.record_id);

        let second = store.list(1, 1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].record_id, old.record_id);
    }

    #[tokio::test]
    async fn test_stats_and_cleanup() {
        let store = InMemoryAnalysisStore::new();
        store.save(record(ReportStatus::Success, 100, 0)).await.unwrap();
        store.save(record(ReportStatus::Error, 300, 0)).await.unwrap();
        store.save(record(ReportStatus::Partial, 200, 40)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_analyses, 3);
        assert_eq!(stats.recent_analyses, 2);
        assert_eq!(stats.successful_analyses, 2);
        assert_eq!(stats.failed_analyses, 1);
        assert!((stats.average_processing_ms - 200.0).abs() < 1e-9);

        assert_eq!(store.delete_older_than(30).await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().total_analyses, 2);
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_age_deletes_nothing() {
        let store = InMemoryAnalysisStore::new();
        store.save(record(ReportStatus::Success, 100, 400)).await.unwrap();

        assert_eq!(store.delete_older_than(u32::MAX).await.unwrap(), 0);
        assert_eq!(store.stats().await.unwrap().total_analyses, 1);
    }
}
