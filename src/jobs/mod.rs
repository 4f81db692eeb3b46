//! Job runner: inline and queued execution of the same pipeline
//!
//! `run_sync` drives a pipeline run on the caller's task. `submit` writes a
//! self-contained work item to the queue, and the worker later executes it
//! through the exact same `Pipeline::run_with`.

use crate::document::{DocumentSource, StoredDocument};
use crate::error::{AnalysisError, ErrorBody, ErrorKind};
use crate::models::{AnalysisRecord, AnalysisResponse, Job, JobPriority, JobState, Report};
use crate::pipeline::{Pipeline, RunOptions};
use crate::store::AnalysisStore;
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod queue;
pub mod store;
pub mod worker;

pub use queue::{JobQueue, QueueDepth, WorkItem};
pub use store::{InMemoryJobStore, JobCounts, JobStore};
pub use worker::{JobWorker, WorkerEvent, WorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub queued: QueueDepth,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct JobRunner {
    pipeline: Arc<Pipeline>,
    documents: DocumentSource,
    jobs: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
    analyses: Option<Arc<dyn AnalysisStore>>,
    running: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    retention: Duration,
}

impl JobRunner {
    pub fn new(pipeline: Arc<Pipeline>, documents: DocumentSource) -> Self {
        Self {
            pipeline,
            documents,
            jobs: Arc::new(InMemoryJobStore::new()),
            queue: Arc::new(JobQueue::new()),
            analyses: None,
            running: Arc::new(RwLock::new(HashMap::new())),
            retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_analysis_store(mut self, store: Arc<dyn AnalysisStore>) -> Self {
        self.analyses = Some(store);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn documents(&self) -> &DocumentSource {
        &self.documents
    }

    pub fn analyses(&self) -> Option<&Arc<dyn AnalysisStore>> {
        self.analyses.as_ref()
    }

    pub(crate) fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Run inline. The stored document is released when this returns or
    /// when the future is dropped.
    pub async fn run_sync(
        &self,
        stored: StoredDocument,
        query: Option<&str>,
        cancel: CancellationToken,
    ) -> AnalysisResponse {
        let started = Instant::now();
        let document = stored.document().clone();

        let result = self
            .pipeline
            .run_with(document.clone(), query, RunOptions::cancellable(cancel))
            .await;
        drop(stored);

        let response = self.respond(result, None);
        self.persist(&response, None, &document.filename, query, started)
            .await;
        response
    }

    /// Queue a run and return its job id.
    pub async fn submit(
        &self,
        stored: StoredDocument,
        query: Option<String>,
        priority: JobPriority,
    ) -> Result<Uuid> {
        self.pipeline.validate_query(query.as_deref())?;

        let job_id = Uuid::new_v4();
        let filename = stored.document().filename.clone();
        let effective_query = query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.pipeline.config().default_query)
            .to_string();

        self.jobs
            .insert(Job::queued(job_id, priority, filename.clone(), effective_query))
            .await?;

        let item = WorkItem {
            job_id,
            priority,
            document: stored.into_handle(),
            query,
            enqueued_at: Utc::now(),
        };

        if let Err(e) = self.queue.push(&item).await {
            error!(job_id = %job_id, error = %e, "Failed to enqueue work item");
            let body = ErrorBody::new(ErrorKind::InternalError, "Job could not be queued");
            self.jobs.cancel_queued(job_id, body).await?;
            item.document.discard();
            return Err(e);
        }

        info!(job_id = %job_id, filename = %filename, ?priority, "Analysis job queued");
        Ok(job_id)
    }

    /// Current job snapshot. Idempotent.
    pub async fn poll(&self, job_id: Uuid) -> Result<Job> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or(AnalysisError::JobNotFound(job_id))
    }

    /// Cancel a job. Queued jobs fail immediately; running jobs stop at the
    /// next step boundary.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job> {
        let body = ErrorBody::new(ErrorKind::Cancelled, "Job cancelled by request");

        if self.jobs.cancel_queued(job_id, body).await? {
            if let Some(item) = self.queue.remove(job_id).await {
                item.document.discard();
            }
            info!(job_id = %job_id, "Queued job cancelled");
            return self.poll(job_id).await;
        }

        let job = self.poll(job_id).await?;
        match job.state {
            JobState::Running => {
                if let Some(token) = self.running.read().await.get(&job_id) {
                    token.cancel();
                    info!(job_id = %job_id, "Cancellation requested for running job");
                }
                Ok(job)
            }
            _ => Err(AnalysisError::Conflict(format!(
                "Job {} already {}",
                job_id, job.state
            ))),
        }
    }

    /// Drop a finished job.
    pub async fn purge(&self, job_id: Uuid) -> Result<()> {
        if self.jobs.remove(job_id).await? {
            Ok(())
        } else {
            Err(AnalysisError::JobNotFound(job_id))
        }
    }

    /// Drop finished jobs older than the retention window.
    pub async fn purge_expired(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.retention)
            .map_err(|e| AnalysisError::Config(format!("Invalid retention: {}", e)))?;
        let purged = self.jobs.purge_finished_before(Utc::now() - retention).await?;
        if purged > 0 {
            info!(purged, "Purged expired jobs");
        }
        Ok(purged)
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let counts = self.jobs.counts().await?;
        Ok(QueueStats {
            queued: self.queue.depth().await,
            running: counts.running,
            succeeded: counts.succeeded,
            failed: counts.failed,
        })
    }

    /// Execute one dequeued work item. Returns the terminal state it
    /// recorded, or `None` if the job was no longer runnable.
    pub(crate) async fn execute(&self, item: WorkItem) -> Option<JobState> {
        let job_id = item.job_id;

        // Token goes in before the claim so a cancel never sees a running
        // job without one.
        let token = CancellationToken::new();
        self.running.write().await.insert(job_id, token.clone());

        let claimed = match self.jobs.mark_running(job_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to claim job");
                false
            }
        };
        if !claimed {
            self.running.write().await.remove(&job_id);
            info!(job_id = %job_id, "Job no longer queued, discarding work item");
            item.document.discard();
            return None;
        }

        let started = Instant::now();
        let filename = item.document.filename.clone();

        let response = match self.documents.open_handle(item.document).await {
            Ok(stored) => {
                let result = self
                    .pipeline
                    .run_with(
                        stored.document().clone(),
                        item.query.as_deref(),
                        RunOptions::at_step_boundary(token),
                    )
                    .await;
                drop(stored);
                self.respond(result, Some(job_id))
            }
            Err(e) => self.respond(Err(e), Some(job_id)),
        };

        self.running.write().await.remove(&job_id);

        let state = if response.error.is_none() {
            JobState::Succeeded
        } else {
            JobState::Failed
        };

        match self
            .jobs
            .finish(job_id, state, response.report.clone(), response.error.clone())
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(job_id = %job_id, "Job already terminal, result dropped"),
            Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job result"),
        }

        self.persist(
            &response,
            Some(job_id),
            &filename,
            item.query.as_deref(),
            started,
        )
        .await;

        info!(job_id = %job_id, state = %state, "Analysis job finished");
        Some(state)
    }

    fn respond(&self, result: Result<Report>, job_id: Option<Uuid>) -> AnalysisResponse {
        if let Err(e) = &result {
            match e.kind() {
                ErrorKind::InternalError => {
                    error!(job_id = ?job_id, error = ?e, "Analysis failed with internal error")
                }
                kind => warn!(job_id = ?job_id, %kind, error = %e, "Analysis did not complete"),
            }
        }
        AnalysisResponse::from(result)
    }

    /// Emit the finished run to the analysis store, if any.
    async fn persist(
        &self,
        response: &AnalysisResponse,
        job_id: Option<Uuid>,
        filename: &str,
        query: Option<&str>,
        started: Instant,
    ) {
        let Some(store) = &self.analyses else {
            return;
        };
        if matches!(&response.error, Some(e) if e.kind == ErrorKind::ValidationError) {
            return;
        }

        let query = response
            .report
            .as_ref()
            .map(|r| r.query.clone())
            .or_else(|| query.map(str::to_string))
            .unwrap_or_else(|| self.pipeline.config().default_query.clone());
        let record = AnalysisRecord::from_response(
            response,
            job_id,
            filename,
            &query,
            started.elapsed().as_millis() as u64,
        );

        if let Err(e) = store.save(record).await {
            warn!(job_id = ?job_id, error = %e, "Failed to persist analysis record");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{DocumentConfig, PipelineConfig};
    use crate::models::ReportStatus;
    use crate::steps::tests::FINANCIAL_TEXT;
    use crate::store::InMemoryAnalysisStore;
    use crate::tools::{MockTool, ToolKind, ToolRegistry};
    use std::path::Path;

    pub(crate) fn runner(dir: &Path, extract_text: &str, reason_delay: Duration) -> JobRunner {
        let tools = ToolRegistry::builder()
            .register(Arc::new(MockTool::text(ToolKind::ExtractText, extract_text)))
            .register(Arc::new(MockTool::search(ToolKind::WebSearch, vec![])))
            .register(Arc::new(
                MockTool::text(ToolKind::Reason, "analysis").with_delay(reason_delay),
            ))
            .build()
            .unwrap();
        let pipeline = Arc::new(Pipeline::new(Arc::new(tools), PipelineConfig::default()));
        let documents = DocumentSource::new(DocumentConfig::default().with_data_dir(dir));
        JobRunner::new(pipeline, documents)
    }

    pub(crate) async fn upload(runner: &JobRunner) -> StoredDocument {
        runner
            .documents()
            .accept_upload("acme.pdf", Some("application/pdf"), b"%PDF-1.4 acme".to_vec())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_sync_persists_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryAnalysisStore::new());
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO)
            .with_analysis_store(store.clone());

        let stored = upload(&runner).await;
        let path = stored.path().to_path_buf();

        let response = runner
            .run_sync(stored, Some("What are the key risks?"), CancellationToken::new())
            .await;

        assert_eq!(response.status, ReportStatus::Success);
        assert!(!path.exists(), "temporary upload removed after the run");

        let run_id = response.report.unwrap().run_id;
        let record = store.get(run_id).await.unwrap().unwrap();
        assert_eq!(record.query, "What are the key risks?");
        assert_eq!(record.filename, "acme.pdf");
    }

    #[tokio::test]
    async fn test_verification_failure_response() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "blank", Duration::ZERO);

        let response = runner
            .run_sync(upload(&runner).await, None, CancellationToken::new())
            .await;

        assert_eq!(response.status, ReportStatus::Error);
        assert_eq!(response.error.unwrap().kind, ErrorKind::VerificationFailed);
        assert_eq!(response.report.unwrap().sections.len(), 4);
    }

    #[tokio::test]
    async fn test_poll_before_pickup_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);

        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();

        let first = runner.poll(job_id).await.unwrap();
        let second = runner.poll(job_id).await.unwrap();
        assert_eq!(first.state, JobState::Queued);
        assert_eq!(first, second);
        assert_eq!(first.query, crate::config::DEFAULT_QUERY);

        let stats = runner.queue_stats().await.unwrap();
        assert_eq!(stats.queued.normal, 1);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);

        let stored = upload(&runner).await;
        let path = stored.path().to_path_buf();
        let job_id = runner
            .submit(stored, Some("q".into()), JobPriority::Low)
            .await
            .unwrap();
        assert!(path.exists(), "queued document kept for the worker");

        let job = runner.cancel(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(!path.exists());
        assert_eq!(runner.queue_stats().await.unwrap().queued.total(), 0);

        // terminal jobs cannot be cancelled again, but can be purged
        assert!(matches!(
            runner.cancel(job_id).await,
            Err(AnalysisError::Conflict(_))
        ));
        runner.purge(job_id).await.unwrap();
        assert!(matches!(
            runner.poll(job_id).await,
            Err(AnalysisError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_long_query() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);

        let err = runner
            .submit(upload(&runner).await, Some("x".repeat(5000)), JobPriority::High)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_purge_expired_respects_retention() {
        let dir = tempfile::tempdir().unwrap();
        let runner =
            runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO).with_retention(Duration::ZERO);

        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();
        runner.cancel(job_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(runner.purge_expired().await.unwrap(), 1);
    }
}
