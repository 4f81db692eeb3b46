//! Job state persistence
//!
//! Terminal jobs are immutable: every transition below refuses to touch a
//! job that already succeeded or failed.

use crate::error::{AnalysisError, ErrorBody};
use crate::models::{Job, JobState, Report};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<()>;
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>>;
    /// `queued -> running`. False if the job is no longer queued.
    async fn mark_running(&self, job_id: Uuid) -> Result<bool>;
    /// `queued -> failed`. False if the job already left the queue.
    async fn cancel_queued(&self, job_id: Uuid, error: ErrorBody) -> Result<bool>;
    /// Record the terminal outcome. False if the job was already terminal.
    async fn finish(
        &self,
        job_id: Uuid,
        state: JobState,
        result: Option<Report>,
        error: Option<ErrorBody>,
    ) -> Result<bool>;
    /// Drop a terminal job.
    async fn remove(&self, job_id: Uuid) -> Result<bool>;
    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
    async fn counts(&self) -> Result<JobCounts>;
}

/// In-memory job store for development and single-process deployments
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(AnalysisError::Conflict(format!(
                "Job {} already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id, job);
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.state == JobState::Queued => {
                let now = Utc::now();
                job.state = JobState::Running;
                job.started_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_queued(&self, job_id: Uuid, error: ErrorBody) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job_id) {
            Some(job) if job.state == JobState::Queued => {
                let now = Utc::now();
                job.state = JobState::Failed;
                job.error = Some(error);
                job.finished_at = Some(now);
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finish(
        &self,
        job_id: Uuid,
        state: JobState,
        result: Option<Report>,
        error: Option<ErrorBody>,
    ) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(AnalysisError::JobNotFound(job_id))?;

        if job.state.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now();
        job.state = state;
        job.result = result;
        job.error = error;
        job.finished_at = Some(now);
        job.updated_at = now;
        Ok(true)
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&job_id) {
            None => Ok(false),
            Some(job) if !job.state.is_terminal() => Err(AnalysisError::Conflict(format!(
                "Job {} is still {}",
                job_id, job.state
            ))),
            Some(_) => Ok(jobs.remove(&job_id).is_some()),
        }
    }

    async fn purge_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.state.is_terminal() && job.finished_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok(before - jobs.len())
    }

    async fn counts(&self) -> Result<JobCounts> {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
