//! Background worker consuming the job queue

use super::JobRunner;
use crate::config::WorkerConfig;
use crate::error::AnalysisError;
use crate::models::JobState;
use crate::Result;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    JobStarted { job_id: Uuid },
    JobFinished { job_id: Uuid, state: JobState },
    /// The item was dropped because its job had been cancelled or purged.
    JobDiscarded { job_id: Uuid },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to stop taking new items. In-flight jobs finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| AnalysisError::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

pub struct JobWorker {
    runner: JobRunner,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    pub fn new(runner: JobRunner, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            runner,
            config,
            event_tx,
        }
    }

    /// Start the worker and return a handle for control.
    ///
    /// Only `WorkerHandle::shutdown` stops the worker; dropping the handle
    /// detaches it.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            max_concurrent = self.config.max_concurrent_jobs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_jobs.max(1)));
        let mut purge_tick = tokio::time::interval(self.config.purge_interval);
        purge_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks = JoinSet::new();
        let queue = self.runner.queue().clone();

        loop {
            // Reserve capacity first so priority order holds at dequeue time.
            let permit = tokio::select! {
                Some(()) = shutdown_rx.recv() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let item = tokio::select! {
                Some(()) = shutdown_rx.recv() => break,
                _ = purge_tick.tick() => {
                    if let Err(e) = self.runner.purge_expired().await {
                        error!(error = %e, "Failed to purge expired jobs");
                    }
                    continue;
                }
                item = queue.recv() => item,
            };

            let runner = self.runner.clone();
            let events = self.event_tx.clone();
            tasks.spawn(async move {
                let job_id = item.job_id;
                let _ = events.send(WorkerEvent::JobStarted { job_id });
                let event = match runner.execute(item).await {
                    Some(state) => WorkerEvent::JobFinished { job_id, state },
                    None => WorkerEvent::JobDiscarded { job_id },
                };
                let _ = events.send(event);
                drop(permit);
            });

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = ?e, "Job task panicked");
                }
            }
        }

        debug!(in_flight = tasks.len(), "Waiting for in-flight jobs");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Job task panicked");
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::jobs::tests::{runner, upload};
    use crate::models::{JobPriority, ReportStatus};
    use crate::steps::tests::FINANCIAL_TEXT;
    use std::time::Duration;

    async fn wait_terminal(runner: &JobRunner, job_id: Uuid) -> crate::models::Job {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = runner.poll(job_id).await.unwrap();
                if job.state.is_terminal() {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_worker_completes_job_and_result_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);

        let stored = upload(&runner).await;
        let path = stored.path().to_path_buf();
        let job_id = runner
            .submit(stored, Some("What are the key risks?".into()), JobPriority::High)
            .await
            .unwrap();
        assert_eq!(runner.poll(job_id).await.unwrap().state, JobState::Queued);

        let handle = JobWorker::new(runner.clone(), WorkerConfig::default()).start();
        let done = wait_terminal(&runner, job_id).await;

        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(done.result.as_ref().unwrap().status, ReportStatus::Success);
        assert_eq!(runner.poll(job_id).await.unwrap(), done);
        assert_eq!(runner.poll(job_id).await.unwrap(), done);
        assert!(!path.exists(), "worker removes the queued document");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_verification_failure_marks_job_failed_with_report() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), "not a financial document", Duration::ZERO);
        let handle = JobWorker::new(runner.clone(), WorkerConfig::default()).start();

        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();
        let done = wait_terminal(&runner, job_id).await;

        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error.unwrap().kind, ErrorKind::VerificationFailed);
        assert_eq!(done.result.unwrap().status, ReportStatus::Error);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_running_job_cancelled_at_step_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::from_millis(200));
        let handle = JobWorker::new(runner.clone(), WorkerConfig::default()).start();
        let mut events = handle.events();

        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();

        loop {
            if let WorkerEvent::JobStarted { job_id: started } = events.recv().await.unwrap() {
                if started == job_id {
                    break;
                }
            }
        }
        // wait for the claim to land before cancelling
        tokio::time::timeout(Duration::from_secs(1), async {
            while runner.poll(job_id).await.unwrap().state != JobState::Running {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        runner.cancel(job_id).await.unwrap();
        let done = wait_terminal(&runner, job_id).await;

        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.error.unwrap().kind, ErrorKind::Cancelled);
        assert!(done.result.is_some(), "partial report kept");

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_worker_running() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);
        drop(JobWorker::new(runner.clone(), WorkerConfig::default()).start());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();

        let done = wait_terminal(&runner, job_id).await;
        assert_eq!(done.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn test_disabled_worker_leaves_jobs_queued() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(dir.path(), FINANCIAL_TEXT, Duration::ZERO);
        let _handle = JobWorker::new(
            runner.clone(),
            WorkerConfig::default().with_enabled(false),
        )
        .start();

        let job_id = runner
            .submit(upload(&runner).await, None, JobPriority::Normal)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.poll(job_id).await.unwrap().state, JobState::Queued);
    }
}
