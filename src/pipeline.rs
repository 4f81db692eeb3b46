//! Analysis pipeline
//!
//! Runs the steps in dependency levels over one context. Steps in the same
//! level run concurrently. Only the verification gate can turn a run into
//! an error report; every other failure degrades to a partial report.

use crate::config::{PipelineConfig, MAX_STEP_ATTEMPTS};
use crate::context::AnalysisContext;
use crate::document::Document;
use crate::error::{AnalysisError, ErrorBody, ErrorKind};
use crate::models::{Report, StepId, StepResult};
use crate::report;
use crate::steps::{default_steps, AnalysisStep};
use crate::tools::ToolRegistry;
use crate::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

/// How a run reacts to its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CancelMode {
    /// Abandon in-flight tool calls as soon as the token fires.
    #[default]
    Immediate,
    /// Finish the current level, then stop.
    AtStepBoundary,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub cancel: CancellationToken,
    pub mode: CancelMode,
}

impl RunOptions {
    pub fn cancellable(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            mode: CancelMode::Immediate,
        }
    }

    pub fn at_step_boundary(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            mode: CancelMode::AtStepBoundary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunEnd {
    Completed,
    BudgetExhausted,
    Cancelled,
}

pub struct Pipeline {
    tools: Arc<ToolRegistry>,
    config: PipelineConfig,
    steps: Vec<Arc<dyn AnalysisStep>>,
    levels: Vec<Vec<usize>>,
}

impl Pipeline {
    pub fn new(tools: Arc<ToolRegistry>, config: PipelineConfig) -> Self {
        let steps = default_steps(&config);
        Self::with_steps(tools, config, steps)
    }

    pub fn with_steps(
        tools: Arc<ToolRegistry>,
        config: PipelineConfig,
        steps: Vec<Arc<dyn AnalysisStep>>,
    ) -> Self {
        let levels = plan_levels(&steps);
        Self {
            tools,
            config,
            steps,
            levels,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Reject queries over the configured length before any work starts.
    pub fn validate_query(&self, query: Option<&str>) -> Result<()> {
        let chars = query.map(|q| q.trim().chars().count()).unwrap_or(0);
        if chars > self.config.max_query_chars {
            return Err(AnalysisError::Validation(format!(
                "Query must be at most {} characters, got {}",
                self.config.max_query_chars, chars
            )));
        }
        Ok(())
    }

    pub async fn run(&self, document: Arc<Document>, query: Option<&str>) -> Result<Report> {
        self.run_with(document, query, RunOptions::default()).await
    }

    /// Run every step over `document`.
    ///
    /// Returns `AnalysisError::Cancelled` with the partial report when the
    /// token fires; budget expiry returns a report with `partial` set.
    pub async fn run_with(
        &self,
        document: Arc<Document>,
        query: Option<&str>,
        options: RunOptions,
    ) -> Result<Report> {
        self.validate_query(query)?;

        let ctx = AnalysisContext::new(document, query, &self.config.default_query);
        let span = info_span!("pipeline", run_id = %ctx.run_id);

        async {
            info!(
                filename = %ctx.document().filename,
                size = ctx.document().size(),
                "Pipeline run started"
            );

            let deadline = Instant::now() + self.config.budget;
            let end = self.drive(&ctx, &options, deadline).await;

            let pending_reason = match end {
                RunEnd::Completed => "Dependencies never completed",
                RunEnd::BudgetExhausted => "Run budget exhausted before this step started",
                RunEnd::Cancelled => "Run cancelled before this step started",
            };
            for step in &self.steps {
                if !ctx.is_recorded(step.id()).await {
                    self.record(&ctx, StepResult::skipped(step.id(), pending_reason))
                        .await;
                }
            }

            let report = report::assemble(&ctx, end == RunEnd::BudgetExhausted).await;

            info!(
                status = %report.status,
                partial = report.partial,
                duration_ms = report.duration_ms,
                "Pipeline run finished"
            );

            match end {
                RunEnd::Cancelled => Err(AnalysisError::Cancelled {
                    report: Box::new(report),
                }),
                _ => Ok(report),
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        ctx: &AnalysisContext,
        options: &RunOptions,
        deadline: Instant,
    ) -> RunEnd {
        for level in &self.levels {
            if options.cancel.is_cancelled() {
                info!("Cancellation observed at step boundary");
                return RunEnd::Cancelled;
            }
            if Instant::now() >= deadline {
                return RunEnd::BudgetExhausted;
            }

            let mut runnable = Vec::with_capacity(level.len());
            for &idx in level {
                let step = &self.steps[idx];
                match self.unmet_dependency(ctx, step.as_ref()).await {
                    Some(dep) => {
                        warn!(step = %step.id(), dependency = %dep, "Skipping step due to unmet dependency");
                        let reason = format!("Requires {} which did not complete", dep.title());
                        self.record(ctx, StepResult::skipped(step.id(), reason)).await;
                    }
                    None => runnable.push(step.clone()),
                }
            }

            if runnable.is_empty() {
                continue;
            }

            let started_at = Utc::now();
            let attempts: Vec<AtomicU32> = runnable.iter().map(|_| AtomicU32::new(0)).collect();
            let in_flight = join_all(
                runnable
                    .iter()
                    .zip(&attempts)
                    .map(|(step, counter)| self.run_step(ctx, step.as_ref(), counter)),
            );

            let interrupted = tokio::select! {
                _ = in_flight => None,
                _ = tokio::time::sleep_until(deadline) => Some(RunEnd::BudgetExhausted),
                _ = cancelled_immediately(options) => Some(RunEnd::Cancelled),
            };

            if let Some(end) = interrupted {
                let body = match end {
                    RunEnd::Cancelled => {
                        ErrorBody::new(ErrorKind::Cancelled, "Run cancelled while step was running")
                    }
                    _ => ErrorBody::new(
                        ErrorKind::Timeout,
                        format!(
                            "Run budget of {}s exceeded while step was running",
                            self.config.budget.as_secs()
                        ),
                    ),
                };

                for (step, counter) in runnable.iter().zip(&attempts) {
                    if !ctx.is_recorded(step.id()).await {
                        let result = StepResult::failed(
                            step.id(),
                            body.clone(),
                            counter.load(Ordering::SeqCst),
                            started_at,
                        );
                        self.record(ctx, result).await;
                    }
                }
                return end;
            }
        }

        RunEnd::Completed
    }

    async fn unmet_dependency(
        &self,
        ctx: &AnalysisContext,
        step: &dyn AnalysisStep,
    ) -> Option<StepId> {
        for dep in step.dependencies() {
            let ok = ctx
                .result_for(*dep)
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false);
            if !ok {
                return Some(*dep);
            }
        }
        None
    }

    /// Execute one step with the retry policy and record its result.
    async fn run_step(&self, ctx: &AnalysisContext, step: &dyn AnalysisStep, attempts: &AtomicU32) {
        let id = step.id();
        let started_at: DateTime<Utc> = Utc::now();
        let max_attempts = self.config.max_step_attempts.clamp(1, MAX_STEP_ATTEMPTS);

        let result = loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let span = info_span!("step", step = %id, attempt);

            match step.execute(ctx, &self.tools).instrument(span).await {
                Ok(payload) => {
                    info!(step = %id, attempt, degraded = payload.degraded, "Step succeeded");
                    break StepResult::succeeded(id, payload, attempt, started_at);
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(step = %id, attempt, error = %e, "Transient step failure, retrying");
                }
                Err(e) => {
                    warn!(step = %id, attempt, error = %e, "Step failed");
                    break StepResult::failed(id, e.to_body(), attempt, started_at);
                }
            }
        };

        self.record(ctx, result).await;
    }

    async fn record(&self, ctx: &AnalysisContext, result: StepResult) {
        if let Err(e) = ctx.append(result).await {
            error!(error = %e, "Failed to record step result");
        }
    }
}

async fn cancelled_immediately(options: &RunOptions) {
    match options.mode {
        CancelMode::Immediate => options.cancel.cancelled().await,
        CancelMode::AtStepBoundary => std::future::pending().await,
    }
}

/// Group steps into levels; each level only depends on earlier ones.
///
/// Steps whose dependencies never resolve end up in a final level and are
/// skipped at run time.
fn plan_levels(steps: &[Arc<dyn AnalysisStep>]) -> Vec<Vec<usize>> {
    let mut placed: HashSet<StepId> = HashSet::new();
    let mut remaining: Vec<usize> = (0..steps.len()).collect();
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining.iter().copied().partition(|&idx| {
            steps[idx]
                .dependencies()
                .iter()
                .all(|dep| placed.contains(dep))
        });

        if ready.is_empty() {
            levels.push(blocked);
            break;
        }

        placed.extend(ready.iter().map(|&idx| steps[idx].id()));
        levels.push(ready);
        remaining = blocked;
    }

    levels
}
