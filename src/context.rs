//! Per-run analysis context
//!
//! One context per pipeline run, never shared across runs. The extracted
//! text is set once and the step log is append-only.

use crate::document::Document;
use crate::error::AnalysisError;
use crate::models::{StepId, StepPayload, StepResult};
use crate::tools::{ToolError, ToolRegistry};
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;
use uuid::Uuid;

pub struct AnalysisContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    document: Arc<Document>,
    query: String,
    text: OnceCell<String>,
    log: RwLock<Vec<StepResult>>,
}

impl AnalysisContext {
    /// A blank query falls back to `default_query`.
    pub fn new(document: Arc<Document>, query: Option<&str>, default_query: &str) -> Self {
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(default_query)
            .to_string();

        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            document,
            query,
            text: OnceCell::new(),
            log: RwLock::new(Vec::new()),
        }
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Extracted document text, fetched through the registry on first use.
    ///
    /// Concurrent callers wait on the same extraction; a failed extraction
    /// leaves the cell empty.
    pub async fn text(&self, tools: &ToolRegistry) -> std::result::Result<&str, ToolError> {
        let text = self
            .text
            .get_or_try_init(|| async {
                debug!(run_id = %self.run_id, "Extracting document text");
                tools.extract_text(self.document.clone()).await
            })
            .await?;
        Ok(text.as_str())
    }

    /// Text if it has already been extracted.
    pub fn cached_text(&self) -> Option<&str> {
        self.text.get().map(String::as_str)
    }

    /// Record a step's terminal result. Each step is recorded once.
    pub async fn append(&self, result: StepResult) -> Result<()> {
        let mut log = self.log.write().await;
        if log.iter().any(|r| r.step == result.step) {
            return Err(AnalysisError::Internal(format!(
                "Step {} already recorded for run {}",
                result.step, self.run_id
            )));
        }
        log.push(result);
        Ok(())
    }

    pub async fn result_for(&self, step: StepId) -> Option<StepResult> {
        self.log.read().await.iter().find(|r| r.step == step).cloned()
    }

    /// Payload of a step that finished ok.
    pub async fn payload_for(&self, step: StepId) -> Option<StepPayload> {
        self.result_for(step)
            .await
            .filter(StepResult::is_ok)
            .and_then(|r| r.payload)
    }

    pub async fn is_recorded(&self, step: StepId) -> bool {
        self.log.read().await.iter().any(|r| r.step == step)
    }

    /// Copy of the log in completion order.
    pub async fn snapshot(&self) -> Vec<StepResult> {
        self.log.read().await.clone()
    }
}
