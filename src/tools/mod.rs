//! Tool trait and registry
//!
//! The tool set is closed: one slot per `ToolKind`, all filled when the
//! registry is built. Failures come back as `ToolError` values; the calling
//! step decides whether they are fatal.

use crate::document::Document;
use crate::error::AnalysisError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub mod mock;
pub mod pdf;
pub mod reasoning;
pub mod search;

pub use mock::MockTool;
pub use pdf::PdfTextTool;
pub use reasoning::GeminiReasoningTool;
pub use search::SerperSearchTool;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    ExtractText,
    WebSearch,
    Reason,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::ExtractText, ToolKind::WebSearch, ToolKind::Reason];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::ExtractText => "extract_text",
            ToolKind::WebSearch => "web_search",
            ToolKind::Reason => "reason",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for one tool invocation.
#[derive(Debug, Clone)]
pub enum ToolCall {
    ExtractText { document: Arc<Document> },
    WebSearch { query: String },
    Reason { prompt: String, context: String },
}

impl ToolCall {
    pub fn kind(&self) -> ToolKind {
        match self {
            ToolCall::ExtractText { .. } => ToolKind::ExtractText,
            ToolCall::WebSearch { .. } => ToolKind::WebSearch,
            ToolCall::Reason { .. } => ToolKind::Reason,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Text(String),
    SearchResults(Vec<SearchHit>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Unavailable,
    Timeout,
    InvalidInput,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Unavailable, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidInput, message)
    }

    /// Transport-level failures that are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ToolErrorKind::Unavailable | ToolErrorKind::Timeout)
    }

    /// Map an HTTP client failure onto the tool error kinds.
    pub fn from_http(service: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ToolError::timeout(format!("{} request timed out: {}", service, err))
        } else if err.is_builder() {
            ToolError::invalid_input(format!("{} request invalid: {}", service, err))
        } else {
            ToolError::unavailable(format!("{} request failed: {}", service, err))
        }
    }

    /// Map a non-success HTTP status onto the tool error kinds.
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("{} returned {}: {}", service, status, body);
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            ToolError::timeout(message)
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            ToolError::unavailable(message)
        } else {
            ToolError::invalid_input(message)
        }
    }
}

/// A single external capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn call(&self, call: ToolCall) -> std::result::Result<ToolOutput, ToolError>;
}

/// Shared, immutable set of tools. Safe for concurrent use by many runs.
pub struct ToolRegistry {
    extract_text: Arc<dyn Tool>,
    web_search: Arc<dyn Tool>,
    reason: Arc<dyn Tool>,
    call_timeout: Duration,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn get(&self, kind: ToolKind) -> &Arc<dyn Tool> {
        match kind {
            ToolKind::ExtractText => &self.extract_text,
            ToolKind::WebSearch => &self.web_search,
            ToolKind::Reason => &self.reason,
        }
    }

    pub fn list(&self) -> Vec<(ToolKind, &'static str)> {
        ToolKind::ALL
            .iter()
            .map(|kind| (*kind, self.get(*kind).name()))
            .collect()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn invoke(&self, call: ToolCall) -> std::result::Result<ToolOutput, ToolError> {
        let kind = call.kind();
        let tool = self.get(kind);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.call_timeout, tool.call(call)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::timeout(format!(
                "{} exceeded {}s",
                tool.name(),
                self.call_timeout.as_secs()
            ))),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(tool = %kind, elapsed_ms, "Tool call succeeded"),
            Err(e) => warn!(tool = %kind, elapsed_ms, error = %e, "Tool call failed"),
        }

        result
    }

    pub async fn extract_text(
        &self,
        document: Arc<Document>,
    ) -> std::result::Result<String, ToolError> {
        match self.invoke(ToolCall::ExtractText { document }).await? {
            ToolOutput::Text(text) => Ok(text),
            other => Err(unexpected_output(ToolKind::ExtractText, &other)),
        }
    }

    pub async fn web_search(&self, query: &str) -> std::result::Result<Vec<SearchHit>, ToolError> {
        let call = ToolCall::WebSearch {
            query: query.to_string(),
        };
        match self.invoke(call).await? {
            ToolOutput::SearchResults(hits) => Ok(hits),
            other => Err(unexpected_output(ToolKind::WebSearch, &other)),
        }
    }

    pub async fn reason(
        &self,
        prompt: &str,
        context: &str,
    ) -> std::result::Result<String, ToolError> {
        let call = ToolCall::Reason {
            prompt: prompt.to_string(),
            context: context.to_string(),
        };
        match self.invoke(call).await? {
            ToolOutput::Text(text) => Ok(text),
            other => Err(unexpected_output(ToolKind::Reason, &other)),
        }
    }
}

fn unexpected_output(kind: ToolKind, output: &ToolOutput) -> ToolError {
    let got = match output {
        ToolOutput::Text(_) => "text",
        ToolOutput::SearchResults(_) => "search results",
    };
    ToolError::unavailable(format!("{} tool returned unexpected {}", kind, got))
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    extract_text: Option<Arc<dyn Tool>>,
    web_search: Option<Arc<dyn Tool>>,
    reason: Option<Arc<dyn Tool>>,
    call_timeout: Option<Duration>,
}

impl ToolRegistryBuilder {
    /// Register a tool in the slot matching its kind (replacing any previous one).
    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        match tool.kind() {
            ToolKind::ExtractText => self.extract_text = Some(tool),
            ToolKind::WebSearch => self.web_search = Some(tool),
            ToolKind::Reason => self.reason = Some(tool),
        }
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<ToolRegistry> {
        let missing = |kind: ToolKind| {
            AnalysisError::Config(format!("No tool registered for {}", kind))
        };

        Ok(ToolRegistry {
            extract_text: self.extract_text.ok_or_else(|| missing(ToolKind::ExtractText))?,
            web_search: self.web_search.ok_or_else(|| missing(ToolKind::WebSearch))?,
            reason: self.reason.ok_or_else(|| missing(ToolKind::Reason))?,
            call_timeout: self.call_timeout.unwrap_or(Duration::from_secs(60)),
        })
    }
}

/// Create the production registry from configuration.
pub fn create_default_registry(config: &crate::config::ToolConfig) -> Result<ToolRegistry> {
    if config.gemini_api_key.is_none() {
        warn!("GEMINI_API_KEY not set; reasoning calls will report unavailable");
    }
    if config.serper_api_key.is_none() {
        warn!("SERPER_API_KEY not set; investment advice will run without market context");
    }

    let gemini = crate::gemini::GeminiClient::new(
        config.gemini_api_key.clone().unwrap_or_default(),
        &config.gemini_model,
        config.call_timeout,
    )?;

    ToolRegistry::builder()
        .register(Arc::new(PdfTextTool::new()))
        .register(Arc::new(SerperSearchTool::new(
            config.serper_api_key.clone(),
            config.call_timeout,
        )?))
        .register(Arc::new(GeminiReasoningTool::new(gemini)))
        .call_timeout(config.call_timeout)
        .build()
}
