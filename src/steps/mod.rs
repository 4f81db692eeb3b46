//! Analysis steps
//!
//! Each step reads what it needs from the shared context, calls tools
//! through the registry and returns one payload or one error. Steps never
//! retry; the pipeline owns that policy.

use crate::config::PipelineConfig;
use crate::context::AnalysisContext;
use crate::error::{ErrorBody, ErrorKind};
use crate::models::{StepId, StepPayload};
use crate::tools::{ToolError, ToolRegistry};
use std::sync::Arc;

pub mod financial;
pub mod investment;
pub mod risk;
pub mod signals;
pub mod verification;

pub use financial::FinancialAnalysisStep;
pub use investment::InvestmentAdviceStep;
pub use risk::RiskAssessmentStep;
pub use verification::VerificationStep;

/// Largest slice of document text handed to a reasoning call.
pub const MAX_CONTEXT_CHARS: usize = 30_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Tool(#[from] ToolError),

    /// The document did not pass a verification rule.
    #[error("{0}")]
    Rejected(String),

    #[error("Missing input from {0}")]
    MissingInput(StepId),
}

impl StepError {
    pub fn is_transient(&self) -> bool {
        match self {
            StepError::Tool(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let kind = match self {
            StepError::Tool(e) => e.kind.into(),
            StepError::Rejected(_) => ErrorKind::VerificationFailed,
            StepError::MissingInput(_) => ErrorKind::InternalError,
        };
        ErrorBody::new(kind, self.to_string())
    }
}

#[async_trait::async_trait]
pub trait AnalysisStep: Send + Sync {
    fn id(&self) -> StepId;

    /// Steps that must finish ok before this one may start.
    fn dependencies(&self) -> &'static [StepId];

    async fn execute(
        &self,
        ctx: &AnalysisContext,
        tools: &ToolRegistry,
    ) -> Result<StepPayload, StepError>;
}

/// The four analysis steps in declaration order.
pub fn default_steps(config: &PipelineConfig) -> Vec<Arc<dyn AnalysisStep>> {
    vec![
        Arc::new(VerificationStep::new(
            config.min_document_chars,
            config.min_financial_keywords,
        )),
        Arc::new(FinancialAnalysisStep),
        Arc::new(InvestmentAdviceStep),
        Arc::new(RiskAssessmentStep),
    ]
}

/// First `max_chars` characters of `text`.
pub fn clip(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::document::document_from_bytes;
    use crate::tools::{MockTool, ToolCall, ToolKind, ToolOutput};

    pub(crate) const FINANCIAL_TEXT: &str = "--- Page 1 ---\nRevenue rose 12% to $4.2B while operating \
        profit margin widened. Total assets reached $9B against liabilities of $3B.\n\
        --- Page 2 ---\nCash flow from operations stayed positive; debt was reduced and \
        equity increased. Management flagged currency risk and supply chain uncertainty.";

    /// Registry whose reasoning tool echoes the first prompt line.
    pub(crate) fn echo_registry(text: &str) -> ToolRegistry {
        ToolRegistry::builder()
            .register(Arc::new(MockTool::text(ToolKind::ExtractText, text)))
            .register(Arc::new(MockTool::search(ToolKind::WebSearch, vec![])))
            .register(Arc::new(MockTool::from_fn(ToolKind::Reason, |call| {
                match call {
                    ToolCall::Reason { prompt, .. } => Ok(ToolOutput::Text(format!(
                        "answer to {}",
                        prompt.lines().next().unwrap_or_default()
                    ))),
                    _ => unreachable!(),
                }
            })))
            .build()
            .unwrap()
    }

    pub(crate) fn test_context(query: Option<&str>) -> AnalysisContext {
        let doc = Arc::new(document_from_bytes("acme.pdf", b"%PDF-1.4".to_vec()));
        AnalysisContext::new(doc, query, crate::config::DEFAULT_QUERY)
    }

    #[test]
    fn test_clip_respects_char_boundaries() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("abc", 10), "abc");
    }

    #[test]
    fn test_error_kinds() {
        let err = StepError::from(ToolError::timeout("slow"));
        assert!(err.is_transient());
        assert_eq!(err.to_body().kind, ErrorKind::Timeout);

        let err = StepError::Rejected("too short".into());
        assert!(!err.is_transient());
        assert_eq!(err.to_body().kind, ErrorKind::VerificationFailed);
    }

    #[test]
    fn test_default_steps_in_report_order() {
        let ids: Vec<_> = default_steps(&PipelineConfig::default())
            .iter()
            .map(|s| s.id())
            .collect();
        assert_eq!(ids, StepId::ALL.to_vec());
    }
}
