//! Financial analysis over the document text

use super::{clip, signals, AnalysisStep, StepError, MAX_CONTEXT_CHARS};
use crate::context::AnalysisContext;
use crate::models::{StepId, StepPayload};
use crate::tools::ToolRegistry;
use serde_json::json;

pub struct FinancialAnalysisStep;

fn prompt(query: &str) -> String {
    format!(
        "# Financial Analysis\n\n\
         Analyze the financial document to answer: {query}\n\n\
         Cover:\n\
         1. Key financial metrics and indicators\n\
         2. Trends, patterns and significant changes\n\
         3. Insights that address the question directly\n\
         4. Areas of concern or opportunity\n\n\
         Start with an executive summary, then detailed sections with headers. \
         Say plainly when the document does not contain the information needed."
    )
}

#[async_trait::async_trait]
impl AnalysisStep for FinancialAnalysisStep {
    fn id(&self) -> StepId {
        StepId::FinancialAnalysis
    }

    fn dependencies(&self) -> &'static [StepId] {
        &[StepId::Verification]
    }

    async fn execute(
        &self,
        ctx: &AnalysisContext,
        tools: &ToolRegistry,
    ) -> Result<StepPayload, StepError> {
        let text = ctx.text(tools).await?;
        let keywords = signals::financial_keywords(text);

        let body = tools
            .reason(&prompt(ctx.query()), clip(text, MAX_CONTEXT_CHARS))
            .await?;

        Ok(StepPayload::new(body).with_findings(json!({
            "financial_keywords_found": keywords,
            "document_chars": text.chars().count(),
            "context_truncated": text.chars().count() > MAX_CONTEXT_CHARS,
        })))
    }
}
