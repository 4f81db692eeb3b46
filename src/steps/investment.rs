//! Investment advice built on the financial analysis
//!
//! Market context from web search is optional. When search fails the step
//! still answers and marks its payload degraded.

use super::{clip, AnalysisStep, StepError};
use crate::context::AnalysisContext;
use crate::models::{StepId, StepPayload};
use crate::tools::{SearchHit, ToolRegistry};
use serde_json::json;
use tracing::warn;

const MAX_SEARCH_QUERY_CHARS: usize = 200;

pub struct InvestmentAdviceStep;

fn prompt(query: &str) -> String {
    format!(
        "# Investment Advice\n\n\
         Using the financial analysis below, give investment insights for: {query}\n\n\
         Include:\n\
         - Investment thesis summary\n\
         - Strengths and weaknesses backed by figures from the analysis\n\
         - Risk-return profile and suitable investor profiles\n\
         - A recommendation with rationale\n\
         - A disclaimer that this is not personalized financial advice"
    )
}

fn search_query(ctx: &AnalysisContext) -> String {
    let stem = ctx
        .document()
        .filename
        .trim_end_matches(".pdf")
        .trim_end_matches(".PDF")
        .replace(['_', '-'], " ");
    format!(
        "{} {} market outlook",
        stem,
        clip(ctx.query(), MAX_SEARCH_QUERY_CHARS)
    )
}

fn market_context(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return "No market results were found.".to_string();
    }
    hits.iter()
        .map(|h| format!("- {} ({}): {}", h.title, h.link, h.snippet))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait::async_trait]
impl AnalysisStep for InvestmentAdviceStep {
    fn id(&self) -> StepId {
        StepId::InvestmentAdvice
    }

    fn dependencies(&self) -> &'static [StepId] {
        &[StepId::FinancialAnalysis]
    }

    async fn execute(
        &self,
        ctx: &AnalysisContext,
        tools: &ToolRegistry,
    ) -> Result<StepPayload, StepError> {
        let analysis = ctx
            .payload_for(StepId::FinancialAnalysis)
            .await
            .ok_or(StepError::MissingInput(StepId::FinancialAnalysis))?;

        let (market, degraded_note) = match tools.web_search(&search_query(ctx)).await {
            Ok(hits) => (Some(hits), None),
            Err(e) => {
                warn!(run_id = %ctx.run_id, error = %e, "Market search unavailable, continuing without it");
                (None, Some(format!("Market context unavailable: {}", e.message)))
            }
        };

        let mut context = format!("## Financial Analysis\n\n{}", analysis.body);
        if let Some(hits) = &market {
            context.push_str("\n\n## Market Context\n\n");
            context.push_str(&market_context(hits));
        }

        let body = tools.reason(&prompt(ctx.query()), &context).await?;

        let sources: Vec<&str> = market
            .iter()
            .flatten()
            .map(|h| h.link.as_str())
            .collect();

        let payload = StepPayload::new(body).with_findings(json!({
            "market_context": market.is_some(),
            "sources": sources,
        }));

        Ok(match degraded_note {
            Some(note) => payload.degraded(note),
            None => payload,
        })
    }
}
