//! Risk assessment
//!
//! Independent of investment advice; both only need the financial analysis.

use super::{clip, signals, AnalysisStep, StepError, MAX_CONTEXT_CHARS};
use crate::context::AnalysisContext;
use crate::models::{StepId, StepPayload};
use crate::tools::ToolRegistry;

pub struct RiskAssessmentStep;

fn prompt(query: &str, scan: &signals::RiskSignals) -> String {
    format!(
        "# Risk Assessment\n\n\
         Assess the risks described in the financial document for: {query}\n\n\
         Review financial (liquidity, credit, market), operational, strategic, \
         regulatory and industry risks, and any mitigation already in place. \
         Rank risks by priority with supporting evidence.\n\n\
         A keyword scan found {mentions} risk mentions ({indicators}), \
         suggesting an overall level of {level}. Confirm or correct this.",
        mentions = scan.total_risk_mentions,
        indicators = if scan.risk_indicators_found.is_empty() {
            "none".to_string()
        } else {
            scan.risk_indicators_found.join(", ")
        },
        level = scan.overall_risk_level,
    )
}

#[async_trait::async_trait]
impl AnalysisStep for RiskAssessmentStep {
    fn id(&self) -> StepId {
        StepId::RiskAssessment
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
        let text = ctx.text(tools).await?;
        let scan = signals::risk_signals(text);

        let context = format!(
            "## Financial Analysis\n\n{}\n\n## Document\n\n{}",
            analysis.body,
            clip(text, MAX_CONTEXT_CHARS)
        );
        let answer = tools.reason(&prompt(ctx.query(), &scan), &context).await?;

        let body = format!(
            "{}\n\nIndicator scan: overall risk level {} ({} mentions).",
            answer.trim_end(),
            scan.overall_risk_level,
            scan.total_risk_mentions
        );

        let findings = serde_json::to_value(&scan).unwrap_or_default();
        Ok(StepPayload::new(body).with_findings(findings))
    }
}
