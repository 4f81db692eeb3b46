//! Document verification gate
//!
//! Rules-based and deterministic: no reasoning call. Every later step
//! depends on this one.

use super::{signals, AnalysisStep, StepError};
use crate::context::AnalysisContext;
use crate::models::{StepId, StepPayload};
use crate::tools::ToolRegistry;
use serde::Serialize;
use serde_json::json;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct VerificationCheck {
    pub rule: &'static str,
    pub passed: bool,
    pub details: String,
}

pub struct VerificationStep {
    min_chars: usize,
    min_keywords: usize,
}

impl VerificationStep {
    pub fn new(min_chars: usize, min_keywords: usize) -> Self {
        Self {
            min_chars,
            min_keywords,
        }
    }

    /// Run every rule against extracted text.
    pub fn check(&self, text: &str) -> Vec<VerificationCheck> {
        let chars = text.trim().chars().count();
        let keywords = signals::financial_keywords(text);

        vec![
            VerificationCheck {
                rule: "text_extracted",
                passed: chars > 0,
                details: if chars > 0 {
                    "Readable text extracted".to_string()
                } else {
                    "No readable text could be extracted".to_string()
                },
            },
            VerificationCheck {
                rule: "minimum_length",
                passed: chars >= self.min_chars,
                details: format!("{} characters (minimum {})", chars, self.min_chars),
            },
            VerificationCheck {
                rule: "financial_content",
                passed: keywords.len() >= self.min_keywords,
                details: format!(
                    "{} financial terms found (minimum {}): {}",
                    keywords.len(),
                    self.min_keywords,
                    keywords.join(", ")
                ),
            },
        ]
    }
}

#[async_trait::async_trait]
impl AnalysisStep for VerificationStep {
    fn id(&self) -> StepId {
        StepId::Verification
    }

    fn dependencies(&self) -> &'static [StepId] {
        &[]
    }

    async fn execute(
        &self,
        ctx: &AnalysisContext,
        tools: &ToolRegistry,
    ) -> Result<StepPayload, StepError> {
        let text = ctx.text(tools).await?;
        let checks = self.check(text);

        let issues: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.rule, c.details))
            .collect();

        info!(
            run_id = %ctx.run_id,
            passed = issues.is_empty(),
            "Verification completed"
        );

        if !issues.is_empty() {
            return Err(StepError::Rejected(issues.join("; ")));
        }

        let chars = text.chars().count();
        let pages = signals::page_count(text);
        let keywords = signals::financial_keywords(text);

        let body = format!(
            "Document verified for analysis.\n\n\
             - File: {}\n\
             - Extracted text: {} characters across {} pages\n\
             - Financial terms found: {}",
            ctx.document().filename,
            chars,
            pages,
            keywords.join(", ")
        );

        Ok(StepPayload::new(body).with_findings(json!({
            "document_chars": chars,
            "pages": pages,
            "financial_keywords_found": keywords,
            "checks": checks,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::tests::{echo_registry, test_context, FINANCIAL_TEXT};

    #[tokio::test]
    async fn test_financial_text_passes() {
        let tools = echo_registry(FINANCIAL_TEXT);
        let ctx = test_context(None);

        let payload = VerificationStep::new(100, 3)
            .execute(&ctx, &tools)
            .await
            .unwrap();
        assert_eq!(payload.findings["pages"], 2);
        assert!(payload.body.contains("acme.pdf"));
    }

    #[tokio::test]
    async fn test_non_financial_text_is_rejected() {
        let tools = echo_registry(&"lorem ipsum dolor sit amet ".repeat(10));
        let ctx = test_context(None);

        let err = VerificationStep::new(100, 3)
            .execute(&ctx, &tools)
            .await
            .unwrap_err();
        match err {
            StepError::Rejected(msg) => assert!(msg.contains("financial_content")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_text_fails_every_rule() {
        let checks = VerificationStep::new(100, 3).check("   ");
        assert!(checks.iter().all(|c| !c.passed));
    }
}
