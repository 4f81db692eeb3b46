//! Language-model reasoning tool

use super::{Tool, ToolCall, ToolError, ToolKind, ToolOutput};
use crate::gemini::GeminiClient;

const SYSTEM_PROMPT: &str = r#"You are a senior financial analyst working from a single uploaded document.

Guidelines:
- Base every conclusion on evidence from the document context you are given
- State clearly when information is missing from the document
- Be structured and concise, using headers and bullet points
- Use professional financial language
- Include a short disclaimer when giving investment opinions"#;

pub struct GeminiReasoningTool {
    client: GeminiClient,
}

impl GeminiReasoningTool {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

/// Join the step prompt and its document context into one request.
pub fn compose_prompt(prompt: &str, context: &str) -> String {
    format!("{}\n\n## Context\n\n{}", prompt.trim(), context.trim())
}

#[async_trait::async_trait]
impl Tool for GeminiReasoningTool {
    fn kind(&self) -> ToolKind {
        ToolKind::Reason
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn description(&self) -> &'static str {
        "Synthesize structured financial analysis with a language model"
    }

    async fn call(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let ToolCall::Reason { prompt, context } = call else {
            return Err(ToolError::invalid_input("gemini only handles reason calls"));
        };

        if prompt.trim().is_empty() {
            return Err(ToolError::invalid_input("Reasoning prompt is empty"));
        }

        let answer = self
            .client
            .generate(SYSTEM_PROMPT, &compose_prompt(&prompt, &context))
            .await?;

        Ok(ToolOutput::Text(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt_layout() {
        let composed = compose_prompt("  Analyze revenue ", "Revenue: 10M\n");
        assert!(composed.starts_with("Analyze revenue"));
        assert!(composed.ends_with("Revenue: 10M"));
        assert!(composed.contains("## Context"));
    }
}
