//! Web search over the Serper API

use super::{SearchHit, Tool, ToolCall, ToolError, ToolKind, ToolOutput};
use crate::error::AnalysisError;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SERPER_URL: &str = "https://google.serper.dev/search";
const MAX_RESULTS: usize = 5;

pub struct SerperSearchTool {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl SerperSearchTool {
    pub fn new(api_key: Option<String>, timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: SERPER_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

fn into_hits(response: SerperResponse) -> Vec<SearchHit> {
    response
        .organic
        .into_iter()
        .take(MAX_RESULTS)
        .map(|r| SearchHit {
            title: r.title,
            link: r.link,
            snippet: r.snippet,
        })
        .collect()
}

#[async_trait::async_trait]
impl Tool for SerperSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn name(&self) -> &'static str {
        "serper"
    }

    fn description(&self) -> &'static str {
        "Search the web for current market and company context"
    }

    async fn call(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        let ToolCall::WebSearch { query } = call else {
            return Err(ToolError::invalid_input("serper only handles web_search calls"));
        };

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::unavailable("SERPER_API_KEY not configured"))?;

        if query.trim().is_empty() {
            return Err(ToolError::invalid_input("Search query is empty"));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", api_key)
            .json(&json!({ "q": query }))
            .send()
            .await
            .map_err(|e| ToolError::from_http("Serper", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::from_status("Serper", status, &body));
        }

        let parsed: SerperResponse = response
            .json()
            .await
            .map_err(|e| ToolError::unavailable(format!("Invalid Serper response: {}", e)))?;

        Ok(ToolOutput::SearchResults(into_hits(parsed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    #[test]
    fn test_hits_are_capped() {
        let organic: Vec<_> = (0..8)
            .map(|i| json!({"title": format!("t{i}"), "link": "l", "snippet": "s"}))
            .collect();
        let response: SerperResponse =
            serde_json::from_value(json!({ "organic": organic })).unwrap();
        let hits = into_hits(response);
        assert_eq!(hits.len(), MAX_RESULTS);
        assert_eq!(hits[0].title, "t0");
    }

    #[tokio::test]
    async fn test_missing_key_is_unavailable() {
        let tool = SerperSearchTool::new(None, Duration::from_secs(1)).unwrap();
        let err = tool
            .call(ToolCall::WebSearch {
                query: "ACME earnings".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Unavailable);
    }
}
