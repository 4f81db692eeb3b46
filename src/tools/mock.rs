//! Scripted tool for development & testing
//!
//! Keeps the pipeline runnable without network access and lets tests
//! count calls and inject failures or latency.

use super::{SearchHit, Tool, ToolCall, ToolError, ToolKind, ToolOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = Box<dyn Fn(&ToolCall) -> Result<ToolOutput, ToolError> + Send + Sync>;

pub struct MockTool {
    kind: ToolKind,
    script: Mutex<VecDeque<Result<ToolOutput, ToolError>>>,
    responder: Responder,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockTool {
    /// Answer every call with the output of `responder`.
    pub fn from_fn<F>(kind: ToolKind, responder: F) -> Self
    where
        F: Fn(&ToolCall) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        Self {
            kind,
            script: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn text(kind: ToolKind, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::from_fn(kind, move |_| Ok(ToolOutput::Text(text.clone())))
    }

    pub fn search(kind: ToolKind, hits: Vec<SearchHit>) -> Self {
        Self::from_fn(kind, move |_| Ok(ToolOutput::SearchResults(hits.clone())))
    }

    pub fn failing(kind: ToolKind, error: ToolError) -> Self {
        Self::from_fn(kind, move |_| Err(error.clone()))
    }

    /// Queue a one-off response served before the default responder.
    pub fn then(self, response: Result<ToolOutput, ToolError>) -> Self {
        self.lock_script().push_back(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<ToolOutput, ToolError>>> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl Tool for MockTool {
    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    fn description(&self) -> &'static str {
        "Scripted tool double"
    }

    async fn call(&self, call: ToolCall) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.lock_script().pop_front();
        match scripted {
            Some(response) => response,
            None => (self.responder)(&call),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let tool = MockTool::text(ToolKind::Reason, "steady")
            .then(Err(ToolError::timeout("first")));

        let call = ToolCall::Reason {
            prompt: "p".into(),
            context: "c".into(),
        };

        assert!(tool.call(call.clone()).await.is_err());
        assert_eq!(
            tool.call(call).await.unwrap(),
            ToolOutput::Text("steady".into())
        );
        assert_eq!(tool.calls(), 2);
    }
}
