//! External tool sessions
//!
//! A [`ToolSession`] is a live connection to an external tool provider (the
//! browser automation server in production). A [`ToolSet`] snapshots the tools a
//! session exposes and validates arguments against their declared schemas before
//! any call leaves the process.
//!
//! Sessions are scoped: [`with_session`] releases the session on every exit path,
//! including errors.

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod mcp;

pub use mcp::{tool_result_text, StdioLauncher, StdioSessionConfig, StdioToolSession};

/// A tool the model may call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    /// JSON schema of the call arguments
    pub parameters: Value,
}

/// Live connection to an external tool provider
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Tools currently exposed by the provider
    async fn list_tools(&self) -> Result<Vec<ToolDescription>, ToolError>;

    /// Invoke one tool and return its raw result
    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError>;

    /// Release the session; calling it twice is a no-op
    async fn close(&self) -> Result<(), ToolError>;

    fn is_closed(&self) -> bool;
}

/// Something that can open a fresh [`ToolSession`]
#[async_trait]
pub trait ToolLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn ToolSession>, ToolError>;
}

/// Tools discovered on a session, with argument validation
pub struct ToolSet {
    session: Arc<dyn ToolSession>,
    tools: Vec<ToolDescription>,
}

impl ToolSet {
    /// Ask the session for its tools
    pub async fn discover(session: Arc<dyn ToolSession>) -> Result<Self, ToolError> {
        let tools = session.list_tools().await?;
        info!(tool_count = tools.len(), "Discovered tools");
        Ok(Self { session, tools })
    }

    /// Build from an already known tool list
    pub fn new(session: Arc<dyn ToolSession>, tools: Vec<ToolDescription>) -> Self {
        Self { session, tools }
    }

    pub fn descriptions(&self) -> &[ToolDescription] {
        &self.tools
    }

    pub fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    pub fn describe_tool(&self, tool_name: &str) -> Option<&ToolDescription> {
        self.tools.iter().find(|t| t.name == tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate the arguments, then forward the call to the session
    pub async fn invoke(&self, tool_name: &str, arguments: &Value) -> Result<Value, ToolError> {
        let description = self
            .describe_tool(tool_name)
            .ok_or_else(|| ToolError::UnknownTool(tool_name.to_string()))?;

        validate_arguments(description, arguments)?;

        debug!(tool = tool_name, "Invoking tool");
        self.session.invoke(tool_name, arguments).await
    }
}

/// Check call arguments against a tool's declared schema
pub fn validate_arguments(description: &ToolDescription, arguments: &Value) -> Result<(), ToolError> {
    let validator = jsonschema::validator_for(&description.parameters)
        .map_err(|e| ToolError::SchemaError(format!("Schema compilation error: {e}")))?;

    validator.validate(arguments).map_err(|errors| {
        let error_messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        ToolError::ValidationError(error_messages.join("; "))
    })
}

/// Run `f` with a session and close the session afterwards, whatever `f` returned
pub async fn with_session<F, Fut, T>(session: Arc<dyn ToolSession>, f: F) -> AgentResult<T>
where
    F: FnOnce(Arc<dyn ToolSession>) -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let result = f(session.clone()).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close tool session");
    }

    result
}

/// Open a session with `launcher`, then behave like [`with_session`]
pub async fn with_launched_session<L, F, Fut, T>(launcher: &L, f: F) -> AgentResult<T>
where
    L: ToolLauncher + ?Sized,
    F: FnOnce(Arc<dyn ToolSession>) -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let session = launcher
        .launch()
        .await
        .map_err(|e| AgentError::tool_session_fault(format!("failed to start tool session: {e}")))?;

    with_session(session, f).await
}

/// Tool session and tool call errors
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Parameter validation failed: {0}")]
    ValidationError(String),
    #[error("Schema error: {0}")]
    SchemaError(String),
    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
    #[error("Tool process failed to start: {0}")]
    Startup(String),
    #[error("Tool transport failed: {0}")]
    Transport(String),
    #[error("Tool protocol error: {0}")]
    Protocol(String),
    #[error("Tool call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Tool session is closed")]
    Closed,
}

impl ToolError {
    /// True when the session itself is unusable, as opposed to one bad call
    ///
    /// Call-level failures are reported back to the model; session faults end the run.
    pub fn is_session_fault(&self) -> bool {
        matches!(
            self,
            ToolError::Startup(_)
                | ToolError::Transport(_)
                | ToolError::Protocol(_)
                | ToolError::Timeout(_)
                | ToolError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockToolSession;
    use serde_json::json;

    fn navigate_tool() -> ToolDescription {
        ToolDescription {
            name: "browser_navigate".to_string(),
            description: "Navigate to a URL".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"url": {"type": "string"}},
                "required": ["url"]
            }),
        }
    }

    #[tokio::test]
    async fn test_discover_lists_session_tools() {
        let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
        let tool_set = ToolSet::discover(session).await.unwrap();

        assert_eq!(tool_set.list_tools(), vec!["browser_navigate".to_string()]);
        assert!(tool_set.describe_tool("browser_navigate").is_some());
        assert!(tool_set.describe_tool("missing").is_none());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
        let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);

        let result = tool_set.invoke("browser_click", &json!({})).await;
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
        assert!(session.invocations().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_session() {
        let session = Arc::new(MockToolSession::new(vec![navigate_tool()]));
        let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);

        let result = tool_set.invoke("browser_navigate", &json!({"url": 42})).await;
        assert!(matches!(result, Err(ToolError::ValidationError(_))));
        assert!(session.invocations().await.is_empty());
    }

    #[tokio::test]
    async fn test_valid_call_is_forwarded() {
        let session = Arc::new(
            MockToolSession::new(vec![navigate_tool()])
                .with_response("browser_navigate", json!({"content": [{"type": "text", "text": "ok"}]})),
        );
        let tool_set = ToolSet::new(session.clone(), vec![navigate_tool()]);

        let result = tool_set
            .invoke("browser_navigate", &json!({"url": "https://example.com"}))
            .await
            .unwrap();

        assert_eq!(result["content"][0]["text"], "ok");
        assert_eq!(session.invocations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_with_session_closes_on_success() {
        let session = Arc::new(MockToolSession::new(vec![]));
        let handle: Arc<dyn ToolSession> = session.clone();

        let value = with_session(handle, |_s| async { Ok(7) }).await.unwrap();

        assert_eq!(value, 7);
        assert!(session.is_closed());
        assert_eq!(session.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_with_session_closes_on_error() {
        let session = Arc::new(MockToolSession::new(vec![]));
        let handle: Arc<dyn ToolSession> = session.clone();

        let result: AgentResult<()> = with_session(handle, |_s| async {
            Err(AgentError::tool_session_fault("process exited"))
        })
        .await;

        assert!(matches!(result, Err(AgentError::ToolSessionFault { .. })));
        assert!(session.is_closed());
    }

    #[test]
    fn test_session_fault_classification() {
        assert!(ToolError::Transport("eof".to_string()).is_session_fault());
        assert!(ToolError::Closed.is_session_fault());
        assert!(!ToolError::ValidationError("bad".to_string()).is_session_fault());
        assert!(!ToolError::ExecutionError("404".to_string()).is_session_fault());
        assert!(!ToolError::UnknownTool("x".to_string()).is_session_fault());
    }
}
