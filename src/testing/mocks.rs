//! Mock implementations for testing
//!
//! Scripted model provider, in-memory tool session and fixed guards, so the whole
//! pipeline can be exercised without network access or child processes.

use crate::error::AgentResult;
use crate::guard::{GuardVerdict, InputGuard};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, MessageRole,
    TokenUsage, ToolCall,
};
use crate::tools::{ToolDescription, ToolError, ToolLauncher, ToolSession};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted model answer
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    /// A completion with no content and no tool calls
    Empty,
    Fail(LlmError),
}

impl ScriptedReply {
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        ScriptedReply::ToolCalls(vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }])
    }
}

type Responder = Arc<dyn Fn(&CompletionRequest) -> Option<ScriptedReply> + Send + Sync>;

/// Model provider answering from per-agent scripts
///
/// Requests are matched on the agent name the runner tags them with. Each
/// agent's replies are consumed in order and the last one repeats forever.
#[derive(Default)]
pub struct ScriptedLlmProvider {
    scripts: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    responder: Option<Responder>,
    fallback: Option<ScriptedReply>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    unhealthy: bool,
}

impl ScriptedLlmProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for `agent`
    pub fn reply(self, agent: &str, content: impl Into<String>) -> Self {
        self.reply_with(agent, ScriptedReply::Text(content.into()))
    }

    pub fn reply_with(mut self, agent: &str, reply: ScriptedReply) -> Self {
        self.scripts
            .get_mut()
            .entry(agent.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Consulted before the scripts; `None` falls through to them
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Option<ScriptedReply> + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Reply for agents without a script
    pub fn with_fallback(mut self, reply: ScriptedReply) -> Self {
        self.fallback = Some(reply);
        self
    }

    /// Delay every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.unhealthy = true;
        self
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn calls_for(&self, agent: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.agent_name() == Some(agent))
            .count()
    }

    pub async fn total_calls(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn next_reply(&self, request: &CompletionRequest) -> Option<ScriptedReply> {
        if let Some(reply) = self.responder.as_ref().and_then(|r| r(request)) {
            return Some(reply);
        }

        let agent = request.agent_name().unwrap_or_default();
        let mut scripts = self.scripts.lock().await;
        match scripts.get_mut(agent) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => self.fallback.clone(),
        }
    }
}

/// Content of the last user message in a request
pub fn last_user_message(request: &CompletionRequest) -> Option<&str> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.next_reply(&request).await.ok_or_else(|| {
            LlmError::RequestFailed(format!(
                "no scripted reply for agent {:?}",
                request.agent_name()
            ))
        })?;

        let mut response = CompletionResponse::text(request.model.clone(), "");
        response.usage = TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };

        match reply {
            ScriptedReply::Text(content) => response.content = Some(content),
            ScriptedReply::ToolCalls(calls) => {
                response.content = None;
                response.finish_reason = FinishReason::ToolCalls;
                response.tool_calls = Some(calls);
            }
            ScriptedReply::Empty => response.content = None,
            ScriptedReply::Fail(error) => return Err(error),
        }

        Ok(response)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.unhealthy {
            Err(LlmError::RequestFailed("Mock health check failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory tool session
#[derive(Debug, Default)]
pub struct MockToolSession {
    tools: Vec<ToolDescription>,
    responses: HashMap<String, Value>,
    failures: HashMap<String, ToolError>,
    invocations: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MockToolSession {
    pub fn new(tools: Vec<ToolDescription>) -> Self {
        Self {
            tools,
            ..Default::default()
        }
    }

    pub fn with_response(mut self, tool: &str, result: Value) -> Self {
        self.responses.insert(tool.to_string(), result);
        self
    }

    pub fn with_failure(mut self, tool: &str, error: ToolError) -> Self {
        self.failures.insert(tool.to_string(), error);
        self
    }

    pub async fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().await.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSession for MockToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescription>, ToolError> {
        if self.is_closed() {
            return Err(ToolError::Closed);
        }
        Ok(self.tools.clone())
    }

    async fn invoke(&self, name: &str, arguments: &Value) -> Result<Value, ToolError> {
        if self.is_closed() {
            return Err(ToolError::Closed);
        }

        self.invocations
            .lock()
            .await
            .push((name.to_string(), arguments.clone()));

        if let Some(error) = self.failures.get(name) {
            return Err(error.clone());
        }

        Ok(self
            .responses
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!({"content": [{"type": "text", "text": "ok"}]})))
    }

    async fn close(&self) -> Result<(), ToolError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Launcher handing out one shared [`MockToolSession`]
pub struct MockToolLauncher {
    session: Arc<MockToolSession>,
    should_fail: bool,
    launches: AtomicUsize,
}

impl MockToolLauncher {
    pub fn new(session: Arc<MockToolSession>) -> Self {
        Self {
            session,
            should_fail: false,
            launches: AtomicUsize::new(0),
        }
    }

    pub fn with_failure(session: Arc<MockToolSession>) -> Self {
        Self {
            should_fail: true,
            ..Self::new(session)
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolLauncher for MockToolLauncher {
    async fn launch(&self) -> Result<Arc<dyn ToolSession>, ToolError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(ToolError::Startup("Mock launch failure".to_string()));
        }
        Ok(self.session.clone())
    }
}

/// Guard with a fixed outcome that counts its evaluations
#[derive(Debug)]
pub struct StaticGuard {
    name: String,
    trips: bool,
    calls: AtomicUsize,
}

impl StaticGuard {
    pub fn passing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            trips: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn tripping(name: &str) -> Self {
        Self {
            trips: true,
            ..Self::passing(name)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputGuard for StaticGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: &str) -> AgentResult<GuardVerdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let info = json!({ "input_length": input.chars().count() });
        Ok(if self.trips {
            GuardVerdict::tripped(&self.name, info)
        } else {
            GuardVerdict::passed(&self.name, info)
        })
    }
}
