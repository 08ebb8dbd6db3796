//! Pipeline execution
//!
//! [`Runner`] drives one input through an agent graph:
//!
//! 1. every guard of the current agent, in order, stopping at the first tripwire
//! 2. if the agent has delegates, delegate selection and handoff (back to 1 for the delegate)
//! 3. otherwise the agent answers, optionally through a bounded tool loop
//!
//! Each stage runs under the configured request timeout and observes the run's
//! cancellation token. A runner holds no per-run state, so one instance can serve
//! any number of concurrent runs.

use super::definition::{Agent, ModelSettings};
use super::trace::{RunResult, RunState, Trace, TraceEvent};
use crate::config::{AppConfig, RunnerSection};
use crate::error::{AgentError, AgentResult};
use crate::guard::GuardVerdict;
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, LlmProvider, Message, ToolCall, AGENT_METADATA_KEY,
};
use crate::llm::structured::{decode_value, OutputSchema, StructuredOutput};
use crate::routing::{DelegateSelector, ModelSelector, SelectionContext, SelectionDecision};
use crate::tools::{tool_result_text, ToolSet};
use crate::{run_span, tool_span};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Limits applied to every run
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSettings {
    pub request_timeout: Duration,
    pub max_tool_iterations: usize,
    pub schema_retries: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_section(&RunnerSection::default())
    }
}

impl RunnerSettings {
    pub fn from_section(section: &RunnerSection) -> Self {
        Self {
            request_timeout: Duration::from_secs(section.request_timeout_secs),
            max_tool_iterations: section.max_tool_iterations,
            schema_retries: section.schema_retries.min(1),
        }
    }
}

/// Executes agents against a model provider
#[derive(Clone)]
pub struct Runner {
    provider: Arc<dyn LlmProvider>,
    selector: Arc<dyn DelegateSelector>,
    settings: RunnerSettings,
}

impl Runner {
    /// Runner with default settings and model-driven delegate selection
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            selector: Arc::new(ModelSelector::new()),
            settings: RunnerSettings::default(),
        }
    }

    /// Runner configured from the `[runner]` and `[router]` sections
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &AppConfig) -> Self {
        Self {
            provider,
            selector: crate::routing::selector_from_config(&config.router),
            settings: RunnerSettings::from_section(&config.runner),
        }
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn DelegateSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// Run `input` through `agent` and everything it delegates to
    pub async fn run(&self, agent: &Agent, input: &str) -> AgentResult<RunResult> {
        self.run_cancellable(agent, input, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), aborting with [`AgentError::Cancelled`] when `cancel` fires
    pub async fn run_cancellable(
        &self,
        agent: &Agent,
        input: &str,
        cancel: &CancellationToken,
    ) -> AgentResult<RunResult> {
        self.execute(agent, input, None, cancel).await
    }

    /// Run with the tools of `tools` available to the answering agent
    pub async fn run_with_tools(
        &self,
        agent: &Agent,
        input: &str,
        tools: &ToolSet,
    ) -> AgentResult<RunResult> {
        self.execute(agent, input, Some(tools), &CancellationToken::new())
            .await
    }

    pub async fn run_with_tools_cancellable(
        &self,
        agent: &Agent,
        input: &str,
        tools: &ToolSet,
        cancel: &CancellationToken,
    ) -> AgentResult<RunResult> {
        self.execute(agent, input, Some(tools), cancel).await
    }

    /// Run and decode the final output as `T`
    pub async fn run_structured<T: StructuredOutput>(
        &self,
        agent: &Agent,
        input: &str,
    ) -> AgentResult<T> {
        self.run(agent, input).await?.final_output_as::<T>()
    }

    /// Run and return only the final text
    pub async fn run_text(&self, agent: &Agent, input: &str) -> AgentResult<String> {
        Ok(self.run(agent, input).await?.final_output)
    }

    /// One structured completion outside the guard/handoff flow
    ///
    /// Used by selectors that need the model's opinion on behalf of `agent_name`.
    pub async fn complete_structured<T: StructuredOutput>(
        &self,
        agent_name: &str,
        model: &ModelSettings,
        messages: Vec<Message>,
    ) -> AgentResult<T> {
        let schema = T::output_schema();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = build_request(agent_name, model, messages.clone());
            request.response_format = Some(schema.response_format());

            let response = self.complete(request).await?;
            let decoded = response_content(agent_name, response)
                .and_then(|content| schema.parse(&content))
                .and_then(|value| decode_value::<T>(&schema.name, value));

            match decoded {
                Ok(value) => return Ok(value),
                Err(e) if self.may_retry(&e, attempt) => {
                    warn!(agent = agent_name, attempt, error = %e, "Structured output rejected, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(
        &self,
        entry: &Agent,
        input: &str,
        tools: Option<&ToolSet>,
        cancel: &CancellationToken,
    ) -> AgentResult<RunResult> {
        let run_id = Uuid::new_v4();
        let span = run_span!(run_id = %run_id, agent = %entry.name());

        async move {
            let mut trace = Trace::default();
            let mut state = RunState::Pending;

            match self
                .drive(entry, input, tools, cancel, &mut trace, &mut state)
                .await
            {
                Ok((final_output, last_agent)) => {
                    info!(last_agent = %last_agent, events = trace.len(), "Run completed");
                    Ok(RunResult {
                        run_id,
                        final_output,
                        last_agent,
                        trace,
                    })
                }
                Err(e) => {
                    if !state.is_terminal() {
                        state.advance(RunState::Failed);
                    }
                    if e.is_guard_rejection() {
                        info!(error = %e, "Run rejected");
                    } else {
                        warn!(error = %e, "Run failed");
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        entry: &Agent,
        input: &str,
        tools: Option<&ToolSet>,
        cancel: &CancellationToken,
        trace: &mut Trace,
        state: &mut RunState,
    ) -> AgentResult<(String, String)> {
        let mut current = entry;

        loop {
            trace.push(TraceEvent::AgentStarted {
                agent: current.name().to_string(),
            });
            state.advance(RunState::GuardEval);

            let verdicts = self.evaluate_guards(current, input, cancel, trace).await?;
            if let Some(tripped) = verdicts.last().filter(|v| v.tripwire_triggered) {
                state.advance(RunState::Rejected);
                return Err(AgentError::guard_rejection(tripped.clone()));
            }

            if current.is_router() {
                state.advance(RunState::Routing);
                let next = self
                    .select_delegate(current, input, &verdicts, cancel, trace)
                    .await?;
                state.advance(RunState::Delegated);
                current = next;
                continue;
            }

            let output = match tools {
                Some(tools) => self.answer_with_tools(current, input, tools, cancel, trace).await?,
                None => self.answer(current, input, cancel).await?,
            };

            trace.push(TraceEvent::AgentAnswered {
                agent: current.name().to_string(),
            });
            state.advance(RunState::Answered);
            return Ok((output, current.name().to_string()));
        }
    }

    /// Evaluate guards in order; a tripped verdict is always the last element
    async fn evaluate_guards(
        &self,
        agent: &Agent,
        input: &str,
        cancel: &CancellationToken,
        trace: &mut Trace,
    ) -> AgentResult<Vec<GuardVerdict>> {
        let mut verdicts = Vec::with_capacity(agent.guards().len());

        for guard in agent.guards() {
            let verdict = self
                .within_deadline(cancel, "guard evaluation", guard.evaluate(input))
                .await?;

            trace.push(TraceEvent::GuardEvaluated {
                agent: agent.name().to_string(),
                verdict: verdict.clone(),
            });

            let tripped = verdict.tripwire_triggered;
            verdicts.push(verdict);
            if tripped {
                warn!(agent = agent.name(), guard = guard.name(), "Guard rejected input");
                break;
            }
        }

        Ok(verdicts)
    }

    async fn select_delegate<'a>(
        &self,
        router: &'a Agent,
        input: &str,
        verdicts: &[GuardVerdict],
        cancel: &CancellationToken,
        trace: &mut Trace,
    ) -> AgentResult<&'a Agent> {
        let context = SelectionContext {
            router,
            input,
            verdicts,
        };

        let decision = self
            .within_deadline(
                cancel,
                "delegate selection",
                self.selector.select(self, &context),
            )
            .await?;

        let (name, reason) = match decision {
            SelectionDecision::RouteToAgent { delegate, reason } => (delegate, reason),
            SelectionDecision::NoRoute { reason } => {
                return Err(AgentError::no_matching_delegate(router.name(), reason));
            }
        };

        let delegate = router.find_delegate(&name).ok_or_else(|| {
            AgentError::no_matching_delegate(
                router.name(),
                format!("'{name}' is not a delegate of this router"),
            )
        })?;

        info!(
            router = router.name(),
            delegate = delegate.name(),
            selector = self.selector.name(),
            "Handing off"
        );
        trace.push(TraceEvent::DelegateSelected {
            router: router.name().to_string(),
            delegate: delegate.name().to_string(),
            reason,
        });

        Ok(delegate)
    }

    async fn answer(
        &self,
        agent: &Agent,
        input: &str,
        cancel: &CancellationToken,
    ) -> AgentResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = build_request(agent.name(), agent.model(), agent.initial_messages(input));
            if let Some(schema) = agent.output_schema() {
                request.response_format = Some(schema.response_format());
            }

            let response = self
                .within_deadline(cancel, "model completion", self.complete(request))
                .await?;

            let result = response_content(agent.name(), response)
                .and_then(|content| finish_output(agent.output_schema(), content));

            match result {
                Ok(output) => return Ok(output),
                Err(e) if self.may_retry(&e, attempt) => {
                    warn!(agent = agent.name(), attempt, error = %e, "Structured output rejected, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn answer_with_tools(
        &self,
        agent: &Agent,
        input: &str,
        tools: &ToolSet,
        cancel: &CancellationToken,
        trace: &mut Trace,
    ) -> AgentResult<String> {
        let max_iterations = self.settings.max_tool_iterations;
        let mut messages = agent.initial_messages(input);

        for iteration in 1..=max_iterations {
            let mut request = build_request(agent.name(), agent.model(), messages.clone());
            if !tools.is_empty() {
                request.tools = Some(tools.descriptions().to_vec());
            }

            let response = self
                .within_deadline(cancel, "model completion", self.complete(request))
                .await?;

            debug!(
                agent = agent.name(),
                iteration,
                tool_calls = response.tool_calls.as_ref().map_or(0, Vec::len),
                "Model turn"
            );

            if !response.has_tool_calls() {
                let content = response_content(agent.name(), response)?;
                return finish_output(agent.output_schema(), content);
            }

            let calls = response.tool_calls.unwrap_or_default();
            messages.push(Message::assistant(assistant_turn(
                response.content.as_deref(),
                &calls,
            )));

            let mut tool_results = Vec::with_capacity(calls.len());

            for call in &calls {
                let span = tool_span!(tool = %call.name, call_id = %call.id);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::cancelled("tool invocation")),
                    outcome = tools.invoke(&call.name, &call.arguments).instrument(span) => outcome,
                };

                trace.push(TraceEvent::ToolInvoked {
                    agent: agent.name().to_string(),
                    tool: call.name.clone(),
                    succeeded: outcome.is_ok(),
                });

                match outcome {
                    Ok(value) => {
                        tool_results.push(format!(
                            "Tool {} returned: {}",
                            call.name,
                            tool_result_text(&value)
                        ));
                    }
                    Err(e) if e.is_session_fault() => return Err(e.into()),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Tool call failed");
                        tool_results.push(format!("Tool {} failed: {}", call.name, e));
                    }
                }
            }

            messages.push(Message::user(format!(
                "Tool results:\n{}",
                tool_results.join("\n")
            )));
        }

        Err(AgentError::ToolLoopExceeded {
            max: max_iterations,
        })
    }

    async fn complete(&self, request: CompletionRequest) -> AgentResult<CompletionResponse> {
        self.provider.complete(request).await.map_err(AgentError::from)
    }

    fn may_retry(&self, error: &AgentError, attempt: u32) -> bool {
        matches!(error, AgentError::SchemaViolation { .. }) && attempt <= self.settings.schema_retries
    }

    async fn within_deadline<T, F>(
        &self,
        cancel: &CancellationToken,
        stage: &str,
        future: F,
    ) -> AgentResult<T>
    where
        F: Future<Output = AgentResult<T>>,
    {
        let timeout = self.settings.request_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::cancelled(stage)),
            outcome = tokio::time::timeout(timeout, future) => match outcome {
                Ok(result) => result,
                Err(_) => Err(AgentError::model_unavailable(format!(
                    "{stage} timed out after {timeout:?}"
                ))),
            },
        }
    }
}

fn build_request(agent_name: &str, model: &ModelSettings, messages: Vec<Message>) -> CompletionRequest {
    let mut request = CompletionRequest::new(model.model.clone(), messages);
    request.temperature = model.temperature;
    request.max_tokens = model.max_tokens;
    request
        .metadata
        .insert(AGENT_METADATA_KEY.to_string(), agent_name.to_string());
    request
}

/// Assistant message recording a tool-calling turn, so the results that follow have a request
fn assistant_turn(content: Option<&str>, calls: &[ToolCall]) -> String {
    let requested = calls
        .iter()
        .map(|call| format!("{}({})", call.name, call.arguments))
        .collect::<Vec<_>>()
        .join(", ");
    match content.map(str::trim).filter(|c| !c.is_empty()) {
        Some(text) => format!("{text}\nCalling tools: {requested}"),
        None => format!("Calling tools: {requested}"),
    }
}

fn response_content(agent_name: &str, response: CompletionResponse) -> AgentResult<String> {
    response.content.ok_or_else(|| {
        AgentError::model_unavailable(format!(
            "completion for agent '{agent_name}' had no content"
        ))
    })
}

/// Validate structured output; plain agents return their text unchanged
fn finish_output(schema: Option<&OutputSchema>, content: String) -> AgentResult<String> {
    match schema {
        Some(schema) => Ok(schema.parse(&content)?.to_string()),
        None => Ok(content),
    }
}
