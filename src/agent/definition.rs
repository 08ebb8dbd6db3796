//! Immutable agent definitions
//!
//! An [`Agent`] is pure data: a name, instructions, model settings, an optional
//! output schema and the guards and delegates it was built with. Nothing about an
//! agent changes after [`AgentBuilder::build`]; sharing one across concurrent runs
//! is just cloning an `Arc`.

use crate::config::LlmSection;
use crate::error::{AgentError, AgentResult};
use crate::guard::InputGuard;
use crate::llm::provider::Message;
use crate::llm::structured::{OutputSchema, StructuredOutput};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Model parameters an agent's requests are issued with
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Settings from the `[llm]` section
    pub fn from_llm_section(section: &LlmSection) -> Self {
        Self {
            model: section.model.clone(),
            temperature: section.temperature,
            max_tokens: section.max_tokens,
        }
    }
}

/// A named unit of model behavior
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: String,
    model: ModelSettings,
    output_schema: Option<OutputSchema>,
    handoff_description: Option<String>,
    delegates: Vec<Arc<Agent>>,
    guards: Vec<Arc<dyn InputGuard>>,
}

impl Agent {
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn model(&self) -> &ModelSettings {
        &self.model
    }

    pub fn output_schema(&self) -> Option<&OutputSchema> {
        self.output_schema.as_ref()
    }

    /// Short description a router shows when choosing among delegates
    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    pub fn delegates(&self) -> &[Arc<Agent>] {
        &self.delegates
    }

    pub fn guards(&self) -> &[Arc<dyn InputGuard>] {
        &self.guards
    }

    /// An agent with at least one delegate hands off instead of answering
    pub fn is_router(&self) -> bool {
        !self.delegates.is_empty()
    }

    /// Find a delegate by exact name, then by case-insensitive name
    pub fn find_delegate(&self, name: &str) -> Option<&Agent> {
        let name = name.trim();
        self.delegates
            .iter()
            .find(|d| d.name == name)
            .or_else(|| {
                self.delegates
                    .iter()
                    .find(|d| d.name.to_lowercase() == name.to_lowercase())
            })
            .map(Arc::as_ref)
    }

    /// System instructions followed by the user input
    pub fn initial_messages(&self, input: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if !self.instructions.is_empty() {
            messages.push(Message::system(&self.instructions));
        }
        messages.push(Message::user(input));
        messages
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guards: Vec<&str> = self.guards.iter().map(|g| g.name()).collect();
        let delegates: Vec<&str> = self.delegates.iter().map(|d| d.name()).collect();
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("output_schema", &self.output_schema.as_ref().map(|s| &s.name))
            .field("handoff_description", &self.handoff_description)
            .field("delegates", &delegates)
            .field("guards", &guards)
            .finish()
    }
}

/// Builder for [`Agent`]
pub struct AgentBuilder {
    name: String,
    instructions: String,
    model: Option<ModelSettings>,
    output_schema: Option<OutputSchema>,
    handoff_description: Option<String>,
    delegates: Vec<Arc<Agent>>,
    guards: Vec<Arc<dyn InputGuard>>,
}

impl AgentBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            model: None,
            output_schema: None,
            handoff_description: None,
            delegates: Vec::new(),
            guards: Vec::new(),
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn model(mut self, model: ModelSettings) -> Self {
        self.model = Some(model);
        self
    }

    /// Require the agent's answer to decode as `T`
    pub fn output<T: StructuredOutput>(mut self) -> Self {
        self.output_schema = Some(T::output_schema());
        self
    }

    pub fn output_schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn delegate(mut self, agent: Arc<Agent>) -> Self {
        self.delegates.push(agent);
        self
    }

    /// Guards run in the order they are added
    pub fn guard(mut self, guard: Arc<dyn InputGuard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn build(self) -> AgentResult<Agent> {
        if self.name.trim().is_empty() {
            return Err(AgentError::invalid_agent("agent name must not be empty"));
        }

        let model = self.model.ok_or_else(|| {
            AgentError::invalid_agent(format!("agent '{}' has no model settings", self.name))
        })?;
        if model.model.trim().is_empty() {
            return Err(AgentError::invalid_agent(format!(
                "agent '{}' has an empty model identifier",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for delegate in &self.delegates {
            if !seen.insert(delegate.name.to_lowercase()) {
                return Err(AgentError::invalid_agent(format!(
                    "agent '{}' has two delegates named '{}'",
                    self.name, delegate.name
                )));
            }
        }

        Ok(Agent {
            name: self.name,
            instructions: self.instructions,
            model,
            output_schema: self.output_schema,
            handoff_description: self.handoff_description,
            delegates: self.delegates,
            guards: self.guards,
        })
    }

    /// Build and wrap in an `Arc`
    pub fn build_shared(self) -> AgentResult<Arc<Agent>> {
        self.build().map(Arc::new)
    }
}
