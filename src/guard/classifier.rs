//! Model-backed input classification

use super::{GuardVerdict, InputGuard};
use crate::agent::{Agent, ModelSettings, Runner};
use crate::error::{AgentError, AgentResult};
use crate::guard_span;
use crate::llm::structured::StructuredOutput;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Structured answer of a classifier agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationResult {
    /// Whether the input belongs to the category the classifier checks for
    pub is_target_category: bool,
    /// Short free-text justification
    pub rationale: String,
}

/// Runs a classifier agent and decodes its answer strictly
///
/// Exactly one model request per call when schema retries are disabled.
#[derive(Clone)]
pub struct Classifier {
    agent: Arc<Agent>,
    runner: Runner,
}

impl Classifier {
    /// Wrap an agent whose output schema is [`ClassificationResult`]
    pub fn new(agent: Arc<Agent>, runner: Runner) -> AgentResult<Self> {
        let expected = ClassificationResult::output_schema();
        match agent.output_schema() {
            Some(schema) if schema.name == expected.name => Ok(Self { agent, runner }),
            _ => Err(AgentError::invalid_agent(format!(
                "classifier agent '{}' must declare the {} output schema",
                agent.name(),
                expected.name
            ))),
        }
    }

    /// Build the classifier agent from instructions
    pub fn from_instructions(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: ModelSettings,
        runner: Runner,
    ) -> AgentResult<Self> {
        let agent = Agent::builder(name)
            .instructions(instructions)
            .model(model)
            .output::<ClassificationResult>()
            .build_shared()?;
        Self::new(agent, runner)
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    pub async fn classify(&self, input: &str) -> AgentResult<ClassificationResult> {
        let result = self
            .runner
            .run_structured::<ClassificationResult>(&self.agent, input)
            .await?;

        debug!(
            classifier = self.agent.name(),
            is_target_category = result.is_target_category,
            rationale = %result.rationale,
            "Input classified"
        );
        Ok(result)
    }
}

/// Guard that trips when the classifier says the input is off-topic
#[derive(Clone)]
pub struct ClassifierGuard {
    name: String,
    classifier: Classifier,
}

impl ClassifierGuard {
    pub fn new(name: impl Into<String>, classifier: Classifier) -> Self {
        Self {
            name: name.into(),
            classifier,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

#[async_trait]
impl InputGuard for ClassifierGuard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, input: &str) -> AgentResult<GuardVerdict> {
        let span = guard_span!(guard = %self.name);
        async {
            let result = self.classifier.classify(input).await?;
            let verdict = GuardVerdict::from_classification(&self.name, result);

            if verdict.tripwire_triggered {
                info!(guard = %self.name, "Tripwire triggered");
            } else {
                debug!(guard = %self.name, "Guard passed");
            }
            Ok(verdict)
        }
        .instrument(span)
        .await
    }
}
