//! Model-driven delegate selection
//!
//! The router agent's model receives the router's instructions, a catalogue of
//! its delegates and the input, and answers with a [`HandoffDecision`]. Low
//! temperature keeps the choice stable across identical inputs.

use super::{DelegateSelector, SelectionContext, SelectionDecision};
use crate::agent::{Agent, ModelSettings, Runner};
use crate::error::AgentResult;
use crate::llm::provider::Message;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Structured answer of the router's model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct HandoffDecision {
    /// Exact name of the chosen delegate, or null when none fits
    pub delegate: Option<String>,
    pub reasoning: String,
}

/// Lets the router agent's model pick a delegate
#[derive(Debug, Clone)]
pub struct ModelSelector {
    temperature: f32,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSelector {
    pub fn new() -> Self {
        Self { temperature: 0.1 }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Router instructions followed by the delegate catalogue
    fn build_prompt(router: &Agent) -> String {
        let mut prompt = String::new();
        if !router.instructions().is_empty() {
            prompt.push_str(router.instructions());
            prompt.push_str("\n\n");
        }

        prompt.push_str("Available delegates:\n");
        for delegate in router.delegates() {
            let description = delegate
                .handoff_description()
                .or_else(|| delegate.instructions().lines().next())
                .unwrap_or_default();
            prompt.push_str(&format!("- {}: {}\n", delegate.name(), description));
        }

        prompt.push_str(
            "\nChoose the one delegate that should answer the user's input. \
             Set `delegate` to its exact name, or to null if none of them fits, \
             and explain the choice in `reasoning`.",
        );
        prompt
    }
}

#[async_trait]
impl DelegateSelector for ModelSelector {
    fn name(&self) -> &str {
        "model"
    }

    async fn select(
        &self,
        runner: &Runner,
        context: &SelectionContext<'_>,
    ) -> AgentResult<SelectionDecision> {
        let router = context.router;
        let messages = vec![
            Message::system(Self::build_prompt(router)),
            Message::user(context.input),
        ];
        let model = ModelSettings {
            temperature: Some(self.temperature),
            ..router.model().clone()
        };

        let decision: HandoffDecision = runner
            .complete_structured(router.name(), &model, messages)
            .await?;

        debug!(
            router = router.name(),
            delegate = ?decision.delegate,
            reasoning = %decision.reasoning,
            "Model handoff decision"
        );

        Ok(match decision.delegate {
            Some(name) if !name.trim().is_empty() => SelectionDecision::RouteToAgent {
                delegate: name,
                reason: decision.reasoning,
            },
            _ => SelectionDecision::NoRoute {
                reason: format!("model selected no delegate: {}", decision.reasoning),
            },
        })
    }
}
