//! Delegate selection
//!
//! When an agent with delegates accepts an input, a [`DelegateSelector`] picks
//! which delegate answers it. Two policies exist:
//!
//! - [`ModelSelector`]: the router agent's model names a delegate, guided by the
//!   router's instructions and each delegate's handoff description
//! - [`RuleSelector`]: a fixed table maps passing guards to delegates
//!
//! Either way, a selection that names no delegate ends the run with
//! [`AgentError::NoMatchingDelegate`](crate::error::AgentError::NoMatchingDelegate).

use crate::agent::{Agent, Runner};
use crate::config::{RouterSection, SelectionPolicy};
use crate::error::AgentResult;
use crate::guard::GuardVerdict;
use async_trait::async_trait;
use std::sync::Arc;

pub mod model_selector;
pub mod rule_selector;

pub use model_selector::{HandoffDecision, ModelSelector};
pub use rule_selector::RuleSelector;

/// What a selector sees
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub router: &'a Agent,
    pub input: &'a str,
    /// Verdicts of the router's guards, all passing
    pub verdicts: &'a [GuardVerdict],
}

/// Outcome of delegate selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionDecision {
    /// Hand off to the named delegate
    RouteToAgent { delegate: String, reason: String },
    /// No delegate fits
    NoRoute { reason: String },
}

/// Picks the delegate that answers an accepted input
#[async_trait]
pub trait DelegateSelector: Send + Sync {
    fn name(&self) -> &str;

    async fn select(
        &self,
        runner: &Runner,
        context: &SelectionContext<'_>,
    ) -> AgentResult<SelectionDecision>;
}

/// Selector for the configured policy
pub fn selector_from_config(section: &RouterSection) -> Arc<dyn DelegateSelector> {
    match section.selection {
        SelectionPolicy::Model => Arc::new(ModelSelector::new()),
        SelectionPolicy::Rules => Arc::new(RuleSelector::from_section(section)),
    }
}
