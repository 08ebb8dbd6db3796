//! Deterministic guard-to-delegate selection

use super::{DelegateSelector, SelectionContext, SelectionDecision};
use crate::agent::Runner;
use crate::config::RouterSection;
use crate::error::AgentResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Maps the name of a passing guard to a delegate name
///
/// Verdicts are consulted in guard order; the first guard with a rule wins.
/// No model call is made.
#[derive(Debug, Clone, Default)]
pub struct RuleSelector {
    rules: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl RuleSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_section(section: &RouterSection) -> Self {
        Self {
            rules: section.rules.clone(),
            fallback: None,
        }
    }

    pub fn rule(mut self, guard: impl Into<String>, delegate: impl Into<String>) -> Self {
        self.rules.insert(guard.into(), delegate.into());
        self
    }

    /// Delegate used when no guard has a rule
    pub fn fallback(mut self, delegate: impl Into<String>) -> Self {
        self.fallback = Some(delegate.into());
        self
    }

    /// Pure decision over the context, without validating delegate names
    pub fn decide(&self, context: &SelectionContext<'_>) -> SelectionDecision {
        for verdict in context.verdicts.iter().filter(|v| !v.tripwire_triggered) {
            if let Some(delegate) = self.rules.get(&verdict.guard) {
                let reason = format!("guard '{}' passed", verdict.guard);
                info!(guard = %verdict.guard, delegate = %delegate, "Rule matched");
                return SelectionDecision::RouteToAgent {
                    delegate: delegate.clone(),
                    reason,
                };
            }
            debug!(guard = %verdict.guard, "No rule for guard");
        }

        match &self.fallback {
            Some(delegate) => SelectionDecision::RouteToAgent {
                delegate: delegate.clone(),
                reason: "no rule matched, using fallback".to_string(),
            },
            None => {
                let reason = "no rule matched the passing guards".to_string();
                warn!(router = context.router.name(), "{}", reason);
                SelectionDecision::NoRoute { reason }
            }
        }
    }
}

#[async_trait]
impl DelegateSelector for RuleSelector {
    fn name(&self) -> &str {
        "rules"
    }

    async fn select(
        &self,
        _runner: &Runner,
        context: &SelectionContext<'_>,
    ) -> AgentResult<SelectionDecision> {
        Ok(self.decide(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, ModelSettings};
    use crate::guard::GuardVerdict;
    use serde_json::json;

    fn router() -> Agent {
        Agent::builder("Enrutador")
            .model(ModelSettings::new("gpt-4o-mini"))
            .delegate(
                Agent::builder("Experto en Matemáticas")
                    .model(ModelSettings::new("gpt-4o-mini"))
                    .build_shared()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_first_matching_guard_wins() {
        let router = router();
        let verdicts = vec![
            GuardVerdict::passed("longitud", json!({})),
            GuardVerdict::passed("solo_matematicas", json!({})),
        ];
        let context = SelectionContext {
            router: &router,
            input: "2+2",
            verdicts: &verdicts,
        };

        let selector = RuleSelector::new().rule("solo_matematicas", "Experto en Matemáticas");
        match selector.decide(&context) {
            SelectionDecision::RouteToAgent { delegate, reason } => {
                assert_eq!(delegate, "Experto en Matemáticas");
                assert!(reason.contains("solo_matematicas"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_no_rule_is_no_route() {
        let router = router();
        let verdicts = vec![GuardVerdict::passed("longitud", json!({}))];
        let context = SelectionContext {
            router: &router,
            input: "2+2",
            verdicts: &verdicts,
        };

        let selector = RuleSelector::new().rule("solo_matematicas", "Experto en Matemáticas");
        assert!(matches!(
            selector.decide(&context),
            SelectionDecision::NoRoute { .. }
        ));

        let selector = selector.fallback("Experto en Matemáticas");
        assert!(matches!(
            selector.decide(&context),
            SelectionDecision::RouteToAgent { .. }
        ));
    }

    #[test]
    fn test_from_section() {
        let section = RouterSection {
            rules: BTreeMap::from([("a".to_string(), "B".to_string())]),
            ..RouterSection::default()
        };
        let selector = RuleSelector::from_section(&section);
        assert_eq!(selector.rules.get("a").map(String::as_str), Some("B"));
    }
}
