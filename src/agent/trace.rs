//! Run results, trace events and the run state machine

use crate::error::AgentResult;
use crate::guard::GuardVerdict;
use crate::llm::structured::StructuredOutput;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Where a run is in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    GuardEval,
    Routing,
    Delegated,
    Answered,
    Rejected,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Answered | RunState::Rejected | RunState::Failed)
    }

    /// Allowed transitions
    ///
    /// `Delegated -> GuardEval` is the delegate's own guard stage.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, GuardEval) => true,
            (GuardEval, Rejected | Routing | Answered) => true,
            (Routing, Delegated) => true,
            (Delegated, GuardEval | Answered) => true,
            _ => false,
        }
    }

    /// Move to `next`, logging the transition
    pub fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.can_transition_to(next),
            "invalid run state transition {self:?} -> {next:?}"
        );
        debug!(from = ?*self, to = ?next, "Run state transition");
        *self = next;
    }
}

/// Something that happened during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    AgentStarted {
        agent: String,
    },
    GuardEvaluated {
        agent: String,
        verdict: GuardVerdict,
    },
    DelegateSelected {
        router: String,
        delegate: String,
        reason: String,
    },
    ToolInvoked {
        agent: String,
        tool: String,
        succeeded: bool,
    },
    AgentAnswered {
        agent: String,
    },
}

/// A timestamped trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// Ordered record of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn push(&mut self, event: TraceEvent) {
        self.entries.push(TraceEntry {
            at: Utc::now(),
            event,
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.entries.iter().map(|e| &e.event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verdicts in evaluation order
    pub fn guard_verdicts(&self) -> Vec<&GuardVerdict> {
        self.events()
            .filter_map(|e| match e {
                TraceEvent::GuardEvaluated { verdict, .. } => Some(verdict),
                _ => None,
            })
            .collect()
    }

    /// Names of the delegates handed off to, in order
    pub fn handoffs(&self) -> Vec<&str> {
        self.events()
            .filter_map(|e| match e {
                TraceEvent::DelegateSelected { delegate, .. } => Some(delegate.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_invocations(&self) -> usize {
        self.events()
            .filter(|e| matches!(e, TraceEvent::ToolInvoked { .. }))
            .count()
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub final_output: String,
    /// Agent that produced `final_output`
    pub last_agent: String,
    pub trace: Trace,
}

impl RunResult {
    /// Decode the final output as a structured type
    pub fn final_output_as<T: StructuredOutput>(&self) -> AgentResult<T> {
        T::decode(&self.final_output)
    }

    /// The last delegate handed off to, if any
    pub fn delegate(&self) -> Option<&str> {
        self.trace.handoffs().last().copied()
    }
}
