//! Input guards
//!
//! A guard inspects the raw user input before an agent accepts it and returns a
//! [`GuardVerdict`]. A verdict with `tripwire_triggered` set aborts the run with
//! [`AgentError::GuardRejection`](crate::error::AgentError::GuardRejection); no
//! later guard or delegate sees the input.

use crate::error::AgentResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod classifier;

pub use classifier::{ClassificationResult, Classifier, ClassifierGuard};

/// Result of one guard evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardVerdict {
    /// Name of the guard that produced this verdict
    pub guard: String,
    /// Guard-specific payload, a serialized [`ClassificationResult`] for classifier guards
    pub info: Value,
    pub tripwire_triggered: bool,
}

impl GuardVerdict {
    pub fn passed(guard: impl Into<String>, info: Value) -> Self {
        Self {
            guard: guard.into(),
            info,
            tripwire_triggered: false,
        }
    }

    pub fn tripped(guard: impl Into<String>, info: Value) -> Self {
        Self {
            guard: guard.into(),
            info,
            tripwire_triggered: true,
        }
    }

    /// The tripwire fires exactly when the input is outside the target category
    pub fn from_classification(guard: impl Into<String>, result: ClassificationResult) -> Self {
        let tripwire_triggered = !result.is_target_category;
        let info = serde_json::to_value(&result).unwrap_or(Value::Null);
        Self {
            guard: guard.into(),
            info,
            tripwire_triggered,
        }
    }

    /// The classification behind this verdict, if it came from a classifier guard
    pub fn classification(&self) -> Option<ClassificationResult> {
        serde_json::from_value(self.info.clone()).ok()
    }
}

/// A check applied to user input before an agent accepts it
#[async_trait]
pub trait InputGuard: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, input: &str) -> AgentResult<GuardVerdict>;
}
