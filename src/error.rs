//! Error types for the classify-then-route pipeline
//!
//! Every collaborator failure is mapped onto one of a small set of typed kinds.
//! Only [`AgentError::GuardRejection`] is meant to be handled gracefully by callers;
//! everything else is a hard failure of the run.

use crate::guard::GuardVerdict;
use crate::llm::provider::LlmError;
use crate::tools::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model unavailable: {message}")]
    ModelUnavailable { message: String },

    #[error("Schema violation in '{schema}': {message}")]
    SchemaViolation { schema: String, message: String },

    #[error("Input rejected by guard '{guard}'")]
    GuardRejection {
        guard: String,
        verdict: Box<GuardVerdict>,
    },

    #[error("Tool session fault: {message}")]
    ToolSessionFault { message: String },

    #[error("No matching delegate for router '{router}': {reason}")]
    NoMatchingDelegate { router: String, reason: String },

    #[error("Tool loop exceeded {max} model turns")]
    ToolLoopExceeded { max: usize },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: String },

    #[error("Invalid agent definition: {message}")]
    InvalidAgent { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AgentError {
    /// Create model unavailable error
    pub fn model_unavailable<S: Into<String>>(message: S) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    /// Create schema violation error
    pub fn schema_violation<S: Into<String>, M: Into<String>>(schema: S, message: M) -> Self {
        Self::SchemaViolation {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Create guard rejection error carrying the tripped verdict
    pub fn guard_rejection(verdict: GuardVerdict) -> Self {
        Self::GuardRejection {
            guard: verdict.guard.clone(),
            verdict: Box::new(verdict),
        }
    }

    /// Create tool session fault
    pub fn tool_session_fault<S: Into<String>>(message: S) -> Self {
        Self::ToolSessionFault {
            message: message.into(),
        }
    }

    /// Create no matching delegate error
    pub fn no_matching_delegate<R: Into<String>, S: Into<String>>(router: R, reason: S) -> Self {
        Self::NoMatchingDelegate {
            router: router.into(),
            reason: reason.into(),
        }
    }

    /// Create cancellation error
    pub fn cancelled<S: Into<String>>(stage: S) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Create invalid agent error
    pub fn invalid_agent<S: Into<String>>(message: S) -> Self {
        Self::InvalidAgent {
            message: message.into(),
        }
    }

    /// True for the one error kind callers are expected to recover from
    pub fn is_guard_rejection(&self) -> bool {
        matches!(self, AgentError::GuardRejection { .. })
    }

    /// The tripped verdict, if this is a guard rejection
    pub fn rejection_verdict(&self) -> Option<&GuardVerdict> {
        match self {
            AgentError::GuardRejection { verdict, .. } => Some(verdict),
            _ => None,
        }
    }

    /// Error message safe to show to a user
    pub fn user_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

impl From<LlmError> for AgentError {
    fn from(error: LlmError) -> Self {
        AgentError::model_unavailable(error.to_string())
    }
}

impl From<ToolError> for AgentError {
    fn from(error: ToolError) -> Self {
        AgentError::tool_session_fault(error.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static BEARER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"));

const MAX_MESSAGE_LEN: usize = 500;

/// Redact credentials and truncate long messages before showing them
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = BEARER_PATTERN
        .replace_all(&sanitized, "Bearer ***")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for pipeline operations
pub type AgentResult<T> = Result<T, AgentError>;
