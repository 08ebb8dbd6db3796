//! Observability: structured logging and the span macros used by the pipeline

pub mod logging;

pub use logging::{LogFormat, init_logging, init_logging_from_env, parse_level};

// Span macros for structured logging
pub use logging::{guard_span, run_span, tool_span};
