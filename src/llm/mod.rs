//! Model client layer
//!
//! A provider-agnostic [`LlmProvider`] trait, the OpenAI-compatible client used
//! in production and the strict structured-output decoder.

pub mod provider;
pub mod providers;
pub mod structured;

pub use provider::*;
pub use providers::*;
pub use structured::{OutputSchema, StructuredOutput};
