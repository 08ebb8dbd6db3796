//! Agents and the runner that executes them
//!
//! [`Agent`] values are immutable descriptions; [`Runner`] carries the model
//! client and limits and turns an input into a [`RunResult`].

pub mod definition;
pub mod runner;
pub mod trace;

pub use definition::{Agent, AgentBuilder, ModelSettings};
pub use runner::{Runner, RunnerSettings};
pub use trace::{RunResult, RunState, Trace, TraceEntry, TraceEvent};
