//! Agent handoff pipeline
//!
//! Classify-then-route orchestration over an OpenAI-compatible completion API:
//! input guards backed by a classifier agent, a router that hands accepted input
//! to one of its delegates, strict structured output, and tool sessions over a
//! stdio subprocess.
//!
//! # Overview
//!
//! - [`agent`]: immutable [`Agent`] definitions and the [`Runner`]
//! - [`guard`]: [`InputGuard`](guard::InputGuard), the classifier and its verdicts
//! - [`routing`]: delegate selection policies
//! - [`llm`]: the model client trait, the OpenAI-compatible client and strict decoding
//! - [`tools`]: tool sessions, argument validation and the stdio transport
//! - [`console`] and [`presets`]: what the `agent-handoff` binary runs
//!
//! # Quick Start
//!
//! ```no_run
//! use agent_handoff::agent::{ModelSettings, Runner};
//! use agent_handoff::llm::{OpenAiConfig, OpenAiProvider};
//! use agent_handoff::{presets, AppConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_env()?;
//! let provider = OpenAiProvider::new(OpenAiConfig::from_app_config(&config))?;
//! let runner = Runner::from_config(Arc::new(provider), &config);
//!
//! let math = presets::math_router(&runner, &ModelSettings::new("gpt-4o-mini"))?;
//! match runner.run(&math.router, "¿Cuánto es 2+2?").await {
//!     Ok(result) => println!("{}", result.final_output),
//!     Err(e) if e.is_guard_rejection() => println!("{}", presets::MATH_REJECTION_MESSAGE),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod console;
pub mod error;
pub mod guard;
pub mod llm;
pub mod observability;
pub mod presets;
pub mod routing;
pub mod testing;
pub mod tools;

pub use agent::{Agent, RunResult, Runner};
pub use config::*;
pub use error::{AgentError, AgentResult};
