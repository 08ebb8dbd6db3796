//! Testing utilities and mock implementations
//!
//! Lets the pipeline run end to end without a model endpoint or a tool process.

pub mod mocks;

pub use mocks::*;
