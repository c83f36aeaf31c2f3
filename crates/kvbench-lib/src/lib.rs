//! Core of the KV-cache benchmark harness.
//!
//! Data flows prompt generator → dispatcher → executor → aggregator, with the
//! scenario runner sequencing rounds and the comparison engine turning round
//! summaries into verdicts.

pub mod aggregator;
pub mod compare;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod output;
pub mod prompt;
pub mod runner;
pub mod stages;

pub use error::{ComparisonError, ConfigError, ExecutorError, OutputError, RunnerError};
