//! Error types for the benchmark core

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unreadable benchmark configuration. Always fatal before any round runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Scenario '{scenario}' is not valid: {reason}")]
    InvalidScenario { scenario: String, reason: String },

    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),
}

impl ConfigError {
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn scenario<S: Into<String>, R: Into<String>>(scenario: S, reason: R) -> Self {
        Self::InvalidScenario {
            scenario: scenario.into(),
            reason: reason.into(),
        }
    }
}

/// Failure of one streaming call. Recorded on the request metric, never propagated.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Malformed stream chunk: {0}")]
    Protocol(String),

    #[error("Request timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Failures that stop a scenario from completing
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Scenario '{scenario}' interrupted after {completed_rounds} completed round(s)")]
    Interrupted {
        scenario: String,
        completed_rounds: u32,
    },
}

/// Comparison input problems, scoped to a single scenario
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ComparisonError {
    #[error("Scenario '{scenario}' has no round {round}")]
    MissingRound { scenario: String, round: u32 },

    #[error("No round summaries to compare")]
    EmptyInput,
}

/// Failures while persisting or loading run output
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
