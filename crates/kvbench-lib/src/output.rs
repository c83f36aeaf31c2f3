//! Persisted run output
//!
//! Each run writes two pretty-printed JSON arrays: every request metric, and
//! every round summary. Both are keyed by scenario and round number and are
//! the only hand-off to report generation.

use crate::error::OutputError;
use chrono::{DateTime, TimeZone};
use kvbench_types::{RequestMetric, RoundSummary, RunMode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Paths of the two files written for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunArtifacts {
    pub results_path: PathBuf,
    pub stats_path: PathBuf,
}

/// The scenario name, or `{first}_etc` when a run covers several.
pub fn scenario_prefix(scenarios: &[String]) -> String {
    match scenarios {
        [] => "run".to_string(),
        [only] => only.clone(),
        [first, ..] => format!("{first}_etc"),
    }
}

/// Common file-name stem, e.g. `with-cache_cold_start_7b`.
pub fn artifact_stem(mode: RunMode, scenarios: &[String], model_size: &str) -> String {
    format!("{}_{}_{}", mode.as_str(), scenario_prefix(scenarios), model_size)
}

/// Writes the results and stats files for a run into `dir`, creating it if needed.
pub fn save_run<Tz: TimeZone>(
    dir: &Path,
    stem: &str,
    metrics: &[RequestMetric],
    summaries: &[RoundSummary],
    timestamp: &DateTime<Tz>,
) -> Result<RunArtifacts, OutputError>
where
    Tz::Offset: std::fmt::Display,
{
    fs::create_dir_all(dir).map_err(|source| OutputError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let ts = timestamp.format(TIMESTAMP_FORMAT).to_string();
    let artifacts = RunArtifacts {
        results_path: dir.join(format!("{stem}_results_{ts}.json")),
        stats_path: dir.join(format!("{stem}_stats_{ts}.json")),
    };

    write_json(&artifacts.results_path, metrics)?;
    write_json(&artifacts.stats_path, summaries)?;

    info!(
        results = %artifacts.results_path.display(),
        stats = %artifacts.stats_path.display(),
        requests = metrics.len(),
        rounds = summaries.len(),
        "Saved run output"
    );
    Ok(artifacts)
}

pub fn load_summaries(path: &Path) -> Result<Vec<RoundSummary>, OutputError> {
    read_json(path)
}

pub fn load_metrics(path: &Path) -> Result<Vec<RequestMetric>, OutputError> {
    read_json(path)
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), OutputError> {
    let content = serde_json::to_string_pretty(value).map_err(|source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, OutputError> {
    let content = fs::read_to_string(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| OutputError::Json {
        path: path.to_path_buf(),
        source,
    })
}
