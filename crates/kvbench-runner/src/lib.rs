use anyhow::{Context, Result};
use chrono::Local;
use kvbench_lib::{
    config::BenchConfig,
    dispatcher::{InterruptFlag, RoundDispatcher},
    error::RunnerError,
    executor::{ExecutorSettings, RequestExecutor, StreamingClient},
    output::{self, RunArtifacts},
    runner::{RunnerSettings, ScenarioRun, ScenarioRunner},
};
use kvbench_types::{RunMode, Scenario};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod renderer;

/// Which scenarios to run and how to label them
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Scenario names in execution order
    pub scenarios: Vec<String>,
    pub mode: RunMode,
}

/// A scenario that ran but could not produce a usable result
#[derive(Debug, Clone)]
pub struct ScenarioFailure {
    pub scenario: String,
    pub reason: String,
}

/// Process-level result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    ScenarioFailed,
    Interrupted,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::ScenarioFailed => 1,
            RunStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub runs: Vec<ScenarioRun>,
    pub failures: Vec<ScenarioFailure>,
    pub interrupted: bool,
    /// Files written for the completed scenarios, if any completed
    pub artifacts: Option<RunArtifacts>,
}

impl BatchReport {
    pub fn status(&self) -> RunStatus {
        if self.interrupted {
            RunStatus::Interrupted
        } else if !self.failures.is_empty() {
            RunStatus::ScenarioFailed
        } else {
            RunStatus::Completed
        }
    }
}

/// Runs the selected scenarios one after another and persists their output.
///
/// All scenarios are generated up front so configuration problems surface
/// before the first request. A scenario whose every round failed is reported
/// as a failure; the remaining scenarios still run.
pub async fn run_scenarios<C: StreamingClient>(
    config: &BenchConfig,
    client: Arc<C>,
    options: &RunOptions,
    interrupt: InterruptFlag,
) -> Result<BatchReport> {
    let run_id = uuid::Uuid::now_v7();
    let scenarios: Vec<Scenario> = options
        .scenarios
        .iter()
        .map(|name| config.build_scenario(name))
        .collect::<Result<_, _>>()
        .context("Failed to generate scenarios")?;

    let executor = RequestExecutor::new(
        client,
        ExecutorSettings::new(config.endpoint.model_name.clone())
            .with_max_tokens(config.model.max_tokens)
            .with_temperature(config.model.temperature)
            .with_request_timeout(config.endpoint.request_timeout()),
    );
    let settings = RunnerSettings {
        default_endpoint: config.endpoint.base_url.clone(),
        wait_between_rounds: config.execution.wait_between_rounds(),
        mode: options.mode,
    };

    info!(
        run_id = %run_id,
        scenarios = scenarios.len(),
        mode = options.mode.as_str(),
        model = %config.endpoint.model_name,
        "Starting benchmark run"
    );

    let mut report = BatchReport {
        runs: Vec::new(),
        failures: Vec::new(),
        interrupted: false,
        artifacts: None,
    };

    for (i, scenario) in scenarios.iter().enumerate() {
        if i > 0 {
            let wait = config.execution.wait_between_scenarios();
            if !wait.is_zero() && !interrupt.is_triggered() {
                info!(seconds = wait.as_secs(), "Waiting before next scenario");
            }
            if interrupt.sleep(wait).await {
                warn!(next = %scenario.id, "Run interrupted between scenarios");
                report.interrupted = true;
                break;
            }
        }

        let dispatcher = RoundDispatcher::new(config.execution.concurrency, interrupt.clone());
        let mut runner = ScenarioRunner::new(&executor, dispatcher, settings.clone());
        match runner.run(scenario).await {
            Ok(run) => {
                if run.summaries.iter().all(|s| s.is_degenerate()) {
                    error!(scenario = %scenario.id, "Every request of every round failed");
                    report.failures.push(ScenarioFailure {
                        scenario: scenario.id.clone(),
                        reason: "every request failed".to_string(),
                    });
                }
                report.runs.push(run);
            }
            Err(RunnerError::Interrupted {
                scenario,
                completed_rounds,
            }) => {
                warn!(%scenario, completed_rounds, "Run interrupted");
                report.interrupted = true;
                break;
            }
            Err(err) => {
                error!(scenario = %scenario.id, error = %err, "Scenario failed");
                report.failures.push(ScenarioFailure {
                    scenario: scenario.id.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }

    if !report.runs.is_empty() {
        let names: Vec<String> = report.runs.iter().map(|r| r.scenario.clone()).collect();
        let metrics: Vec<_> = report.runs.iter().flat_map(|r| r.metrics.clone()).collect();
        let summaries: Vec<_> = report
            .runs
            .iter()
            .flat_map(|r| r.summaries.clone())
            .collect();
        let stem = output::artifact_stem(options.mode, &names, &config.model.size);
        let artifacts = output::save_run(
            &config.execution.output_dir,
            &stem,
            &metrics,
            &summaries,
            &Local::now(),
        )
        .context("Failed to save run output")?;
        report.artifacts = Some(artifacts);
    }

    info!(
        run_id = %run_id,
        completed = report.runs.len(),
        failed = report.failures.len(),
        interrupted = report.interrupted,
        "Benchmark run finished"
    );
    Ok(report)
}
