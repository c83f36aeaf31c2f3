use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use kvbench_lib::{
    compare,
    config::{BenchConfig, TargetThresholds},
    dispatcher::InterruptFlag,
    executor::OpenAiStreamClient,
    output, stages,
};
use kvbench_runner::{RunOptions, RunStatus, renderer, run_scenarios};
use kvbench_types::RunMode;
use opentelemetry::global::{self};
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace as sdktrace;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, subscriber, warn};
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

/// Measures the KV-cache effect on a streaming LLM inference endpoint.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run scenarios round by round and persist the results.
    Run {
        /// Path to the benchmark YAML configuration.
        #[arg(short, long, default_value = "configs/kvbench.yaml")]
        config: PathBuf,

        /// Scenario to run; repeat for several. Defaults to every configured scenario.
        #[arg(short, long = "scenario")]
        scenarios: Vec<String>,

        /// Run every configured scenario.
        #[arg(long, conflicts_with = "scenarios")]
        all: bool,

        /// Label the run as a baseline against a server without caching.
        #[arg(long)]
        baseline: bool,

        /// Override the maximum number of in-flight requests.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Override the number of rounds per scenario.
        #[arg(long)]
        rounds: Option<u32>,
    },

    /// Compare two rounds of every scenario in a stats file.
    Compare {
        /// Stats JSON written by `run`.
        stats: PathBuf,

        #[arg(long, default_value_t = 1)]
        baseline_round: u32,

        #[arg(long, default_value_t = 2)]
        candidate_round: u32,

        /// Read comparison targets from this configuration.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the comparison as JSON instead of a tree.
        #[arg(long)]
        json: bool,
    },

    /// Compare the same scenarios measured on two serving topologies.
    CompareTopologies {
        /// Stats JSON of the reference topology.
        reference: PathBuf,

        /// Stats JSON of the candidate topology.
        candidate: PathBuf,

        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List the scenarios of a configuration.
    ListScenarios {
        #[arg(short, long, default_value = "configs/kvbench.yaml")]
        config: PathBuf,
    },
}

/// Initializes console logging and the OpenTelemetry pipeline for tracing.
fn init_tracing() -> Result<sdktrace::SdkTracerProvider> {
    let provider = sdktrace::SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name("kvbench-runner")
                .build(),
        )
        .build();
    let tracer = provider.tracer("kvbench-runner");
    global::set_tracer_provider(provider.clone());

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kvbench_lib=debug,kvbench_runner=debug"));
    let subscriber = Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(tracing_opentelemetry::layer().with_tracer(tracer));

    subscriber::set_global_default(subscriber)
        .context("Failed to set global default tracing subscriber")?;

    Ok(provider)
}

fn load_targets(config: Option<&Path>) -> Result<TargetThresholds> {
    match config {
        Some(path) => Ok(BenchConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?
            .targets),
        None => Ok(TargetThresholds::default()),
    }
}

async fn run_command(
    config_path: &Path,
    scenarios: Vec<String>,
    all: bool,
    baseline: bool,
    concurrency: Option<usize>,
    rounds: Option<u32>,
) -> Result<RunStatus> {
    let mut config = BenchConfig::from_file(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    config.apply_env_overrides();
    if let Some(concurrency) = concurrency {
        config.execution.concurrency = Some(concurrency);
    }
    if let Some(rounds) = rounds {
        config.execution.round_count = rounds;
    }
    config.validate().context("Invalid configuration")?;

    let selected = if all || scenarios.is_empty() {
        config.scenarios.keys().cloned().collect::<Vec<_>>()
    } else {
        scenarios
    };
    if selected.is_empty() {
        bail!("No scenarios configured in {}", config_path.display());
    }

    let options = RunOptions {
        scenarios: selected,
        mode: if baseline {
            RunMode::Baseline
        } else {
            RunMode::WithCache
        },
    };

    let interrupt = InterruptFlag::new();
    let flag = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight requests finish");
            flag.trigger();
        }
    });

    let client = OpenAiStreamClient::new(config.endpoint.api_key.clone())
        .context("Failed to create HTTP client")?;
    let report = run_scenarios(&config, Arc::new(client), &options, interrupt).await?;

    for run in &report.runs {
        println!("{}", renderer::render_rounds(&run.scenario, &run.summaries)?);
        if config.synthetic_stage_split {
            if let Some(last) = run.summaries.last() {
                let estimate = stages::estimate_stages(last);
                println!("{}", renderer::render_stage_estimate(last, &estimate)?);
            }
        }
    }

    if let Some(last_round) = options_last_round(&config) {
        let summaries: Vec<_> = report
            .runs
            .iter()
            .flat_map(|r| r.summaries.clone())
            .collect();
        if !summaries.is_empty() {
            let comparison = compare::compare_multi(&summaries, 1, last_round, &config.targets)?;
            println!("{}", renderer::render_multi_report(&comparison)?);
        }
    }

    if let Some(artifacts) = &report.artifacts {
        info!(
            results = %artifacts.results_path.display(),
            stats = %artifacts.stats_path.display(),
            "Results saved"
        );
    }
    for failure in &report.failures {
        warn!(scenario = %failure.scenario, reason = %failure.reason, "Scenario did not complete");
    }

    Ok(report.status())
}

/// The round compared against round 1, if the run has more than one.
fn options_last_round(config: &BenchConfig) -> Option<u32> {
    (config.execution.round_count > 1).then_some(config.execution.round_count)
}

fn compare_command(
    stats: &Path,
    baseline_round: u32,
    candidate_round: u32,
    config: Option<&Path>,
    json: bool,
) -> Result<RunStatus> {
    let targets = load_targets(config)?;
    let summaries = output::load_summaries(stats)
        .with_context(|| format!("Failed to read stats file {}", stats.display()))?;
    let report = compare::compare_multi(&summaries, baseline_round, candidate_round, &targets)?;

    if json {
        let results: Vec<_> = report.successes().collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("{}", renderer::render_multi_report(&report)?);
    }

    if report.failures().next().is_some() {
        Ok(RunStatus::ScenarioFailed)
    } else {
        Ok(RunStatus::Completed)
    }
}

fn compare_topologies_command(
    reference: &Path,
    candidate: &Path,
    config: Option<&Path>,
) -> Result<RunStatus> {
    let targets = load_targets(config)?;
    let reference_summaries = output::load_summaries(reference)
        .with_context(|| format!("Failed to read stats file {}", reference.display()))?;
    let candidate_summaries = output::load_summaries(candidate)
        .with_context(|| format!("Failed to read stats file {}", candidate.display()))?;

    let comparisons =
        compare::compare_topologies(&reference_summaries, &candidate_summaries, &targets)?;
    println!("{}", renderer::render_topologies(&comparisons)?);

    if comparisons.iter().any(|c| c.is_err()) {
        Ok(RunStatus::ScenarioFailed)
    } else {
        Ok(RunStatus::Completed)
    }
}

fn list_scenarios_command(config_path: &Path) -> Result<RunStatus> {
    let config = BenchConfig::load(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    for (name, scenario) in &config.scenarios {
        let kind = scenario.strategy(name)?.kind();
        println!(
            "{name} [{kind}] {} requests{}",
            scenario.num_requests,
            scenario
                .description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default()
        );
    }
    Ok(RunStatus::Completed)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let provider = init_tracing()?;

    let status = match cli.command {
        Command::Run {
            config,
            scenarios,
            all,
            baseline,
            concurrency,
            rounds,
        } => run_command(&config, scenarios, all, baseline, concurrency, rounds).await,
        Command::Compare {
            stats,
            baseline_round,
            candidate_round,
            config,
            json,
        } => compare_command(
            &stats,
            baseline_round,
            candidate_round,
            config.as_deref(),
            json,
        ),
        Command::CompareTopologies {
            reference,
            candidate,
            config,
        } => compare_topologies_command(&reference, &candidate, config.as_deref()),
        Command::ListScenarios { config } => list_scenarios_command(&config),
    };

    if let Err(e) = provider.shutdown() {
        eprintln!("[kvbench] Failed to shut down tracer provider: {e}");
    }

    let status = status?;
    if status != RunStatus::Completed {
        std::process::exit(status.exit_code());
    }
    Ok(())
}
