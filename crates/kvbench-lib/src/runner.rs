//! Scenario round sequencing
//!
//! A runner moves through `Idle → RunningRound(1) → Waiting → RunningRound(2)
//! → … → Complete`. Round N+1 never starts before round N has fully drained.

use crate::aggregator::{self, RoundLabels};
use crate::compare;
use crate::dispatcher::RoundDispatcher;
use crate::error::{ConfigError, RunnerError};
use crate::executor::{RequestExecutor, RoundContext, StreamingClient};
use kvbench_types::{RequestMetric, RoundSummary, RunMode, Scenario};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    RunningRound(u32),
    /// Settling delay before `next_round`
    Waiting { next_round: u32 },
    Complete,
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Endpoint used for rounds without an override
    pub default_endpoint: String,
    pub wait_between_rounds: Duration,
    pub mode: RunMode,
}

/// Everything a completed scenario produced
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: String,
    /// One summary per round, in round order
    pub summaries: Vec<RoundSummary>,
    /// All request metrics ordered by round, then request id
    pub metrics: Vec<RequestMetric>,
}

pub struct ScenarioRunner<'a, C> {
    executor: &'a RequestExecutor<C>,
    dispatcher: RoundDispatcher,
    settings: RunnerSettings,
    state: RunnerState,
}

impl<'a, C: StreamingClient> ScenarioRunner<'a, C> {
    pub fn new(
        executor: &'a RequestExecutor<C>,
        dispatcher: RoundDispatcher,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            executor,
            dispatcher,
            settings,
            state: RunnerState::Idle,
        }
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn transition(&mut self, next: RunnerState) {
        debug!(from = ?self.state, to = ?next, "Runner state change");
        self.state = next;
    }

    /// Runs every round of `scenario` and returns the ordered summaries.
    ///
    /// An interrupted round yields no summary; the scenario is reported as
    /// incomplete instead.
    #[instrument(skip_all, fields(scenario = %scenario.id, rounds = scenario.round_count))]
    pub async fn run(&mut self, scenario: &Scenario) -> Result<ScenarioRun, RunnerError> {
        if scenario.round_count < 1 {
            return Err(ConfigError::scenario(&scenario.id, "needs at least one round").into());
        }
        if scenario.is_empty() {
            return Err(ConfigError::scenario(&scenario.id, "has no prompts").into());
        }

        let mut summaries: Vec<RoundSummary> = Vec::with_capacity(scenario.round_count as usize);
        let mut metrics = Vec::with_capacity(scenario.len() * scenario.round_count as usize);

        for round in 1..=scenario.round_count {
            self.transition(RunnerState::RunningRound(round));
            let endpoint = scenario
                .endpoint_for_round(round, &self.settings.default_endpoint)
                .to_string();
            info!(round, endpoint = %endpoint, requests = scenario.len(), "Starting round");

            let ctx = RoundContext {
                scenario: scenario.id.clone(),
                round_number: round,
                endpoint: endpoint.clone(),
            };
            let outcome = self
                .dispatcher
                .dispatch(self.executor, &ctx, &scenario.prompts)
                .await;

            if outcome.interrupted {
                return Err(RunnerError::Interrupted {
                    scenario: scenario.id.clone(),
                    completed_rounds: round - 1,
                });
            }

            let summary = aggregator::summarize(
                &outcome.metrics,
                outcome.elapsed,
                RoundLabels {
                    scenario: scenario.id.clone(),
                    round_number: round,
                    mode: self.settings.mode,
                    endpoint,
                },
            );
            info!(
                round,
                succeeded = summary.succeeded_requests,
                total = summary.total_requests,
                elapsed = summary.elapsed_wall_time,
                ttft_mean = summary.ttft.mean,
                ttft_p90 = summary.ttft.p90,
                tpot_mean = summary.tpot.mean,
                request_throughput = summary.request_throughput,
                token_throughput = summary.token_throughput,
                "Round complete"
            );
            if let Some(previous) = summaries.last() {
                log_progress(previous, &summary);
            }

            let mut round_metrics = outcome.metrics;
            round_metrics.sort_by_key(|m| m.request_id);
            metrics.extend(round_metrics);
            summaries.push(summary);

            if round < scenario.round_count {
                self.transition(RunnerState::Waiting {
                    next_round: round + 1,
                });
                if !self.settings.wait_between_rounds.is_zero() {
                    info!(
                        seconds = self.settings.wait_between_rounds.as_secs_f64(),
                        "Waiting for cache writes to settle"
                    );
                }
                let interrupt = self.dispatcher.interrupt();
                if interrupt.sleep(self.settings.wait_between_rounds).await {
                    info!(completed_rounds = round, "Interrupted while waiting");
                    return Err(RunnerError::Interrupted {
                        scenario: scenario.id.clone(),
                        completed_rounds: round,
                    });
                }
            }
        }

        self.transition(RunnerState::Complete);
        Ok(ScenarioRun {
            scenario: scenario.id.clone(),
            summaries,
            metrics,
        })
    }
}

fn log_progress(previous: &RoundSummary, current: &RoundSummary) {
    let ttft_reduction = compare::reduction_pct(previous.ttft.mean, current.ttft.mean);
    let throughput_increase =
        compare::increase_pct(previous.request_throughput, current.request_throughput);
    info!(
        from_round = previous.round_number,
        to_round = current.round_number,
        ttft_reduction_pct = ttft_reduction,
        throughput_increase_pct = throughput_increase,
        "Round-over-round change"
    );
}
