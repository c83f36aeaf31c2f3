//! Comparison engine
//!
//! Computes relative deltas between round summaries and classifies them
//! against [`TargetThresholds`]. Any ratio with a zero denominator is
//! undefined (`None`) and classifies as poor.

use crate::config::TargetThresholds;
use crate::error::ComparisonError;
use kvbench_types::{AxisVerdicts, ComparisonResult, RoundSummary, TopologyDelta, Verdict};
use std::collections::BTreeMap;

/// `(1 - candidate / baseline) * 100`
pub fn reduction_pct(baseline: f64, candidate: f64) -> Option<f64> {
    (baseline != 0.0).then(|| (1.0 - candidate / baseline) * 100.0)
}

/// `(candidate - baseline) / baseline * 100`
pub fn change_pct(baseline: f64, candidate: f64) -> Option<f64> {
    (baseline != 0.0).then(|| (candidate - baseline) / baseline * 100.0)
}

/// `(candidate / baseline - 1) * 100`
pub fn increase_pct(baseline: f64, candidate: f64) -> Option<f64> {
    (baseline != 0.0).then(|| (candidate / baseline - 1.0) * 100.0)
}

/// Classifies one axis value. Undefined values are poor.
pub fn classify(value: Option<f64>, excellent: f64, partial: f64) -> Verdict {
    match value {
        Some(v) if v >= excellent => Verdict::Excellent,
        Some(v) if v >= partial => Verdict::Partial,
        _ => Verdict::Poor,
    }
}

/// Excellent only when both axes are excellent, partial when either reaches partial.
pub fn overall_verdict(ttft: Verdict, throughput: Verdict) -> Verdict {
    match (ttft, throughput) {
        (Verdict::Excellent, Verdict::Excellent) => Verdict::Excellent,
        (Verdict::Poor, Verdict::Poor) => Verdict::Poor,
        _ => Verdict::Partial,
    }
}

/// Pairwise comparison of a candidate round against its baseline round.
pub fn compare_rounds(
    baseline: &RoundSummary,
    candidate: &RoundSummary,
    targets: &TargetThresholds,
) -> ComparisonResult {
    let ttft_reduction_pct = reduction_pct(baseline.ttft.mean, candidate.ttft.mean);
    let throughput_increase_pct =
        increase_pct(baseline.request_throughput, candidate.request_throughput);
    let tpot_change_pct = change_pct(baseline.tpot.mean, candidate.tpot.mean);

    let ttft = classify(
        ttft_reduction_pct,
        targets.ttft_reduction_excellent,
        targets.ttft_reduction_partial,
    );
    let throughput = classify(
        throughput_increase_pct,
        targets.throughput_increase_excellent,
        targets.throughput_increase_partial,
    );

    ComparisonResult {
        scenario: candidate.scenario.clone(),
        baseline_round: baseline.round_number,
        candidate_round: candidate.round_number,
        ttft_reduction_pct,
        p90_ttft_reduction_pct: reduction_pct(baseline.ttft.p90, candidate.ttft.p90),
        tpot_change_pct,
        throughput_increase_pct,
        token_throughput_increase_pct: increase_pct(
            baseline.token_throughput,
            candidate.token_throughput,
        ),
        latency_change_pct: change_pct(baseline.latency.mean, candidate.latency.mean),
        tpot_stable: tpot_change_pct.is_some_and(|c| c.abs() < targets.tpot_stability_pct),
        cross_node: baseline.endpoint != candidate.endpoint,
        verdict: AxisVerdicts {
            ttft,
            throughput,
            overall: overall_verdict(ttft, throughput),
        },
    }
}

fn find_round<'a>(
    summaries: &'a [RoundSummary],
    scenario: &str,
    round: u32,
) -> Result<&'a RoundSummary, ComparisonError> {
    summaries
        .iter()
        .find(|s| s.scenario == scenario && s.round_number == round)
        .ok_or_else(|| ComparisonError::MissingRound {
            scenario: scenario.to_string(),
            round,
        })
}

/// Compares two rounds of `scenario` taken from a flat summary list.
pub fn compare_scenario(
    summaries: &[RoundSummary],
    scenario: &str,
    baseline_round: u32,
    candidate_round: u32,
    targets: &TargetThresholds,
) -> Result<ComparisonResult, ComparisonError> {
    let baseline = find_round(summaries, scenario, baseline_round)?;
    let candidate = find_round(summaries, scenario, candidate_round)?;
    Ok(compare_rounds(baseline, candidate, targets))
}

/// Scenario names in order of first appearance
fn scenario_names(summaries: &[RoundSummary]) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for summary in summaries {
        if !names.contains(&summary.scenario.as_str()) {
            names.push(&summary.scenario);
        }
    }
    names
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub scenario: String,
    pub result: Result<ComparisonResult, ComparisonError>,
}

/// Per-scenario comparisons of a multi-scenario run
#[derive(Debug, Clone, PartialEq)]
pub struct MultiScenarioReport {
    pub outcomes: Vec<ScenarioOutcome>,
}

impl MultiScenarioReport {
    pub fn successes(&self) -> impl Iterator<Item = &ComparisonResult> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ComparisonError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.scenario.as_str(), e)))
    }

    /// Successful comparisons by descending TTFT reduction, undefined last.
    pub fn ranking(&self) -> Vec<&ComparisonResult> {
        let mut ranked: Vec<&ComparisonResult> = self.successes().collect();
        ranked.sort_by(|a, b| match (a.ttft_reduction_pct, b.ttft_reduction_pct) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ranked
    }

    /// Scenario names grouped by overall verdict
    pub fn by_verdict(&self) -> BTreeMap<Verdict, Vec<&str>> {
        let mut groups: BTreeMap<Verdict, Vec<&str>> = BTreeMap::new();
        for result in self.successes() {
            groups
                .entry(result.verdict.overall)
                .or_default()
                .push(&result.scenario);
        }
        groups
    }

    pub fn count(&self, verdict: Verdict) -> usize {
        self.successes()
            .filter(|r| r.verdict.overall == verdict)
            .count()
    }
}

/// Runs the pairwise comparison once per scenario against its own baseline round.
///
/// A scenario missing either round gets an error outcome; the others are unaffected.
pub fn compare_multi(
    summaries: &[RoundSummary],
    baseline_round: u32,
    candidate_round: u32,
    targets: &TargetThresholds,
) -> Result<MultiScenarioReport, ComparisonError> {
    if summaries.is_empty() {
        return Err(ComparisonError::EmptyInput);
    }

    let outcomes = scenario_names(summaries)
        .into_iter()
        .map(|scenario| ScenarioOutcome {
            scenario: scenario.to_string(),
            result: compare_scenario(summaries, scenario, baseline_round, candidate_round, targets),
        })
        .collect();

    Ok(MultiScenarioReport { outcomes })
}

/// One scenario measured on two serving topologies
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyComparison {
    pub delta: TopologyDelta,
    /// Round 1 against the last round on the reference topology
    pub reference_cache_effect: Result<ComparisonResult, ComparisonError>,
    /// Round 1 against the last round on the candidate topology
    pub candidate_cache_effect: Result<ComparisonResult, ComparisonError>,
}

/// Compares the last round of every reference scenario with the same round of the candidate run.
pub fn compare_topologies(
    reference: &[RoundSummary],
    candidate: &[RoundSummary],
    targets: &TargetThresholds,
) -> Result<Vec<Result<TopologyComparison, ComparisonError>>, ComparisonError> {
    if reference.is_empty() || candidate.is_empty() {
        return Err(ComparisonError::EmptyInput);
    }

    let comparisons = scenario_names(reference)
        .into_iter()
        .map(|scenario| -> Result<TopologyComparison, ComparisonError> {
            let last_round = reference
                .iter()
                .filter(|s| s.scenario == scenario)
                .map(|s| s.round_number)
                .max()
                .unwrap_or(1);
            let ref_round = find_round(reference, scenario, last_round)?;
            let cand_round = find_round(candidate, scenario, last_round)?;

            Ok(TopologyComparison {
                delta: TopologyDelta {
                    scenario: scenario.to_string(),
                    round_number: last_round,
                    ttft_mean_diff_pct: change_pct(ref_round.ttft.mean, cand_round.ttft.mean),
                    tpot_mean_diff_pct: change_pct(ref_round.tpot.mean, cand_round.tpot.mean),
                    request_throughput_diff_pct: change_pct(
                        ref_round.request_throughput,
                        cand_round.request_throughput,
                    ),
                    token_throughput_diff_pct: change_pct(
                        ref_round.token_throughput,
                        cand_round.token_throughput,
                    ),
                },
                reference_cache_effect: compare_scenario(
                    reference, scenario, 1, last_round, targets,
                ),
                candidate_cache_effect: compare_scenario(
                    candidate, scenario, 1, last_round, targets,
                ),
            })
        })
        .collect();

    Ok(comparisons)
}
