use ascii_tree::{Tree, write_tree};
use kvbench_lib::compare::{MultiScenarioReport, TopologyComparison};
use kvbench_lib::error::ComparisonError;
use kvbench_types::{ComparisonResult, MetricStats, RoundSummary, StageEstimate, Verdict};
use std::fmt;

fn ms(seconds: f64) -> String {
    format!("{:.1}ms", seconds * 1000.0)
}

fn pct(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:+.1}%"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn leaf(text: String) -> Tree {
    Tree::Leaf(vec![text])
}

fn render(tree: &Tree) -> Result<String, fmt::Error> {
    let mut buffer = String::new();
    write_tree(&mut buffer, tree)?;
    Ok(buffer)
}

fn stats_line(label: &str, stats: &MetricStats) -> Tree {
    leaf(format!(
        "{label}: mean {} | median {} | p90 {} | p99 {}",
        ms(stats.mean),
        ms(stats.median),
        ms(stats.p90),
        ms(stats.p99)
    ))
}

fn round_node(summary: &RoundSummary) -> Tree {
    let icon = if summary.is_degenerate() { "❌" } else { "✅" };
    Tree::Node(
        format!(
            "{icon} Round {} ({}) @ {}",
            summary.round_number,
            summary.mode.as_str(),
            summary.endpoint
        ),
        vec![
            leaf(format!(
                "Requests: {}/{} succeeded in {:.2}s",
                summary.succeeded_requests, summary.total_requests, summary.elapsed_wall_time
            )),
            stats_line("TTFT", &summary.ttft),
            stats_line("TPOT", &summary.tpot),
            stats_line("Latency", &summary.latency),
            leaf(format!(
                "Throughput: {:.2} req/s | {:.1} tok/s | {:.1} output tok/s",
                summary.request_throughput,
                summary.token_throughput,
                summary.output_token_throughput
            )),
        ],
    )
}

/// Renders the rounds of one scenario, e.g. as each completes.
pub fn render_rounds(scenario: &str, summaries: &[RoundSummary]) -> Result<String, fmt::Error> {
    let tree = Tree::Node(
        format!("📊 {scenario}"),
        summaries.iter().map(round_node).collect(),
    );
    render(&tree)
}

fn comparison_node(result: &ComparisonResult) -> Tree {
    let mut children = vec![
        leaf(format!(
            "{} TTFT reduction: {} (p90 {})",
            result.verdict.ttft.icon(),
            pct(result.ttft_reduction_pct),
            pct(result.p90_ttft_reduction_pct)
        )),
        leaf(format!(
            "{} Throughput increase: {} (tokens {})",
            result.verdict.throughput.icon(),
            pct(result.throughput_increase_pct),
            pct(result.token_throughput_increase_pct)
        )),
        leaf(format!(
            "TPOT change: {} ({})",
            pct(result.tpot_change_pct),
            if result.tpot_stable { "stable" } else { "unstable" }
        )),
        leaf(format!("Latency change: {}", pct(result.latency_change_pct))),
    ];
    if result.cross_node {
        children.push(leaf("Rounds ran on different endpoints".to_string()));
    }
    Tree::Node(
        format!(
            "{} {} round {} vs {}: {}",
            result.verdict.overall.icon(),
            result.scenario,
            result.candidate_round,
            result.baseline_round,
            result.verdict.overall
        ),
        children,
    )
}

pub fn render_comparison(result: &ComparisonResult) -> Result<String, fmt::Error> {
    render(&comparison_node(result))
}

fn error_leaf(scenario: &str, err: &ComparisonError) -> Tree {
    leaf(format!("❌ {scenario}: {err}"))
}

/// Renders a multi-scenario report: ranking, verdict groups, then failures.
pub fn render_multi_report(report: &MultiScenarioReport) -> Result<String, fmt::Error> {
    let ranking: Vec<Tree> = report
        .ranking()
        .into_iter()
        .enumerate()
        .map(|(i, result)| {
            let mut node = comparison_node(result);
            if let Tree::Node(label, _) = &mut node {
                *label = format!("#{} {label}", i + 1);
            }
            node
        })
        .collect();

    let groups = report.by_verdict();
    let summary: Vec<Tree> = [Verdict::Excellent, Verdict::Partial, Verdict::Poor]
        .iter()
        .map(|verdict| {
            let names = groups.get(verdict).cloned().unwrap_or_default();
            leaf(format!(
                "{} {}: {} ({})",
                verdict.icon(),
                verdict,
                names.len(),
                names.join(", ")
            ))
        })
        .collect();

    let mut sections = vec![
        Tree::Node("Ranking by TTFT reduction".to_string(), ranking),
        Tree::Node("Verdicts".to_string(), summary),
    ];
    let failures: Vec<Tree> = report
        .failures()
        .map(|(scenario, err)| error_leaf(scenario, err))
        .collect();
    if !failures.is_empty() {
        sections.push(Tree::Node("Not comparable".to_string(), failures));
    }

    render(&Tree::Node(
        format!("Cache effect across {} scenario(s)", report.outcomes.len()),
        sections,
    ))
}

pub fn render_topologies(
    comparisons: &[Result<TopologyComparison, ComparisonError>],
) -> Result<String, fmt::Error> {
    let nodes = comparisons
        .iter()
        .map(|comparison| match comparison {
            Ok(c) => {
                let d = &c.delta;
                let mut children = vec![
                    leaf(format!("TTFT mean: {}", pct(d.ttft_mean_diff_pct))),
                    leaf(format!("TPOT mean: {}", pct(d.tpot_mean_diff_pct))),
                    leaf(format!(
                        "Request throughput: {}",
                        pct(d.request_throughput_diff_pct)
                    )),
                    leaf(format!(
                        "Token throughput: {}",
                        pct(d.token_throughput_diff_pct)
                    )),
                ];
                for (label, effect) in [
                    ("reference", &c.reference_cache_effect),
                    ("candidate", &c.candidate_cache_effect),
                ] {
                    children.push(match effect {
                        Ok(r) => leaf(format!(
                            "Cache effect ({label}): TTFT {} | throughput {} | {}",
                            pct(r.ttft_reduction_pct),
                            pct(r.throughput_increase_pct),
                            r.verdict.overall
                        )),
                        Err(err) => leaf(format!("Cache effect ({label}): {err}")),
                    });
                }
                Tree::Node(
                    format!("{} (round {}, candidate vs reference)", d.scenario, d.round_number),
                    children,
                )
            }
            Err(err) => leaf(format!("❌ {err}")),
        })
        .collect();
    render(&Tree::Node("Topology comparison".to_string(), nodes))
}

/// Always labelled synthetic: the split is a fixed ratio, not telemetry.
pub fn render_stage_estimate(
    summary: &RoundSummary,
    estimate: &StageEstimate,
) -> Result<String, fmt::Error> {
    render(&Tree::Node(
        format!(
            "Estimated stage split for {} round {} (synthetic, fixed 70/20/10 ratio)",
            summary.scenario, summary.round_number
        ),
        vec![
            leaf(format!("Prefill: {}", ms(estimate.prefill))),
            leaf(format!("KV transfer: {}", ms(estimate.kv_transfer))),
            leaf(format!("Decode start: {}", ms(estimate.decode_start))),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvbench_lib::compare::{compare_multi, compare_rounds};
    use kvbench_lib::config::TargetThresholds;
    use kvbench_types::RunMode;

    fn summary(scenario: &str, round: u32, ttft: f64, throughput: f64) -> RoundSummary {
        let stats = |v: f64| MetricStats {
            mean: v,
            median: v,
            p90: v,
            p99: v,
        };
        RoundSummary {
            scenario: scenario.to_string(),
            round_number: round,
            mode: RunMode::WithCache,
            endpoint: "http://localhost:8000/v1".to_string(),
            total_requests: 10,
            succeeded_requests: 10,
            elapsed_wall_time: 4.0,
            ttft: stats(ttft),
            tpot: stats(0.02),
            latency: stats(1.0),
            request_throughput: throughput,
            token_throughput: throughput * 120.0,
            output_token_throughput: throughput * 20.0,
        }
    }

    #[test]
    fn test_render_rounds_lists_every_round() {
        let output = render_rounds(
            "long_context_high_reuse",
            &[summary("long_context_high_reuse", 1, 0.8, 2.5), summary("long_context_high_reuse", 2, 0.2, 6.0)],
        )
        .unwrap();
        assert!(output.contains("long_context_high_reuse"));
        assert!(output.contains("Round 1 (with-cache)"));
        assert!(output.contains("Round 2 (with-cache)"));
        assert!(output.contains("TTFT: mean 800.0ms"));
        assert!(output.contains("10/10 succeeded"));
        assert!(output.contains("300.0 tok/s | 50.0 output tok/s"));
    }

    #[test]
    fn test_render_comparison_shows_undefined_ratios() {
        let result = compare_rounds(
            &summary("s", 1, 0.0, 0.0),
            &summary("s", 2, 0.1, 1.0),
            &TargetThresholds::default(),
        );
        let output = render_comparison(&result).unwrap();
        assert!(output.contains("TTFT reduction: n/a"));
        assert!(output.contains("poor"));
    }

    #[test]
    fn test_render_multi_report_groups_and_failures() {
        let summaries = vec![
            summary("a", 1, 1.0, 1.0),
            summary("a", 2, 0.2, 3.0),
            summary("b", 1, 1.0, 1.0),
        ];
        let report = compare_multi(&summaries, 1, 2, &TargetThresholds::default()).unwrap();
        let output = render_multi_report(&report).unwrap();
        assert!(output.contains("#1"));
        assert!(output.contains("excellent: 1 (a)"));
        assert!(output.contains("Not comparable"));
        assert!(output.contains("Scenario 'b' has no round 2"));
    }

    #[test]
    fn test_render_stage_estimate_is_labelled() {
        let s = summary("s", 2, 0.5, 1.0);
        let estimate = kvbench_lib::stages::estimate_stages(&s);
        let output = render_stage_estimate(&s, &estimate).unwrap();
        assert!(output.contains("synthetic"));
        assert!(output.contains("Prefill: 350.0ms"));
    }
}
