//! Round statistics
//!
//! Percentiles use the nearest-rank estimator `sorted[floor(q * n)]`, clamped
//! to the last index, so results stay comparable with historical runs.

use kvbench_types::{MetricStats, RequestMetric, RoundSummary, RunMode};
use std::time::Duration;

/// Labels attached to a round summary
#[derive(Debug, Clone)]
pub struct RoundLabels {
    pub scenario: String,
    pub round_number: u32,
    pub mode: RunMode,
    pub endpoint: String,
}

/// Reduces one round's metrics to a summary.
///
/// Only succeeded requests count. Each metric is filtered on its own, so a
/// request without a TPOT still contributes to TTFT and latency. With no
/// succeeded request every statistic is zero.
pub fn summarize(metrics: &[RequestMetric], elapsed: Duration, labels: RoundLabels) -> RoundSummary {
    let succeeded: Vec<&RequestMetric> = metrics.iter().filter(|m| m.succeeded).collect();
    let elapsed_secs = elapsed.as_secs_f64();

    let ttfts = sorted_values(succeeded.iter().filter_map(|m| m.time_to_first_token));
    let tpots = sorted_values(succeeded.iter().filter_map(|m| m.time_per_output_token));
    let latencies = sorted_values(succeeded.iter().map(|m| m.end_to_end_latency));

    let total_tokens: u64 = succeeded.iter().map(|m| m.total_tokens()).sum();
    let output_tokens: u64 = succeeded.iter().map(|m| m.output_token_count).sum();
    let (request_throughput, token_throughput, output_token_throughput) = if elapsed_secs > 0.0 {
        (
            succeeded.len() as f64 / elapsed_secs,
            total_tokens as f64 / elapsed_secs,
            output_tokens as f64 / elapsed_secs,
        )
    } else {
        (0.0, 0.0, 0.0)
    };

    RoundSummary {
        scenario: labels.scenario,
        round_number: labels.round_number,
        mode: labels.mode,
        endpoint: labels.endpoint,
        total_requests: metrics.len(),
        succeeded_requests: succeeded.len(),
        elapsed_wall_time: elapsed_secs,
        ttft: stats(&ttfts),
        tpot: stats(&tpots),
        latency: stats(&latencies),
        request_throughput,
        token_throughput,
        output_token_throughput,
    }
}

fn sorted_values(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.filter(|v| v.is_finite()).collect();
    values.sort_by(f64::total_cmp);
    values
}

/// Statistics of an ascending list; all zero when empty.
pub fn stats(sorted: &[f64]) -> MetricStats {
    if sorted.is_empty() {
        return MetricStats::zero();
    }
    MetricStats {
        mean: mean(sorted),
        median: median(sorted),
        p90: percentile(sorted, 0.9),
        p99: percentile(sorted, 0.99),
    }
}

/// Nearest-rank percentile of an ascending list; 0 when empty.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((q * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Middle value, or the mean of the two middle values for an even length.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
