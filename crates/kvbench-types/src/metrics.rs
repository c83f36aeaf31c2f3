//! Per-request and per-round measurement records
//!
//! All durations are stored in seconds as `f64`, which is also the unit of the
//! persisted JSON artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Outcome of one dispatched request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMetric {
    /// Scenario the request belongs to
    pub scenario: String,
    /// Position of the prompt in the scenario, stable across rounds
    pub request_id: usize,
    /// 1-based round number
    pub round_number: u32,
    /// Estimated input tokens of the prompt
    pub prompt_token_estimate: u64,
    /// Number of streamed deltas that carried content
    pub output_token_count: u64,
    /// Time to first token in seconds, absent only when the request failed
    pub time_to_first_token: Option<f64>,
    /// Mean time per output token in seconds, absent when no content token arrived
    pub time_per_output_token: Option<f64>,
    /// Wall time from call start to completion or failure, in seconds
    pub end_to_end_latency: f64,
    pub succeeded: bool,
    /// Failure description, present iff the request failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Wall-clock instant the request was issued
    pub observed_at: DateTime<Utc>,
}

impl RequestMetric {
    /// Tokens counted towards token throughput.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_token_estimate + self.output_token_count
    }
}

/// Mean, median and nearest-rank percentiles of one metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub median: f64,
    pub p90: f64,
    pub p99: f64,
}

impl MetricStats {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Whether the server under test had caching enabled
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Display,
    EnumString,
    IntoStaticStr,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    #[default]
    WithCache,
    Baseline,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Reduction of one round's request metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Scenario identifier
    pub scenario: String,
    /// 1-based round number
    pub round_number: u32,
    /// Run mode label
    #[serde(default)]
    pub mode: RunMode,
    /// Endpoint URL the round was sent to
    pub endpoint: String,
    /// Requests dispatched in the round
    pub total_requests: usize,
    /// Requests that completed successfully
    pub succeeded_requests: usize,
    /// Wall time of the whole round in seconds
    pub elapsed_wall_time: f64,
    /// Time to first token statistics (seconds)
    pub ttft: MetricStats,
    /// Time per output token statistics (seconds)
    pub tpot: MetricStats,
    /// End-to-end latency statistics (seconds)
    pub latency: MetricStats,
    /// Succeeded requests per second
    pub request_throughput: f64,
    /// Prompt plus output tokens of succeeded requests per second
    pub token_throughput: f64,
    /// Output tokens of succeeded requests per second
    #[serde(default)]
    pub output_token_throughput: f64,
}

impl RoundSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.succeeded_requests as f64 / self.total_requests as f64
        }
    }

    /// True when no request of the round succeeded.
    pub fn is_degenerate(&self) -> bool {
        self.succeeded_requests == 0
    }
}

/// Split of mean TTFT into disaggregated serving stages.
///
/// The split uses fixed ratios and is not measured telemetry; `synthetic` is
/// always set so consumers can label it accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageEstimate {
    pub prefill: f64,
    pub kv_transfer: f64,
    pub decode_start: f64,
    pub synthetic: bool,
}
