//! Comparison records between round summaries

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Three-level classification against configured targets
#[derive(
    Debug,
    Clone,
    Copy,
    Display,
    EnumString,
    IntoStaticStr,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Excellent,
    Partial,
    Poor,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Verdict::Excellent => "✅",
            Verdict::Partial => "⚠️",
            Verdict::Poor => "❌",
        }
    }
}

/// Per-axis and overall verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisVerdicts {
    pub ttft: Verdict,
    pub throughput: Verdict,
    pub overall: Verdict,
}

/// Pairwise delta between a baseline and a candidate round.
///
/// A percentage is `None` when its denominator is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub scenario: String,
    pub baseline_round: u32,
    pub candidate_round: u32,
    /// `(1 - candidate / baseline) * 100` on mean TTFT
    pub ttft_reduction_pct: Option<f64>,
    /// Same reduction on p90 TTFT
    pub p90_ttft_reduction_pct: Option<f64>,
    /// `(candidate - baseline) / baseline * 100` on mean TPOT
    pub tpot_change_pct: Option<f64>,
    /// `(candidate / baseline - 1) * 100` on request throughput
    pub throughput_increase_pct: Option<f64>,
    /// Same increase on token throughput
    pub token_throughput_increase_pct: Option<f64>,
    /// Relative change of mean end-to-end latency
    pub latency_change_pct: Option<f64>,
    /// TPOT moved by less than the stability tolerance
    pub tpot_stable: bool,
    /// Baseline and candidate rounds ran against different endpoints
    pub cross_node: bool,
    pub verdict: AxisVerdicts,
}

/// Relative difference of a candidate topology against a reference topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDelta {
    pub scenario: String,
    /// Round both values were taken from
    pub round_number: u32,
    pub ttft_mean_diff_pct: Option<f64>,
    pub tpot_mean_diff_pct: Option<f64>,
    pub request_throughput_diff_pct: Option<f64>,
    pub token_throughput_diff_pct: Option<f64>,
}
