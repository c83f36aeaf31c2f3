//! Fixed-ratio split of TTFT into disaggregated serving stages.
//!
//! This is an estimate, not telemetry: the harness never observes prefill or
//! KV transfer separately. Results are always marked synthetic.

use kvbench_types::{RoundSummary, StageEstimate};

const PREFILL_SHARE: f64 = 0.7;
const KV_TRANSFER_SHARE: f64 = 0.2;
const DECODE_START_SHARE: f64 = 0.1;

pub fn estimate_stages(summary: &RoundSummary) -> StageEstimate {
    let ttft = summary.ttft.mean;
    StageEstimate {
        prefill: ttft * PREFILL_SHARE,
        kv_transfer: ttft * KV_TRANSFER_SHARE,
        decode_start: ttft * DECODE_START_SHARE,
        synthetic: true,
    }
}
