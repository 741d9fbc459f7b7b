//! Metrics aggregation for replay runs.
//!
//! The [`MetricsCollector`] is the single writer of a run's running totals:
//! the scheduler's collector thread feeds it outcomes in input order, and
//! [`MetricsCollector::finalize`] turns the totals into a [`RunSummary`].
//! Every statistic of an empty run is `None` so "no data" never reads as
//! "zero latency".

use crate::config::PacingMode;
use crate::cost_model::SimulatedOutcome;
use gatebench_gate::DecisionKind;
use serde::{Deserialize, Serialize};

/// Latency distribution summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencyStats {
    /// Summarize a sample; `None` for an empty one.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let min = sorted[0];
        let max = sorted[n - 1];
        let mean = values.iter().sum::<f64>() / n as f64;

        Some(Self {
            // Rounding can push the mean of a constant sample one ulp out.
            mean: mean.clamp(min, max),
            p50: nearest_rank(&sorted, 50),
            p95: nearest_rank(&sorted, 95),
            p99: nearest_rank(&sorted, 99),
            min,
            max,
        })
    }
}

/// Nearest-rank percentile over a sorted sample: the value at 1-based rank
/// `ceil(pct / 100 * n)`, computed in integers.
pub fn nearest_rank(sorted: &[f64], pct: u32) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let n = sorted.len();
    let rank = (pct as usize * n).div_ceil(100).max(1);
    sorted[rank.min(n) - 1]
}

/// Per-decision-kind counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub direct: usize,
    pub no_op: usize,
    pub abstain: usize,
    pub render: usize,
}

impl DecisionCounts {
    pub fn increment(&mut self, kind: DecisionKind) {
        match kind {
            DecisionKind::Direct => self.direct += 1,
            DecisionKind::NoOp => self.no_op += 1,
            DecisionKind::Abstain => self.abstain += 1,
            DecisionKind::Render => self.render += 1,
        }
    }

    pub fn get(&self, kind: DecisionKind) -> usize {
        match kind {
            DecisionKind::Direct => self.direct,
            DecisionKind::NoOp => self.no_op,
            DecisionKind::Abstain => self.abstain,
            DecisionKind::Render => self.render,
        }
    }

    pub fn total(&self) -> usize {
        self.direct + self.no_op + self.abstain + self.render
    }

    /// Share of `kind` in percent; `None` when nothing was counted.
    pub fn percentage(&self, kind: DecisionKind) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(self.get(kind) as f64 * 100.0 / total as f64)
    }
}

/// Aggregated statistics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub request_count: usize,
    pub latency_ms: Option<LatencyStats>,
    pub total_energy_joules: Option<f64>,
    pub mean_energy_joules: Option<f64>,
    pub total_flops: Option<f64>,
    pub total_flops_avoided: Option<f64>,
    pub total_tokens_avoided: Option<u64>,
    pub decision_counts: DecisionCounts,
    /// Fraction of requests that invoked the model (RENDER).
    pub invocation_rate: Option<f64>,
    pub forced_render_count: usize,
    /// Requests per second.
    pub throughput_rps: Option<f64>,
    pub exact_match_checked: usize,
    pub exact_match_rate: Option<f64>,
}

impl RunSummary {
    pub fn decision_percentage(&self, kind: DecisionKind) -> Option<f64> {
        self.decision_counts.percentage(kind)
    }
}

/// Single-writer accumulator of per-request outcomes.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    latencies: Vec<f64>,
    total_energy: f64,
    total_flops: f64,
    total_flops_avoided: f64,
    total_tokens_avoided: u64,
    counts: DecisionCounts,
    forced_renders: usize,
    exact_checked: usize,
    exact_matched: usize,
    first_dispatch_ms: Option<f64>,
    last_dispatch_ms: Option<f64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one outcome. Call in input order so that sums are
    /// reproducible bit-for-bit.
    pub fn record(&mut self, outcome: &SimulatedOutcome) {
        self.latencies.push(outcome.latency_ms);
        self.total_energy += outcome.energy_joules;
        self.total_flops += outcome.flops;
        self.total_flops_avoided += outcome.flops_avoided;
        self.total_tokens_avoided += outcome.tokens_avoided;
        self.counts.increment(outcome.decision_kind);
        if outcome.forced_render {
            self.forced_renders += 1;
        }
        if let Some(matched) = outcome.exact_match {
            self.exact_checked += 1;
            if matched {
                self.exact_matched += 1;
            }
        }

        let offset = outcome.dispatch_offset_ms;
        self.first_dispatch_ms = Some(self.first_dispatch_ms.map_or(offset, |f| f.min(offset)));
        self.last_dispatch_ms = Some(self.last_dispatch_ms.map_or(offset, |l| l.max(offset)));
    }

    pub fn count(&self) -> usize {
        self.latencies.len()
    }

    /// Produce the run summary.
    ///
    /// Throughput uses the first-to-last dispatch span when the run was paced
    /// by recorded timestamps and that span is positive; otherwise it uses
    /// the run's wall-clock `elapsed_ms`.
    pub fn finalize(&self, pacing: PacingMode, elapsed_ms: f64) -> RunSummary {
        let n = self.count();
        let non_empty = |v: f64| if n > 0 { Some(v) } else { None };

        let span_ms = match (self.first_dispatch_ms, self.last_dispatch_ms) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        let window_ms = if pacing == PacingMode::RespectTimestamps && span_ms > 0.0 {
            span_ms
        } else {
            elapsed_ms
        };
        let throughput_rps = if n > 0 && window_ms > 0.0 {
            Some(n as f64 / (window_ms / 1000.0))
        } else {
            None
        };

        RunSummary {
            request_count: n,
            latency_ms: LatencyStats::from_values(&self.latencies),
            total_energy_joules: non_empty(self.total_energy),
            mean_energy_joules: non_empty(self.total_energy / n.max(1) as f64),
            total_flops: non_empty(self.total_flops),
            total_flops_avoided: non_empty(self.total_flops_avoided),
            total_tokens_avoided: (n > 0).then_some(self.total_tokens_avoided),
            decision_counts: self.counts,
            invocation_rate: non_empty(self.counts.render as f64 / n.max(1) as f64),
            forced_render_count: self.forced_renders,
            throughput_rps,
            exact_match_checked: self.exact_checked,
            exact_match_rate: if self.exact_checked > 0 {
                Some(self.exact_matched as f64 / self.exact_checked as f64)
            } else {
                None
            },
        }
    }
}

/// Summarize an already-ordered outcome sequence.
pub fn summarize(outcomes: &[SimulatedOutcome], pacing: PacingMode, elapsed_ms: f64) -> RunSummary {
    let mut collector = MetricsCollector::new();
    for outcome in outcomes {
        collector.record(outcome);
    }
    collector.finalize(pacing, elapsed_ms)
}

fn opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

/// Format a run summary as a pretty-printed table string.
pub fn format_table(label: &str, summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<70}\n", format!("  {} Results  ", label)));
    out.push_str(&format!(
        "  Requests: {} | Throughput: {} req/s\n",
        summary.request_count,
        opt(summary.throughput_rps, 1)
    ));
    out.push_str(&format!("{:-<70}\n", "  Latency (ms)  "));
    match &summary.latency_ms {
        Some(l) => {
            out.push_str(&format!(
                "  Mean={:>9.1}  P50={:>9.1}  P95={:>9.1}  P99={:>9.1}\n",
                l.mean, l.p50, l.p95, l.p99
            ));
            out.push_str(&format!("  Min={:>10.1}  Max={:>9.1}\n", l.min, l.max));
        }
        None => out.push_str("  no data\n"),
    }
    out.push_str(&format!("{:-<70}\n", "  Decisions  "));
    for kind in DecisionKind::ALL {
        out.push_str(&format!(
            "  {:<8} {:>8}  {:>6}%\n",
            kind.as_str(),
            summary.decision_counts.get(kind),
            opt(summary.decision_percentage(kind), 1)
        ));
    }
    out.push_str(&format!(
        "  Invocation rate: {}%  (forced renders: {})\n",
        opt(summary.invocation_rate.map(|r| r * 100.0), 1),
        summary.forced_render_count
    ));
    out.push_str(&format!("{:-<70}\n", "  Cost  "));
    out.push_str(&format!(
        "  Energy (J): total={}  mean={}\n",
        opt(summary.total_energy_joules, 2),
        opt(summary.mean_energy_joules, 3)
    ));
    out.push_str(&format!(
        "  FLOPs: total={}  avoided={}  tokens avoided={}\n",
        summary.total_flops.map_or("n/a".to_string(), |v| format!("{:.3e}", v)),
        summary
            .total_flops_avoided
            .map_or("n/a".to_string(), |v| format!("{:.3e}", v)),
        summary
            .total_tokens_avoided
            .map_or("n/a".to_string(), |v| v.to_string())
    ));
    if summary.exact_match_checked > 0 {
        out.push_str(&format!(
            "  Exact match: {}% of {} checked\n",
            opt(summary.exact_match_rate.map(|r| r * 100.0), 1),
            summary.exact_match_checked
        ));
    }
    out.push_str(&format!("{:=<70}\n", ""));
    out
}
