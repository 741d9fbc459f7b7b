//! Baseline-vs-gated comparison and cost projection.
//!
//! [`compare`] lines up two persisted runs of the same size and derives, per
//! metric, the baseline value, the gated value and the gated run's advantage:
//!
//! - lower-is-better metrics (latency, energy, FLOPs): `ratio = baseline /
//!   gated`, `advantage_pct = (ratio - 1) * 100`
//! - invocation rate: percentage-point reduction
//! - throughput: `gated / baseline`
//!
//! Savings are projected from the gated run's avoided FLOPs and tokens using
//! only the rates in the supplied [`PricingConfig`].

use crate::config::{ConfigError, PricingConfig, RunMode};
use crate::engine::{HarnessError, RunResult, RunStatus};
use crate::metrics::{DecisionCounts, RunSummary};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

const DAYS_PER_YEAR: f64 = 365.0;
const TOKENS_PER_PRICED_UNIT: f64 = 1_000_000.0;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Runs are not comparable: baseline has {baseline} requests, gated has {gated}")]
    RunMismatch { baseline: usize, gated: usize },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Run(#[from] HarnessError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReportError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ReportError::RunMismatch { .. } => 5,
            ReportError::Config(e) => e.exit_code(),
            ReportError::Run(e) => e.exit_code(),
            ReportError::Io(_) | ReportError::Json(_) => 1,
        }
    }
}

/// Identity of one compared run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLabel {
    pub name: String,
    pub mode: RunMode,
    pub status: RunStatus,
    pub workload_id: String,
    pub gate: Option<String>,
}

impl RunLabel {
    fn of(run: &RunResult) -> Self {
        Self {
            name: run.metadata.name.clone(),
            mode: run.metadata.mode,
            status: run.metadata.status,
            workload_id: run.metadata.workload_id.clone(),
            gate: run.metadata.gate.as_ref().map(|g| g.name.clone()),
        }
    }
}

/// One lower-is-better metric, side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub baseline: Option<f64>,
    pub gated: Option<f64>,
    /// `baseline / gated`.
    pub ratio: Option<f64>,
    pub advantage_pct: Option<f64>,
}

impl MetricComparison {
    fn lower_is_better(metric: &str, baseline: Option<f64>, gated: Option<f64>) -> Self {
        let ratio = ratio(baseline, gated);
        Self {
            metric: metric.to_string(),
            baseline,
            gated,
            ratio,
            advantage_pct: ratio.map(|r| (r - 1.0) * 100.0),
        }
    }
}

/// Share of requests that invoked the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationComparison {
    pub baseline_pct: Option<f64>,
    pub gated_pct: Option<f64>,
    /// Percentage points removed by the gate.
    pub reduction_pp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputComparison {
    pub baseline_rps: Option<f64>,
    pub gated_rps: Option<f64>,
    /// `gated / baseline`.
    pub ratio: Option<f64>,
}

/// Savings projected from the gated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostProjection {
    pub gpu_hour_rate: f64,
    pub token_1m_rate: f64,
    /// Requests actually processed by the gated run.
    pub request_count: usize,
    pub daily_requests: f64,
    pub flops_avoided: f64,
    pub gpu_hours_avoided: f64,
    pub gpu_hours_avoided_per_day: f64,
    pub daily_savings: f64,
    pub annual_savings: f64,
    pub tokens_avoided: u64,
    pub daily_token_savings: f64,
    pub annual_token_savings: f64,
}

impl CostProjection {
    /// Project savings for `gated` at `pricing` rates, scaling the run's
    /// request count up to `daily_requests` (the run itself if unset).
    pub fn project(gated: &RunResult, pricing: &PricingConfig) -> Self {
        let summary = &gated.summary;
        let request_count = summary.request_count;
        let daily_requests = pricing.daily_requests.unwrap_or(request_count as f64);
        let scale = if request_count > 0 {
            daily_requests / request_count as f64
        } else {
            0.0
        };

        let flops_avoided = summary.total_flops_avoided.unwrap_or(0.0);
        let gpu_hours_avoided = flops_avoided / gated.metadata.model_profile.flops_per_gpu_hour;
        let gpu_hours_avoided_per_day = gpu_hours_avoided * scale;
        let daily_savings = gpu_hours_avoided_per_day * pricing.gpu_hour;

        let tokens_avoided = summary.total_tokens_avoided.unwrap_or(0);
        let daily_token_savings =
            tokens_avoided as f64 / TOKENS_PER_PRICED_UNIT * pricing.token_1m * scale;

        Self {
            gpu_hour_rate: pricing.gpu_hour,
            token_1m_rate: pricing.token_1m,
            request_count,
            daily_requests,
            flops_avoided,
            gpu_hours_avoided,
            gpu_hours_avoided_per_day,
            daily_savings,
            annual_savings: daily_savings * DAYS_PER_YEAR,
            tokens_avoided,
            daily_token_savings,
            annual_token_savings: daily_token_savings * DAYS_PER_YEAR,
        }
    }
}

/// Full baseline-vs-gated comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub baseline: RunLabel,
    pub gated: RunLabel,
    pub request_count: usize,
    pub metrics: Vec<MetricComparison>,
    pub invocation_rate: InvocationComparison,
    pub throughput: ThroughputComparison,
    pub baseline_decisions: DecisionCounts,
    pub gated_decisions: DecisionCounts,
    pub cost: CostProjection,
    pub warnings: Vec<String>,
}

impl Report {
    pub fn metric(&self, name: &str) -> Option<&MetricComparison> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

/// `baseline / gated`; equal values (zeros included) compare as 1.
fn ratio(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    match (numerator, denominator) {
        (Some(n), Some(d)) if n == d => Some(1.0),
        (Some(_), Some(d)) if d == 0.0 => None,
        (Some(n), Some(d)) => Some(n / d),
        _ => None,
    }
}

fn lower_is_better_metrics(baseline: &RunSummary, gated: &RunSummary) -> Vec<MetricComparison> {
    let latency = |s: &RunSummary, pick: fn(&crate::metrics::LatencyStats) -> f64| {
        s.latency_ms.as_ref().map(pick)
    };
    vec![
        MetricComparison::lower_is_better(
            "latency_mean_ms",
            latency(baseline, |l| l.mean),
            latency(gated, |l| l.mean),
        ),
        MetricComparison::lower_is_better(
            "latency_p50_ms",
            latency(baseline, |l| l.p50),
            latency(gated, |l| l.p50),
        ),
        MetricComparison::lower_is_better(
            "latency_p95_ms",
            latency(baseline, |l| l.p95),
            latency(gated, |l| l.p95),
        ),
        MetricComparison::lower_is_better(
            "latency_p99_ms",
            latency(baseline, |l| l.p99),
            latency(gated, |l| l.p99),
        ),
        MetricComparison::lower_is_better(
            "total_energy_joules",
            baseline.total_energy_joules,
            gated.total_energy_joules,
        ),
        MetricComparison::lower_is_better(
            "mean_energy_joules",
            baseline.mean_energy_joules,
            gated.mean_energy_joules,
        ),
        MetricComparison::lower_is_better("total_flops", baseline.total_flops, gated.total_flops),
    ]
}

fn collect_warnings(baseline: &RunResult, gated: &RunResult) -> Vec<String> {
    let mut warnings = Vec::new();

    let differing = baseline
        .outcomes
        .iter()
        .zip(&gated.outcomes)
        .filter(|(b, g)| b.request_id != g.request_id)
        .count();
    if differing > 0 {
        warnings.push(format!(
            "request ids differ between runs at {} position(s)",
            differing
        ));
    }
    if baseline.metadata.mode != RunMode::TransformerOnly {
        warnings.push(format!(
            "baseline run mode is '{}', expected 'transformer_only'",
            baseline.metadata.mode
        ));
    }
    if gated.metadata.mode != RunMode::Gated {
        warnings.push(format!(
            "gated run mode is '{}', expected 'gated'",
            gated.metadata.mode
        ));
    }
    for (label, run) in [("baseline", baseline), ("gated", gated)] {
        if run.is_partial() {
            warnings.push(format!(
                "{} run is partial ({} of {} requests)",
                label, run.metadata.completed_requests, run.metadata.total_requests
            ));
        }
    }
    if baseline.metadata.model_profile != gated.metadata.model_profile {
        warnings.push("runs used different model profiles".to_string());
    }
    warnings
}

/// Compare a baseline run against a gated run.
pub fn compare(
    baseline: &RunResult,
    gated: &RunResult,
    pricing: &PricingConfig,
) -> Result<Report, ReportError> {
    if baseline.metadata.total_requests != gated.metadata.total_requests {
        return Err(ReportError::RunMismatch {
            baseline: baseline.metadata.total_requests,
            gated: gated.metadata.total_requests,
        });
    }

    let warnings = collect_warnings(baseline, gated);
    for w in &warnings {
        warn!(warning = %w, "report warning");
    }

    let b = &baseline.summary;
    let g = &gated.summary;
    let baseline_pct = b.invocation_rate.map(|r| r * 100.0);
    let gated_pct = g.invocation_rate.map(|r| r * 100.0);
    let reduction_pp = match (b.invocation_rate, g.invocation_rate) {
        (Some(br), Some(gr)) => Some((br - gr) * 100.0),
        _ => None,
    };

    Ok(Report {
        baseline: RunLabel::of(baseline),
        gated: RunLabel::of(gated),
        request_count: baseline.metadata.total_requests,
        metrics: lower_is_better_metrics(b, g),
        invocation_rate: InvocationComparison {
            baseline_pct,
            gated_pct,
            reduction_pp,
        },
        throughput: ThroughputComparison {
            baseline_rps: b.throughput_rps,
            gated_rps: g.throughput_rps,
            ratio: ratio(g.throughput_rps, b.throughput_rps),
        },
        baseline_decisions: b.decision_counts,
        gated_decisions: g.decision_counts,
        cost: CostProjection::project(gated, pricing),
        warnings,
    })
}

/// Load two persisted runs and a pricing file, then compare.
pub fn compare_files(
    baseline_path: &Path,
    gated_path: &Path,
    pricing_path: &Path,
) -> Result<Report, ReportError> {
    let pricing = PricingConfig::from_file(pricing_path)?;
    let baseline = RunResult::load(baseline_path)?;
    let gated = RunResult::load(gated_path)?;
    compare(&baseline, &gated, &pricing)
}

fn cell(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.abs() >= 1.0e7 => format!("{:.3e}", v),
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

/// Format a report as a human-readable table.
pub fn format_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("\n{:=<84}\n", "  Gate Benchmark Report  "));
    out.push_str(&format!(
        "  Baseline: {} ({}, {})  |  Gated: {} ({}, gate={})\n",
        report.baseline.name,
        report.baseline.mode,
        report.baseline.workload_id,
        report.gated.name,
        report.gated.mode,
        report.gated.gate.as_deref().unwrap_or("none"),
    ));
    out.push_str(&format!("  Requests: {}\n", report.request_count));
    out.push_str(&format!("{:-<84}\n", ""));
    out.push_str(&format!(
        "{:<22} {:>14} {:>14} {:>12} {:>14}\n",
        "Metric", "Baseline", "Gated", "Ratio", "Advantage"
    ));
    out.push_str(&format!("{:-<84}\n", ""));
    for m in &report.metrics {
        out.push_str(&format!(
            "{:<22} {:>14} {:>14} {:>11}x {:>13}%\n",
            m.metric,
            cell(m.baseline, 2),
            cell(m.gated, 2),
            cell(m.ratio, 2),
            cell(m.advantage_pct, 1),
        ));
    }
    out.push_str(&format!(
        "{:<22} {:>13}% {:>13}% {:>12} {:>12}pp\n",
        "invocation_rate",
        cell(report.invocation_rate.baseline_pct, 1),
        cell(report.invocation_rate.gated_pct, 1),
        "",
        cell(report.invocation_rate.reduction_pp, 1),
    ));
    out.push_str(&format!(
        "{:<22} {:>14} {:>14} {:>11}x\n",
        "throughput_rps",
        cell(report.throughput.baseline_rps, 1),
        cell(report.throughput.gated_rps, 1),
        cell(report.throughput.ratio, 2),
    ));

    out.push_str(&format!("{:-<84}\n", "  Decisions (gated)  "));
    let d = &report.gated_decisions;
    out.push_str(&format!(
        "  DIRECT={}  NO_OP={}  ABSTAIN={}  RENDER={}\n",
        d.direct, d.no_op, d.abstain, d.render
    ));

    let c = &report.cost;
    out.push_str(&format!("{:-<84}\n", "  Cost projection  "));
    out.push_str(&format!(
        "  Volume: {:.0} requests/day  |  Rates: ${:.2}/GPU-hour, ${:.2}/1M tokens\n",
        c.daily_requests, c.gpu_hour_rate, c.token_1m_rate
    ));
    out.push_str(&format!(
        "  FLOPs avoided: {:.3e}  GPU-hours avoided: {:.6} (per day: {:.6})\n",
        c.flops_avoided, c.gpu_hours_avoided, c.gpu_hours_avoided_per_day
    ));
    out.push_str(&format!(
        "  GPU savings:   ${:.2}/day  ${:.2}/year\n",
        c.daily_savings, c.annual_savings
    ));
    out.push_str(&format!(
        "  Token savings: ${:.2}/day  ${:.2}/year ({} tokens avoided)\n",
        c.daily_token_savings, c.annual_token_savings, c.tokens_avoided
    ));

    if !report.warnings.is_empty() {
        out.push_str(&format!("{:-<84}\n", "  Warnings  "));
        for w in &report.warnings {
            out.push_str(&format!("  ! {}\n", w));
        }
    }
    out.push_str(&format!("{:=<84}\n", ""));
    out
}
