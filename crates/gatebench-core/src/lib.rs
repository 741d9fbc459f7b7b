//! gatebench: replay, cost simulation and equivalence validation for
//! inference decision gates.
//!
//! A decision gate decides, per request, whether a costly generative model
//! must run. This crate replays a workload through a gate (a remote service
//! or the deterministic stub from `gatebench-gate`), simulates what each
//! decision costs, aggregates the outcomes into a persisted run, and compares
//! a baseline run against a gated run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌───────────┐     ┌──────────────┐
//! │ Workload │────▶│  Replay   │────▶│   Decision   │
//! │  Loader  │     │ Scheduler │     │     Gate     │
//! └──────────┘     └───────────┘     └──────┬───────┘
//!                                           │
//!                                    ┌──────▼───────┐
//!                                    │  Cost Model  │
//!                                    └──────┬───────┘
//!                                           │
//! ┌──────────┐     ┌───────────┐     ┌──────▼───────┐
//! │  Report  │◀────│ RunResult │◀────│   Metrics    │
//! │Generator │     │  (JSON)   │     │  Aggregator  │
//! └──────────┘     └───────────┘     └──────────────┘
//! ```

pub mod config;
pub mod cost_model;
pub mod engine;
pub mod metrics;
pub mod report;
pub mod request;
pub mod scheduler;
pub mod workload;

// Re-export key types for convenience.
pub use config::{HarnessConfig, PacingMode, PricingConfig, RunMode, UnavailablePolicy};
pub use cost_model::{CostModel, GateOverheadProfile, ModelProfile, SimulatedOutcome};
pub use engine::{Harness, HarnessError, RunMetadata, RunResult, RunStatus};
pub use metrics::{LatencyStats, MetricsCollector, RunSummary};
pub use report::{compare, format_report, Report, ReportError};
pub use request::{Modality, Request};
pub use scheduler::{CancelToken, Scheduler};
pub use workload::{load_workload, Workload, WorkloadError};

/// Run one workload file under the given configuration.
pub fn run_workload(
    config: HarnessConfig,
    workload_path: &std::path::Path,
) -> Result<RunResult, HarnessError> {
    let workload = load_workload(workload_path)?;
    Harness::new(config)?.run(&workload)
}

/// Run the same workload as a transformer_only baseline and as a gated run,
/// then compare the two.
pub fn run_comparison(
    config: &HarnessConfig,
    workload: &Workload,
    pricing: &PricingConfig,
) -> Result<(RunResult, RunResult, Report), ReportError> {
    let mut baseline_config = config.clone();
    baseline_config.run.mode = RunMode::TransformerOnly;
    let baseline = Harness::new(baseline_config)?.run(workload)?;

    let mut gated_config = config.clone();
    gated_config.run.mode = RunMode::Gated;
    let gated = Harness::new(gated_config)?
        .with_reference(&baseline)
        .run(workload)?;

    let report = compare(&baseline, &gated, pricing)?;
    Ok((baseline, gated, report))
}
