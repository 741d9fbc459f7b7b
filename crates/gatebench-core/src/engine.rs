//! Per-run pipeline: gate selection, replay, simulation and aggregation.
//!
//! A [`Harness`] owns one validated configuration and produces a
//! [`RunResult`] per workload. Each request flows
//! scheduler → gate → cost model → aggregator, and a run is served by
//! exactly one gate adapter from its first request to its last.

use crate::config::{ConfigError, HarnessConfig, PacingMode, RunMode, UnavailablePolicy};
use crate::cost_model::{CostModel, GateOverheadProfile, ModelProfile, SimulatedOutcome};
use crate::metrics::{summarize, MetricsCollector, RunSummary};
use crate::request::Request;
use crate::scheduler::{CancelToken, Scheduler};
use crate::workload::{Workload, WorkloadError};
use gatebench_gate::{DecisionGate, GateError, GateKind, RemoteGate, StubGate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid run result JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::Workload(WorkloadError::Io(_)) => 1,
            HarnessError::Workload(_) => 2,
            HarnessError::Gate(GateError::Unavailable(_)) => 3,
            HarnessError::Gate(GateError::InvalidRule { .. }) => 4,
            HarnessError::Config(e) => e.exit_code(),
            HarnessError::Io(_) | HarnessError::Json(_) => 1,
        }
    }
}

/// Whether every request of the workload was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    /// Cancelled before every request was dispatched.
    Partial,
}

/// The adapter that served a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRecord {
    pub kind: GateKind,
    pub name: String,
    /// Set when the configured remote gate was replaced by the stub.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub name: String,
    pub mode: RunMode,
    pub pacing: PacingMode,
    pub status: RunStatus,
    pub workload_id: String,
    pub total_requests: usize,
    pub completed_requests: usize,
    /// `None` when no gate was consulted (transformer_only by default).
    pub gate: Option<GateRecord>,
    pub model_profile: ModelProfile,
    pub gate_overhead: GateOverheadProfile,
    pub workers: usize,
    pub started_at_unix_ms: u64,
    pub finished_at_unix_ms: u64,
    pub elapsed_ms: f64,
}

/// Persisted result of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub metadata: RunMetadata,
    /// One outcome per processed request, in input order.
    pub outcomes: Vec<SimulatedOutcome>,
    pub summary: RunSummary,
}

impl RunResult {
    pub fn save(&self, path: &Path) -> Result<(), HarnessError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn is_partial(&self) -> bool {
        self.metadata.status == RunStatus::Partial
    }

    /// Recompute the summary from the stored outcomes.
    pub fn recompute_summary(&self) -> RunSummary {
        summarize(&self.outcomes, self.metadata.pacing, self.metadata.elapsed_ms)
    }

    /// Whether the stored summary matches a recomputation exactly.
    pub fn verify_summary(&self) -> bool {
        self.recompute_summary() == self.summary
    }

    /// Output text of every RENDER outcome, keyed by request id.
    pub fn reference_outputs(&self) -> HashMap<String, String> {
        self.outcomes
            .iter()
            .filter(|o| o.invoked_model())
            .filter_map(|o| Some((o.request_id.clone(), o.output_text.clone()?)))
            .collect()
    }
}

fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Runs workloads under one configuration.
pub struct Harness {
    config: HarnessConfig,
    cost_model: CostModel,
    cancel: CancelToken,
    reference: HashMap<String, String>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let cost_model = CostModel::new(config.model.clone(), config.gate_overhead.clone())?;
        Ok(Self {
            config,
            cost_model,
            cancel: CancelToken::new(),
            reference: HashMap::new(),
        })
    }

    /// Use an externally owned cancellation token (e.g. one tripped by a
    /// signal handler).
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check RENDER outputs against a reference run.
    pub fn with_reference(mut self, reference: &RunResult) -> Self {
        self.reference = reference.reference_outputs();
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn needs_gate(&self) -> bool {
        self.config.run.mode == RunMode::Gated || self.config.run.consult_gate_in_baseline
    }

    fn stub_gate(&self) -> Result<StubGate, HarnessError> {
        Ok(StubGate::new(&self.config.gate.stub)?)
    }

    /// Run a workload with the configured gate.
    pub fn run(&self, workload: &Workload) -> Result<RunResult, HarnessError> {
        if !self.needs_gate() {
            return self.execute(workload, None, None);
        }

        match self.config.gate.kind {
            GateKind::Stub => {
                let stub = self.stub_gate()?;
                self.run_with_gate(workload, &stub)
            }
            GateKind::Remote => {
                let settings = self.config.gate.remote.as_ref().ok_or_else(|| {
                    ConfigError::Validation("gate.remote section is missing".to_string())
                })?;
                let remote = RemoteGate::new(settings)?;
                match remote.health_check() {
                    Ok(()) => {
                        info!(url = %settings.url, "remote gate healthy");
                        self.run_with_gate(workload, &remote)
                    }
                    Err(e) => {
                        warn!(url = %settings.url, error = %e, "remote gate health probe failed");
                        self.fall_back(workload, e)
                    }
                }
            }
        }
    }

    /// Run a workload with a specific gate, applying the configured
    /// unavailability policy if that gate fails mid-run.
    pub fn run_with_gate(
        &self,
        workload: &Workload,
        gate: &dyn DecisionGate,
    ) -> Result<RunResult, HarnessError> {
        match self.execute(workload, Some(gate), None) {
            Err(HarnessError::Gate(e @ GateError::Unavailable(_)))
                if gate.kind() != GateKind::Stub =>
            {
                self.fall_back(workload, e)
            }
            other => other,
        }
    }

    fn fall_back(&self, workload: &Workload, cause: GateError) -> Result<RunResult, HarnessError> {
        match self.config.gate.on_unavailable {
            UnavailablePolicy::Fail => Err(cause.into()),
            UnavailablePolicy::FallbackToStub => {
                let reason = cause.to_string();
                warn!(reason = %reason, "gate unavailable, replaying whole run with stub");
                let stub = self.stub_gate()?;
                self.execute(workload, Some(&stub as &dyn DecisionGate), Some(reason))
            }
        }
    }

    fn execute(
        &self,
        workload: &Workload,
        gate: Option<&dyn DecisionGate>,
        fallback_reason: Option<String>,
    ) -> Result<RunResult, HarnessError> {
        let mode = self.config.run.mode;
        if mode == RunMode::Gated && gate.is_none() {
            return Err(
                ConfigError::Validation("gated mode requires a decision gate".to_string()).into(),
            );
        }
        if let Some(g) = gate {
            info!(gate = g.name(), kind = g.kind().as_str(), mode = %mode, "decision gate selected");
        }

        let scheduler = Scheduler::new(self.config.run.pacing, self.config.run.workers);
        let started_at = unix_ms_now();
        let mut collector = MetricsCollector::new();
        let mut outcomes: Vec<SimulatedOutcome> = Vec::with_capacity(workload.len());

        let job = |request: &Request, offset_ms: f64| -> Result<SimulatedOutcome, GateError> {
            let mut outcome = self.serve(mode, gate, request)?;
            outcome.dispatch_offset_ms = offset_ms;
            outcome.check_reference(self.reference.get(&request.id).map(String::as_str));
            Ok(outcome)
        };
        let sink = |_index: usize, outcome: SimulatedOutcome| {
            collector.record(&outcome);
            outcomes.push(outcome);
        };
        let stats = scheduler.replay(&workload.requests, &self.cancel, job, sink)?;

        let status = if stats.is_partial() {
            warn!(
                completed = stats.completed,
                total = stats.total,
                "run cancelled, keeping partial results"
            );
            RunStatus::Partial
        } else {
            RunStatus::Complete
        };
        let summary = collector.finalize(self.config.run.pacing, stats.elapsed_ms);

        let metadata = RunMetadata {
            name: self.config.run.name.clone(),
            mode,
            pacing: self.config.run.pacing,
            status,
            workload_id: workload.id.clone(),
            total_requests: workload.len(),
            completed_requests: outcomes.len(),
            gate: gate.map(|g| GateRecord {
                kind: g.kind(),
                name: g.name().to_string(),
                fallback_reason,
            }),
            model_profile: self.cost_model.model().clone(),
            gate_overhead: self.cost_model.gate_overhead().clone(),
            workers: scheduler.workers(),
            started_at_unix_ms: started_at,
            finished_at_unix_ms: unix_ms_now(),
            elapsed_ms: stats.elapsed_ms,
        };
        info!(
            status = ?metadata.status,
            requests = metadata.completed_requests,
            elapsed_ms = metadata.elapsed_ms,
            "run finished"
        );

        Ok(RunResult {
            metadata,
            outcomes,
            summary,
        })
    }

    fn serve(
        &self,
        mode: RunMode,
        gate: Option<&dyn DecisionGate>,
        request: &Request,
    ) -> Result<SimulatedOutcome, GateError> {
        let gate_decision = match gate {
            Some(g) => Some(g.decide(&request.gate_info())?),
            None => None,
        };
        Ok(match (mode, gate_decision) {
            (RunMode::Gated, Some(decision)) => self.cost_model.simulate(request, &decision),
            (_, decision) => self.cost_model.simulate_forced(request, decision),
        })
    }
}
