//! Cost-model simulator.
//!
//! Converts a request and the decision it received into simulated latency,
//! energy and FLOP figures without running any model. RENDER pays the model
//! profile (fixed overhead plus a per-token term); every other decision pays
//! only the much smaller gate-overhead profile and records the model work it
//! avoided. The arithmetic is pure, so identical profiles and requests yield
//! bit-identical outcomes.

use crate::config::{check_non_negative, ConfigError};
use crate::request::Request;
use gatebench_gate::{Decision, DecisionKind};
use serde::{Deserialize, Serialize};

/// Downstream model cost constants.
///
/// Defaults approximate a 9B-parameter decoder served on a single
/// H100-class GPU at roughly 320 W.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    #[serde(default = "default_model_name")]
    pub name: String,
    /// Per-invocation latency independent of output length (prefill, queueing).
    #[serde(default = "default_fixed_overhead_ms")]
    pub fixed_overhead_ms: f64,
    #[serde(default = "default_latency_per_token_ms")]
    pub latency_per_token_ms: f64,
    #[serde(default = "default_fixed_overhead_joules")]
    pub fixed_overhead_joules: f64,
    #[serde(default = "default_energy_per_token_joules")]
    pub energy_per_token_joules: f64,
    #[serde(default)]
    pub fixed_overhead_flops: f64,
    /// Roughly 2 x parameters, plus attention overhead.
    #[serde(default = "default_flops_per_token")]
    pub flops_per_token: f64,
    /// Effective FLOPs one GPU delivers in an hour at realistic utilization.
    #[serde(default = "default_flops_per_gpu_hour")]
    pub flops_per_gpu_hour: f64,
}

fn default_model_name() -> String {
    "decoder-9b".to_string()
}
fn default_fixed_overhead_ms() -> f64 {
    86.4
}
fn default_latency_per_token_ms() -> f64 {
    0.3663
}
fn default_fixed_overhead_joules() -> f64 {
    27.65
}
fn default_energy_per_token_joules() -> f64 {
    0.1172
}
fn default_flops_per_token() -> f64 {
    2.2176e10
}
fn default_flops_per_gpu_hour() -> f64 {
    1.4e18
}

impl Default for ModelProfile {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            fixed_overhead_ms: default_fixed_overhead_ms(),
            latency_per_token_ms: default_latency_per_token_ms(),
            fixed_overhead_joules: default_fixed_overhead_joules(),
            energy_per_token_joules: default_energy_per_token_joules(),
            fixed_overhead_flops: 0.0,
            flops_per_token: default_flops_per_token(),
            flops_per_gpu_hour: default_flops_per_gpu_hour(),
        }
    }
}

impl ModelProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("model.fixed_overhead_ms", self.fixed_overhead_ms)?;
        check_non_negative("model.latency_per_token_ms", self.latency_per_token_ms)?;
        check_non_negative("model.fixed_overhead_joules", self.fixed_overhead_joules)?;
        check_non_negative("model.energy_per_token_joules", self.energy_per_token_joules)?;
        check_non_negative("model.fixed_overhead_flops", self.fixed_overhead_flops)?;
        check_non_negative("model.flops_per_token", self.flops_per_token)?;
        check_non_negative("model.flops_per_gpu_hour", self.flops_per_gpu_hour)?;
        if self.flops_per_gpu_hour == 0.0 {
            return Err(ConfigError::Validation(
                "model.flops_per_gpu_hour must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Latency of one model invocation producing `tokens` output tokens.
    pub fn render_latency_ms(&self, tokens: u32) -> f64 {
        self.fixed_overhead_ms + self.latency_per_token_ms * tokens as f64
    }

    pub fn render_energy_joules(&self, tokens: u32) -> f64 {
        self.fixed_overhead_joules + self.energy_per_token_joules * tokens as f64
    }

    pub fn render_flops(&self, tokens: u32) -> f64 {
        self.fixed_overhead_flops + self.flops_per_token * tokens as f64
    }
}

/// Cost of evaluating the gate itself for a non-RENDER decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOverheadProfile {
    #[serde(default = "default_gate_latency_ms")]
    pub latency_ms: f64,
    #[serde(default = "default_gate_energy_joules")]
    pub energy_joules: f64,
    #[serde(default = "default_gate_flops")]
    pub flops: f64,
}

fn default_gate_latency_ms() -> f64 {
    2.0
}
fn default_gate_energy_joules() -> f64 {
    0.05
}
fn default_gate_flops() -> f64 {
    1.0e6
}

impl Default for GateOverheadProfile {
    fn default() -> Self {
        Self {
            latency_ms: default_gate_latency_ms(),
            energy_joules: default_gate_energy_joules(),
            flops: default_gate_flops(),
        }
    }
}

impl GateOverheadProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_non_negative("gate_overhead.latency_ms", self.latency_ms)?;
        check_non_negative("gate_overhead.energy_joules", self.energy_joules)?;
        check_non_negative("gate_overhead.flops", self.flops)
    }
}

/// Simulated result of serving one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedOutcome {
    pub request_id: String,
    /// The decision that was actually applied.
    pub decision_kind: DecisionKind,
    /// What the gate returned; `None` when it was not consulted.
    pub gate_decision: Option<Decision>,
    /// RENDER was imposed by transformer_only mode.
    pub forced_render: bool,
    pub latency_ms: f64,
    pub energy_joules: f64,
    pub flops: f64,
    /// Zero for RENDER.
    pub flops_avoided: f64,
    pub tokens_avoided: u64,
    pub output_text: Option<String>,
    /// Only set for RENDER outcomes that had a reference output.
    pub exact_match: Option<bool>,
    /// Dispatch time relative to run start.
    pub dispatch_offset_ms: f64,
}

impl SimulatedOutcome {
    pub fn invoked_model(&self) -> bool {
        self.decision_kind == DecisionKind::Render
    }

    /// Compare a RENDER output against a reference run's output for the same
    /// request. Non-RENDER outcomes and missing references leave
    /// `exact_match` unset.
    pub fn check_reference(&mut self, reference: Option<&str>) {
        if !self.invoked_model() {
            return;
        }
        if let Some(expected) = reference {
            self.exact_match = Some(self.output_text.as_deref() == Some(expected));
        }
    }
}

/// Deterministic stand-in for model output.
pub fn rendered_text(request: &Request) -> String {
    format!(
        "[rendered:{}:{} tokens]",
        request.id, request.max_output_tokens
    )
}

/// The simulator: a validated pair of profiles.
#[derive(Debug, Clone)]
pub struct CostModel {
    model: ModelProfile,
    gate_overhead: GateOverheadProfile,
}

impl CostModel {
    pub fn new(model: ModelProfile, gate_overhead: GateOverheadProfile) -> Result<Self, ConfigError> {
        model.validate()?;
        gate_overhead.validate()?;
        Ok(Self {
            model,
            gate_overhead,
        })
    }

    pub fn model(&self) -> &ModelProfile {
        &self.model
    }

    pub fn gate_overhead(&self) -> &GateOverheadProfile {
        &self.gate_overhead
    }

    /// Simulate serving `request` under the applied `decision`.
    pub fn simulate(&self, request: &Request, decision: &Decision) -> SimulatedOutcome {
        let mut outcome = self.cost_for(request, decision);
        outcome.gate_decision = Some(decision.clone());
        outcome
    }

    /// Simulate a transformer_only request: always the RENDER path. The
    /// gate's answer, if it was consulted, is kept for bookkeeping only.
    pub fn simulate_forced(
        &self,
        request: &Request,
        gate_decision: Option<Decision>,
    ) -> SimulatedOutcome {
        let mut outcome = self.cost_for(request, &Decision::Render);
        outcome.gate_decision = gate_decision;
        outcome.forced_render = true;
        outcome
    }

    fn cost_for(&self, request: &Request, decision: &Decision) -> SimulatedOutcome {
        let tokens = request.max_output_tokens;
        let (latency_ms, energy_joules, flops, flops_avoided, tokens_avoided) =
            if decision.invokes_model() {
                (
                    self.model.render_latency_ms(tokens),
                    self.model.render_energy_joules(tokens),
                    self.model.render_flops(tokens),
                    0.0,
                    0,
                )
            } else {
                (
                    self.gate_overhead.latency_ms,
                    self.gate_overhead.energy_joules,
                    self.gate_overhead.flops,
                    self.model.flops_per_token * tokens as f64,
                    tokens as u64,
                )
            };

        let output_text = match decision {
            Decision::Direct(answer) => Some(answer.clone()),
            Decision::NoOp(ack) => ack.clone(),
            Decision::Abstain(_) => None,
            Decision::Render => Some(rendered_text(request)),
        };

        SimulatedOutcome {
            request_id: request.id.clone(),
            decision_kind: decision.kind(),
            gate_decision: None,
            forced_render: false,
            latency_ms,
            energy_joules,
            flops,
            flops_avoided,
            tokens_avoided,
            output_text,
            exact_match: None,
            dispatch_offset_ms: 0.0,
        }
    }
}
