//! Decision gate trait definitions.
//!
//! Every gate implements the [`DecisionGate`] trait, which receives the
//! request text and returns one of the four closed [`Decision`] variants.
//! The harness never inspects how a gate reaches its decision.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by gate construction or evaluation.
#[derive(Error, Debug)]
pub enum GateError {
    /// The gate could not produce a decision: transport failure, timeout,
    /// non-2xx status, or a response that violates the decision contract.
    #[error("Decision gate unavailable: {0}")]
    Unavailable(String),
    /// A stub rule could not be compiled or collides with another rule.
    #[error("Invalid gate rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// The request view a gate is allowed to see.
///
/// This is the gate crate's projection of a workload request; it carries
/// only what a gate may consult, not the full simulation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub id: String,
    pub input: String,
    pub max_output_tokens: u32,
}

/// A gate decision for a single request.
///
/// The set of variants is closed: consumers match exhaustively so that a new
/// kind cannot be silently absorbed by a default arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Answer directly with an authorized response.
    Direct(String),
    /// Nothing to compute; optionally carries a cached acknowledgment.
    NoOp(Option<String>),
    /// Refuse, with a reason code.
    Abstain(String),
    /// The downstream model must be invoked.
    Render,
}

impl Decision {
    /// The payload-free tag of this decision.
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Direct(_) => DecisionKind::Direct,
            Decision::NoOp(_) => DecisionKind::NoOp,
            Decision::Abstain(_) => DecisionKind::Abstain,
            Decision::Render => DecisionKind::Render,
        }
    }

    /// Whether the downstream model is invoked for this decision.
    pub fn invokes_model(&self) -> bool {
        matches!(self, Decision::Render)
    }
}

/// Payload-free decision tag, used for bookkeeping and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Direct,
    NoOp,
    Abstain,
    Render,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 4] = [
        DecisionKind::Direct,
        DecisionKind::NoOp,
        DecisionKind::Abstain,
        DecisionKind::Render,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Direct => "DIRECT",
            DecisionKind::NoOp => "NO_OP",
            DecisionKind::Abstain => "ABSTAIN",
            DecisionKind::Render => "RENDER",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which adapter implementation served a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    Stub,
    Remote,
}

impl GateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateKind::Stub => "stub",
            GateKind::Remote => "remote",
        }
    }
}

/// The core decision gate trait.
///
/// Gates are shared across the replay worker pool, so `decide` takes `&self`
/// and implementations must be safe for concurrent reads.
pub trait DecisionGate: Send + Sync {
    /// Decide how a single request should be served.
    fn decide(&self, request: &RequestInfo) -> Result<Decision, GateError>;

    /// Human-readable name for reports and run metadata.
    fn name(&self) -> &str;

    /// Adapter implementation behind this gate.
    fn kind(&self) -> GateKind;
}

/// Collapse a request text into its matching form: lowercase, trimmed, with
/// every whitespace run replaced by a single space.
pub fn normalize_input(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
