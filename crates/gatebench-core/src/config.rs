//! TOML configuration parsing for gatebench.
//!
//! Defines the run configuration (mode, pacing, gate selection, model and
//! gate-overhead profiles) and the pricing file consumed by reports. Both are
//! loaded once and then passed explicitly to every component.

use crate::cost_model::{GateOverheadProfile, ModelProfile};
use gatebench_gate::{GateKind, RemoteSettings, StubGate, StubRules};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Validation(String),
    #[error("Missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}

impl ConfigError {
    /// Process exit code: unreadable files are I/O failures, the rest are
    /// configuration failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::Io(_) => 1,
            _ => 4,
        }
    }
}

/// Whether the gate's decision is honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Baseline: every request is rendered by the model.
    TransformerOnly,
    /// The gate decides per request.
    Gated,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::TransformerOnly => "transformer_only",
            RunMode::Gated => "gated",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "transformer_only" | "baseline" => Some(RunMode::TransformerOnly),
            "gated" => Some(RunMode::Gated),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replay pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    AsFastAsPossible,
    RespectTimestamps,
}

impl PacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacingMode::AsFastAsPossible => "as_fast_as_possible",
            PacingMode::RespectTimestamps => "respect_timestamps",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "as_fast_as_possible" | "fast" => Some(PacingMode::AsFastAsPossible),
            "respect_timestamps" | "replay" => Some(PacingMode::RespectTimestamps),
            _ => None,
        }
    }
}

/// What to do when the remote gate cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Abort the run with a gate-unavailable error.
    Fail,
    /// Run the whole workload on the stub instead.
    FallbackToStub,
}

/// Top-level harness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub gate: GateSection,
    #[serde(default)]
    pub model: ModelProfile,
    #[serde(default)]
    pub gate_overhead: GateOverheadProfile,
}

/// General run parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Human-readable name for this run.
    #[serde(default = "default_run_name")]
    pub name: String,
    #[serde(default = "default_mode")]
    pub mode: RunMode,
    #[serde(default = "default_pacing")]
    pub pacing: PacingMode,
    /// Size of the bounded dispatch worker pool.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Query the gate in transformer_only mode for bookkeeping.
    #[serde(default)]
    pub consult_gate_in_baseline: bool,
}

fn default_run_name() -> String {
    "gatebench".to_string()
}
fn default_mode() -> RunMode {
    RunMode::Gated
}
fn default_pacing() -> PacingMode {
    PacingMode::AsFastAsPossible
}
fn default_workers() -> usize {
    4
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            name: default_run_name(),
            mode: default_mode(),
            pacing: default_pacing(),
            workers: default_workers(),
            consult_gate_in_baseline: false,
        }
    }
}

/// Gate selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default = "default_gate_kind")]
    pub kind: GateKind,
    #[serde(default = "default_unavailable_policy")]
    pub on_unavailable: UnavailablePolicy,
    /// Required when `kind = "remote"`.
    pub remote: Option<RemoteSettings>,
    #[serde(default)]
    pub stub: StubRules,
}

fn default_gate_kind() -> GateKind {
    GateKind::Stub
}
fn default_unavailable_policy() -> UnavailablePolicy {
    UnavailablePolicy::Fail
}

impl Default for GateSection {
    fn default() -> Self {
        Self {
            kind: default_gate_kind(),
            on_unavailable: default_unavailable_policy(),
            remote: None,
            stub: StubRules::default(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency. Call again after applying
    /// command-line overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.workers == 0 {
            return Err(ConfigError::Validation("run.workers must be > 0".to_string()));
        }
        self.model.validate()?;
        self.gate_overhead.validate()?;

        if self.gate.kind == GateKind::Remote {
            let remote = self.gate.remote.as_ref().ok_or_else(|| {
                ConfigError::Validation(
                    "gate.kind = \"remote\" requires a [gate.remote] section".to_string(),
                )
            })?;
            if remote.url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "gate.remote.url must not be empty".to_string(),
                ));
            }
            if remote.timeout_ms == 0 {
                return Err(ConfigError::Validation(
                    "gate.remote.timeout_ms must be > 0".to_string(),
                ));
            }
        }

        // The stub is always a possible fallback, so its table must compile.
        StubGate::new(&self.gate.stub)
            .map_err(|e| ConfigError::Validation(format!("gate.stub: {}", e)))?;
        Ok(())
    }
}

/// Reject negative or non-finite profile constants.
pub(crate) fn check_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "{} must be a finite, non-negative number (got {})",
            name, value
        )))
    }
}

/// Cost rates used by report generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// USD per GPU hour.
    pub gpu_hour: f64,
    /// USD per one million output tokens.
    pub token_1m: f64,
    /// Daily request volume used to scale projections; defaults to the
    /// compared runs' request count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_requests: Option<f64>,
}

impl PricingConfig {
    pub const REQUIRED_KEYS: [&'static str; 2] = ["gpu_hour", "token_1m"];

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = toml::from_str(s)?;

        let missing: Vec<String> = Self::REQUIRED_KEYS
            .iter()
            .filter(|k| !table.contains_key(**k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingKeys(missing));
        }

        let gpu_hour = rate(&table, "gpu_hour")?;
        let token_1m = rate(&table, "token_1m")?;
        let daily_requests = match table.get("daily_requests") {
            None => None,
            Some(_) => {
                let v = rate(&table, "daily_requests")?;
                if v == 0.0 {
                    return Err(ConfigError::Validation(
                        "daily_requests must be > 0".to_string(),
                    ));
                }
                Some(v)
            }
        };

        Ok(Self {
            gpu_hour,
            token_1m,
            daily_requests,
        })
    }
}

fn rate(table: &toml::Table, key: &str) -> Result<f64, ConfigError> {
    let value = match table.get(key) {
        Some(toml::Value::Float(f)) => *f,
        Some(toml::Value::Integer(i)) => *i as f64,
        Some(other) => {
            return Err(ConfigError::Validation(format!(
                "{} must be a number (got {})",
                key,
                other.type_str()
            )))
        }
        None => return Err(ConfigError::MissingKeys(vec![key.to_string()])),
    };
    check_non_negative(key, value)?;
    Ok(value)
}
