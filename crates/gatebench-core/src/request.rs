//! Request model for gate benchmarking.
//!
//! Each [`Request`] is one line of a workload: an inference request with its
//! modality, prompt text and output budget, plus optional replay timing and
//! opaque metadata.

use gatebench_gate::RequestInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input modality of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Multimodal,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Image, Modality::Multimodal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Multimodal => "multimodal",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Modality::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

/// A metadata value: metadata is opaque to the harness but restricted to
/// strings and numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Text(String),
    Number(f64),
}

/// A single inference request from a workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique (within the workload) request identifier.
    pub id: String,
    pub modality: Modality,
    /// Prompt text; never empty.
    pub input: String,
    /// Output token budget; always positive.
    pub max_output_tokens: u32,
    /// Recorded arrival time in seconds since the epoch, used only for pacing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Request {
    /// The projection of this request a gate may consult.
    pub fn gate_info(&self) -> RequestInfo {
        RequestInfo {
            id: self.id.clone(),
            input: self.input.clone(),
            max_output_tokens: self.max_output_tokens,
        }
    }
}
