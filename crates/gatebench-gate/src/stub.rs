//! Deterministic rule-table gate.
//!
//! Stands in for the sealed gate when it is unavailable. The decision is a
//! pure function of the request text and an immutable rule table, checked in
//! a fixed order:
//!
//! 1. disallowed-content pattern → `ABSTAIN`
//! 2. exact FAQ key → `DIRECT` with the configured answer
//! 3. acknowledgment / ping pattern → `NO_OP`
//! 4. otherwise → `RENDER`
//!
//! `DIRECT` is only ever produced from a FAQ table entry.

use crate::traits::*;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rule table for the stub gate, as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StubRules {
    /// Regex patterns that mark disallowed content.
    #[serde(default = "default_disallowed_patterns")]
    pub disallowed_patterns: Vec<String>,
    /// Regex patterns for greetings, pings and empty-ish content.
    #[serde(default = "default_ack_patterns")]
    pub ack_patterns: Vec<String>,
    /// Cached acknowledgment returned with `NO_OP`.
    #[serde(default)]
    pub ack_response: Option<String>,
    /// Reason code attached to `ABSTAIN`.
    #[serde(default = "default_abstain_reason")]
    pub abstain_reason: String,
    /// Canonical question → authorized answer.
    #[serde(default)]
    pub faq: BTreeMap<String, String>,
}

fn default_disallowed_patterns() -> Vec<String> {
    vec![
        r"\bexplosives?\b".to_string(),
        r"\b(make|build)\s+(a\s+)?(bomb|weapon)s?\b".to_string(),
        r"\bnerve\s+agents?\b".to_string(),
    ]
}

fn default_ack_patterns() -> Vec<String> {
    vec![
        r"^(hi|hello|hey|ping|yo|thanks|thank you|ok|okay|good (morning|afternoon|evening))[\s!.?]*$"
            .to_string(),
        r"^[\s[:punct:]]*$".to_string(),
    ]
}

fn default_abstain_reason() -> String {
    "disallowed_content".to_string()
}

impl Default for StubRules {
    fn default() -> Self {
        Self {
            disallowed_patterns: default_disallowed_patterns(),
            ack_patterns: default_ack_patterns(),
            ack_response: None,
            abstain_reason: default_abstain_reason(),
            faq: BTreeMap::new(),
        }
    }
}

/// Deterministic stub gate.
///
/// Holds no per-request state; all tables are read-only after construction.
#[derive(Debug, Clone)]
pub struct StubGate {
    disallowed: Vec<Regex>,
    ack: Vec<Regex>,
    ack_response: Option<String>,
    abstain_reason: String,
    /// Normalized question → answer.
    faq: BTreeMap<String, String>,
}

impl StubGate {
    /// Compile the rule table. Fails on invalid patterns or on FAQ keys that
    /// collide after normalization.
    pub fn new(rules: &StubRules) -> Result<Self, GateError> {
        let disallowed = compile_patterns(&rules.disallowed_patterns)?;
        let ack = compile_patterns(&rules.ack_patterns)?;

        let mut faq = BTreeMap::new();
        for (question, answer) in &rules.faq {
            let key = normalize_input(question);
            if key.is_empty() {
                return Err(GateError::InvalidRule {
                    rule: question.clone(),
                    reason: "FAQ key is empty after normalization".to_string(),
                });
            }
            if faq.insert(key.clone(), answer.clone()).is_some() {
                return Err(GateError::InvalidRule {
                    rule: question.clone(),
                    reason: format!("FAQ key collides with another entry as '{}'", key),
                });
            }
        }

        Ok(Self {
            disallowed,
            ack,
            ack_response: rules.ack_response.clone(),
            abstain_reason: rules.abstain_reason.clone(),
            faq,
        })
    }

    /// Evaluate the rule table. Infallible; `decide` wraps this for the trait.
    pub fn evaluate(&self, input: &str) -> Decision {
        let normalized = normalize_input(input);

        if self.disallowed.iter().any(|re| re.is_match(&normalized)) {
            return Decision::Abstain(self.abstain_reason.clone());
        }
        if let Some(answer) = self.faq.get(&normalized) {
            return Decision::Direct(answer.clone());
        }
        if self.ack.iter().any(|re| re.is_match(&normalized)) {
            return Decision::NoOp(self.ack_response.clone());
        }
        Decision::Render
    }

    /// Whether `answer` is one the FAQ table authorizes.
    pub fn authorizes(&self, answer: &str) -> bool {
        self.faq.values().any(|a| a == answer)
    }

    pub fn faq_len(&self) -> usize {
        self.faq.len()
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, GateError> {
    patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .map_err(|e| GateError::InvalidRule {
                    rule: p.clone(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

impl DecisionGate for StubGate {
    fn decide(&self, request: &RequestInfo) -> Result<Decision, GateError> {
        Ok(self.evaluate(&request.input))
    }

    fn name(&self) -> &str {
        "deterministic_stub"
    }

    fn kind(&self) -> GateKind {
        GateKind::Stub
    }
}
