//! HTTP adapter for an external decision endpoint.
//!
//! Sends `{"input": <text>}` and expects `{"action": <tag>, "payload": ...}`
//! back. Every failure mode (transport, timeout, non-2xx, unexpected body)
//! surfaces as [`GateError::Unavailable`]; the caller decides whether that
//! ends the run or switches it to the stub.

use crate::traits::*;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Connection settings for a remote gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Base URL, e.g. `http://localhost:8080`.
    pub url: String,
    #[serde(default = "default_decide_path")]
    pub decide_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_decide_path() -> String {
    "/gate".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            decide_path: default_decide_path(),
            health_path: default_health_path(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DecideRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecideResponse {
    action: String,
    #[serde(default)]
    payload: Option<String>,
}

/// Remote decision gate client.
#[derive(Debug, Clone)]
pub struct RemoteGate {
    client: Client,
    decide_url: String,
    health_url: String,
}

impl RemoteGate {
    pub fn new(settings: &RemoteSettings) -> Result<Self, GateError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .map_err(|e| GateError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        let base = settings.url.trim_end_matches('/');
        Ok(Self {
            client,
            decide_url: format!("{}{}", base, settings.decide_path),
            health_url: format!("{}{}", base, settings.health_path),
        })
    }

    /// Probe the health endpoint. Any non-2xx or transport error is reported
    /// as unavailability.
    pub fn health_check(&self) -> Result<(), GateError> {
        let response = self
            .client
            .get(&self.health_url)
            .send()
            .map_err(|e| GateError::Unavailable(format!("health probe failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(GateError::Unavailable(format!(
                "health probe returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    pub fn decide_url(&self) -> &str {
        &self.decide_url
    }
}

/// Map the endpoint's action tag and payload to a [`Decision`].
pub fn decision_from_action(action: &str, payload: Option<String>) -> Result<Decision, GateError> {
    match action.to_ascii_lowercase().as_str() {
        "direct" => payload.map(Decision::Direct).ok_or_else(|| {
            GateError::Unavailable("contract violation: DIRECT without payload".to_string())
        }),
        "no_op" | "noop" => Ok(Decision::NoOp(payload)),
        "abstain" => Ok(Decision::Abstain(
            payload.unwrap_or_else(|| "unspecified".to_string()),
        )),
        "render" => Ok(Decision::Render),
        other => Err(GateError::Unavailable(format!(
            "contract violation: unknown action '{}'",
            other
        ))),
    }
}

impl DecisionGate for RemoteGate {
    fn decide(&self, request: &RequestInfo) -> Result<Decision, GateError> {
        let response = self
            .client
            .post(&self.decide_url)
            .json(&DecideRequest {
                input: &request.input,
            })
            .send()
            .map_err(|e| GateError::Unavailable(format!("request {} failed: {}", request.id, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::Unavailable(format!(
                "request {} returned HTTP {}",
                request.id, status
            )));
        }

        let body: DecideResponse = response.json().map_err(|e| {
            GateError::Unavailable(format!(
                "contract violation: unparsable body for {}: {}",
                request.id, e
            ))
        })?;
        debug!(request_id = %request.id, action = %body.action, "remote gate decision");
        decision_from_action(&body.action, body.payload)
    }

    fn name(&self) -> &str {
        "remote"
    }

    fn kind(&self) -> GateKind {
        GateKind::Remote
    }
}
