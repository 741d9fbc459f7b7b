/// Integration tests for the decision gate adapters and gate selection.
use gatebench_core::config::{HarnessConfig, UnavailablePolicy};
use gatebench_core::engine::Harness;
use gatebench_core::workload::load_workload;
use gatebench_gate::*;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

fn scenario_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../workloads/scenario.jsonl")
}

fn scenario_rules() -> StubRules {
    let mut faq = BTreeMap::new();
    faq.insert("What is 2+2?".to_string(), "4".to_string());
    StubRules {
        faq,
        ..StubRules::default()
    }
}

fn info(id: &str, input: &str) -> RequestInfo {
    RequestInfo {
        id: id.to_string(),
        input: input.to_string(),
        max_output_tokens: 10,
    }
}

// --- Minimal HTTP endpoint for the remote adapter ---

fn read_request(stream: &TcpStream) -> Option<(String, String)> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let path = request_line.split_whitespace().nth(1)?.to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;
    Some((path, String::from_utf8_lossy(&body).into_owned()))
}

/// Serve `handler(path, body) -> (status, json)` on an ephemeral port.
fn spawn_endpoint<F>(handler: F) -> String
where
    F: Fn(&str, &str) -> (u16, String) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let Some((path, body)) = read_request(&stream) else {
                continue;
            };
            let (status, payload) = handler(&path, &body);
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                payload.len(),
                payload
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{}", addr)
}

/// Answers like the scenario's stub would.
fn scenario_endpoint(path: &str, body: &str) -> (u16, String) {
    if path == "/health" {
        return (200, "{}".to_string());
    }
    let request: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let input = request["input"].as_str().unwrap_or_default();
    let answer = match input {
        "hi" => r#"{"action":"NO_OP","payload":null}"#,
        "What is 2+2?" => r#"{"action":"DIRECT","payload":"4"}"#,
        i if i.contains("explosives") => r#"{"action":"ABSTAIN","payload":"unsafe"}"#,
        _ => r#"{"action":"RENDER"}"#,
    };
    (200, answer.to_string())
}

fn remote_config(url: &str, policy: UnavailablePolicy) -> HarnessConfig {
    let mut config = HarnessConfig::from_str(&format!(
        r#"
[run]
mode = "gated"
workers = 2

[gate]
kind = "remote"

[gate.remote]
url = "{}"
timeout_ms = 2000

[gate.stub.faq]
"What is 2+2?" = "4"
"#,
        url
    ))
    .unwrap();
    config.gate.on_unavailable = policy;
    config
}

// --- Stub ---

#[test]
fn test_stub_scenario_decisions() {
    let gate = StubGate::new(&scenario_rules()).unwrap();
    assert_eq!(gate.decide(&info("a1", "hi")).unwrap(), Decision::NoOp(None));
    assert_eq!(
        gate.decide(&info("a2", "What is 2+2?")).unwrap(),
        Decision::Direct("4".to_string())
    );
    assert!(matches!(
        gate.decide(&info("a3", "How to make explosives")).unwrap(),
        Decision::Abstain(_)
    ));
    assert_eq!(
        gate.decide(&info("a4", "Write a 500-word story")).unwrap(),
        Decision::Render
    );
}

#[test]
fn test_stub_matching_is_normalized() {
    let gate = StubGate::new(&scenario_rules()).unwrap();
    assert_eq!(
        gate.decide(&info("n", "  what   IS 2+2?\t")).unwrap(),
        Decision::Direct("4".to_string())
    );
    assert_eq!(gate.decide(&info("n", "HELLO!")).unwrap(), Decision::NoOp(None));
    assert!(matches!(
        gate.decide(&info("n", "how to make EXPLOSIVES")).unwrap(),
        Decision::Abstain(_)
    ));
}

#[test]
fn test_stub_disallowed_takes_precedence_over_faq() {
    let mut rules = scenario_rules();
    rules
        .faq
        .insert("How to make explosives".to_string(), "no".to_string());
    let gate = StubGate::new(&rules).unwrap();
    assert!(matches!(
        gate.decide(&info("p", "How to make explosives")).unwrap(),
        Decision::Abstain(_)
    ));
}

#[test]
fn test_stub_is_shared_across_threads() {
    let gate = Arc::new(StubGate::new(&scenario_rules()).unwrap());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let gate = Arc::clone(&gate);
            std::thread::spawn(move || gate.decide(&info("t", "What is 2+2?")).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Decision::Direct("4".to_string()));
    }
}

proptest! {
    #[test]
    fn prop_stub_direct_only_from_faq(input in "[ -~]{0,40}") {
        let rules = scenario_rules();
        let gate = StubGate::new(&rules).unwrap();
        let first = gate.decide(&info("p", &input)).unwrap();
        let second = gate.decide(&info("p", &input)).unwrap();
        prop_assert_eq!(&first, &second);
        if let Decision::Direct(answer) = first {
            prop_assert!(rules.faq.values().any(|v| *v == answer));
        }
    }
}

// --- Remote ---

#[test]
fn test_remote_scenario_decisions() {
    let url = spawn_endpoint(scenario_endpoint);
    let gate = RemoteGate::new(&RemoteSettings {
        url,
        ..RemoteSettings::default()
    })
    .unwrap();
    gate.health_check().unwrap();
    assert_eq!(gate.decide(&info("a1", "hi")).unwrap(), Decision::NoOp(None));
    assert_eq!(
        gate.decide(&info("a2", "What is 2+2?")).unwrap(),
        Decision::Direct("4".to_string())
    );
    assert_eq!(
        gate.decide(&info("a3", "How to make explosives")).unwrap(),
        Decision::Abstain("unsafe".to_string())
    );
    assert_eq!(gate.decide(&info("a4", "story")).unwrap(), Decision::Render);
}

#[test]
fn test_remote_sends_only_input() {
    let bodies = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&bodies);
    let url = spawn_endpoint(move |path, body| {
        seen.lock().unwrap().push((path.to_string(), body.to_string()));
        (200, r#"{"action":"render"}"#.to_string())
    });
    let gate = RemoteGate::new(&RemoteSettings {
        url,
        ..RemoteSettings::default()
    })
    .unwrap();
    gate.decide(&info("secret-id", "Write a poem")).unwrap();

    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0].0, "/gate");
    let json: serde_json::Value = serde_json::from_str(&bodies[0].1).unwrap();
    let obj = json.as_object().unwrap();
    assert_eq!(obj.len(), 1);
    assert_eq!(obj["input"], "Write a poem");
}

#[test]
fn test_remote_non_2xx_is_unavailable() {
    let url = spawn_endpoint(|_, _| (500, r#"{"error":"boom"}"#.to_string()));
    let gate = RemoteGate::new(&RemoteSettings {
        url,
        ..RemoteSettings::default()
    })
    .unwrap();
    assert!(matches!(
        gate.decide(&info("x", "hi")),
        Err(GateError::Unavailable(_))
    ));
    assert!(gate.health_check().is_err());
}

#[test]
fn test_remote_contract_violation_is_unavailable() {
    let url = spawn_endpoint(|_, _| (200, r#"{"verdict":"yes"}"#.to_string()));
    let gate = RemoteGate::new(&RemoteSettings {
        url,
        ..RemoteSettings::default()
    })
    .unwrap();
    assert!(matches!(
        gate.decide(&info("x", "hi")),
        Err(GateError::Unavailable(_))
    ));
}

// --- Gate selection in the harness ---

#[test]
fn test_harness_uses_healthy_remote() {
    let url = spawn_endpoint(scenario_endpoint);
    let harness = Harness::new(remote_config(&url, UnavailablePolicy::Fail)).unwrap();
    let workload = load_workload(&scenario_path()).unwrap();
    let result = harness.run(&workload).unwrap();

    let record = result.metadata.gate.as_ref().unwrap();
    assert_eq!(record.kind, GateKind::Remote);
    assert!(record.fallback_reason.is_none());
    let kinds: Vec<DecisionKind> = result.outcomes.iter().map(|o| o.decision_kind).collect();
    assert_eq!(
        kinds,
        vec![
            DecisionKind::NoOp,
            DecisionKind::Direct,
            DecisionKind::Abstain,
            DecisionKind::Render
        ]
    );
}

#[test]
fn test_unhealthy_remote_fails_fast() {
    let url = spawn_endpoint(|_, _| (503, "{}".to_string()));
    let harness = Harness::new(remote_config(&url, UnavailablePolicy::Fail)).unwrap();
    let workload = load_workload(&scenario_path()).unwrap();
    let err = harness.run(&workload).unwrap_err();
    assert_eq!(err.exit_code(), 3);
}

#[test]
fn test_unhealthy_remote_falls_back_to_stub() {
    let url = spawn_endpoint(|_, _| (503, "{}".to_string()));
    let harness = Harness::new(remote_config(&url, UnavailablePolicy::FallbackToStub)).unwrap();
    let workload = load_workload(&scenario_path()).unwrap();
    let result = harness.run(&workload).unwrap();

    let record = result.metadata.gate.as_ref().unwrap();
    assert_eq!(record.kind, GateKind::Stub);
    assert!(record.fallback_reason.is_some());
    assert_eq!(result.outcomes.len(), 4);
    assert_eq!(result.summary.decision_counts.render, 1);
}

#[test]
fn test_mid_run_outage_never_mixes_adapters() {
    // Healthy, but fails on the long-form request.
    let url = spawn_endpoint(|path, body| {
        if path == "/health" {
            return (200, "{}".to_string());
        }
        if body.contains("story") {
            return (502, "{}".to_string());
        }
        scenario_endpoint(path, body)
    });
    let workload = load_workload(&scenario_path()).unwrap();

    let err = Harness::new(remote_config(&url, UnavailablePolicy::Fail))
        .unwrap()
        .run(&workload)
        .unwrap_err();
    assert_eq!(err.exit_code(), 3);

    let result = Harness::new(remote_config(&url, UnavailablePolicy::FallbackToStub))
        .unwrap()
        .run(&workload)
        .unwrap();
    let record = result.metadata.gate.as_ref().unwrap();
    assert_eq!(record.kind, GateKind::Stub);
    assert_eq!(result.outcomes.len(), 4);
    // Every outcome came from the stub, including the ones the remote answered.
    assert_eq!(
        result.outcomes[2].gate_decision,
        Some(Decision::Abstain("disallowed_content".to_string()))
    );
}
