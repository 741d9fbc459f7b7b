/// Integration tests for the full replay pipeline.
use gatebench_core::config::{HarnessConfig, PacingMode, RunMode};
use gatebench_core::engine::{Harness, RunResult, RunStatus};
use gatebench_core::request::{Modality, Request};
use gatebench_core::workload::{generate_workload, load_workload, SyntheticSpec, Workload};
use gatebench_gate::{Decision, DecisionKind};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn scenario() -> Workload {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../workloads/scenario.jsonl");
    load_workload(&path).unwrap()
}

fn scenario_config(mode: RunMode) -> HarnessConfig {
    let mut config = HarnessConfig::from_str(
        r#"
[run]
name = "integration"
workers = 3

[gate]
kind = "stub"

[gate.stub.faq]
"What is 2+2?" = "4"

[model]
name = "test-model"
fixed_overhead_ms = 50.0
latency_per_token_ms = 0.5
fixed_overhead_joules = 20.0
energy_per_token_joules = 0.1
flops_per_token = 2.0e10
flops_per_gpu_hour = 1.0e18

[gate_overhead]
latency_ms = 1.0
energy_joules = 0.01
flops = 1.0e6
"#,
    )
    .unwrap();
    config.run.mode = mode;
    config
}

fn synthetic(count: usize) -> Workload {
    Workload {
        id: "synthetic".to_string(),
        requests: generate_workload(&SyntheticSpec {
            count,
            rate: 1000.0,
            seed: 42,
            start_timestamp: 1_700_000_000.0,
        }),
        warnings: Vec::new(),
    }
}

#[test]
fn test_scenario_gated_decisions_and_aggregate() {
    let result = Harness::new(scenario_config(RunMode::Gated))
        .unwrap()
        .run(&scenario())
        .unwrap();

    let o = &result.outcomes;
    assert_eq!(o.len(), 4);
    assert_eq!(o[0].decision_kind, DecisionKind::NoOp);
    assert_eq!(o[1].decision_kind, DecisionKind::Direct);
    assert_eq!(o[1].output_text.as_deref(), Some("4"));
    assert_eq!(o[2].decision_kind, DecisionKind::Abstain);
    assert_eq!(o[3].decision_kind, DecisionKind::Render);

    for outcome in &o[..3] {
        assert!(outcome.flops_avoided > 0.0, "{}", outcome.request_id);
    }
    assert_eq!(o[3].flops_avoided, 0.0);
    assert_eq!(o[0].flops_avoided, 2.0e10 * 10.0);
    assert_eq!(o[3].latency_ms, 50.0 + 0.5 * 500.0);

    let summary = &result.summary;
    assert_eq!(summary.invocation_rate, Some(0.25));
    assert_eq!(summary.decision_percentage(DecisionKind::Render), Some(25.0));
    assert_eq!(summary.total_tokens_avoided, Some(10 + 20 + 50));
    assert_eq!(result.metadata.status, RunStatus::Complete);
    assert_eq!(result.metadata.workload_id, "scenario");
}

#[test]
fn test_transformer_only_renders_everything() {
    let result = Harness::new(scenario_config(RunMode::TransformerOnly))
        .unwrap()
        .run(&synthetic(300))
        .unwrap();
    assert_eq!(result.outcomes.len(), 300);
    for outcome in &result.outcomes {
        assert_eq!(outcome.decision_kind, DecisionKind::Render);
        assert!(outcome.forced_render);
        assert_eq!(outcome.flops_avoided, 0.0);
    }
    assert_eq!(result.summary.invocation_rate, Some(1.0));
    assert_eq!(result.summary.forced_render_count, 300);
}

#[test]
fn test_transformer_only_overrides_consulted_gate() {
    let mut config = scenario_config(RunMode::TransformerOnly);
    config.run.consult_gate_in_baseline = true;
    let result = Harness::new(config).unwrap().run(&scenario()).unwrap();
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.decision_kind == DecisionKind::Render && o.forced_render));
    assert_eq!(
        result.outcomes[1].gate_decision,
        Some(Decision::Direct("4".to_string()))
    );
    assert!(result.metadata.gate.is_some());
}

#[test]
fn test_outcome_order_matches_input_order() {
    let mut config = scenario_config(RunMode::Gated);
    config.run.workers = 8;
    let workload = synthetic(500);
    let result = Harness::new(config).unwrap().run(&workload).unwrap();
    let ids: Vec<&str> = result.outcomes.iter().map(|o| o.request_id.as_str()).collect();
    let expected: Vec<&str> = workload.requests.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, expected);
}

#[test]
fn test_repeated_runs_are_deterministic() {
    let harness = Harness::new(scenario_config(RunMode::Gated)).unwrap();
    let workload = synthetic(200);
    let a = harness.run(&workload).unwrap();
    let b = harness.run(&workload).unwrap();
    for (x, y) in a.outcomes.iter().zip(&b.outcomes) {
        assert_eq!(x.decision_kind, y.decision_kind);
        assert_eq!(x.gate_decision, y.gate_decision);
        assert_eq!(x.latency_ms.to_bits(), y.latency_ms.to_bits());
        assert_eq!(x.energy_joules.to_bits(), y.energy_joules.to_bits());
        assert_eq!(x.flops.to_bits(), y.flops.to_bits());
        assert_eq!(x.output_text, y.output_text);
    }
    assert_eq!(a.summary.latency_ms, b.summary.latency_ms);
    assert_eq!(a.summary.total_flops_avoided, b.summary.total_flops_avoided);
}

#[test]
fn test_run_result_round_trip_is_bit_exact() {
    let result = Harness::new(scenario_config(RunMode::Gated))
        .unwrap()
        .run(&synthetic(250))
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    result.save(&path).unwrap();

    let reloaded = RunResult::load(&path).unwrap();
    assert_eq!(reloaded, result);
    assert!(reloaded.verify_summary());

    let recomputed = reloaded.recompute_summary();
    let original = result.summary.latency_ms.as_ref().unwrap();
    let again = recomputed.latency_ms.as_ref().unwrap();
    assert_eq!(original.mean.to_bits(), again.mean.to_bits());
    assert_eq!(original.p99.to_bits(), again.p99.to_bits());
    assert_eq!(
        result.summary.total_energy_joules.unwrap().to_bits(),
        recomputed.total_energy_joules.unwrap().to_bits()
    );
    assert_eq!(
        result.summary.throughput_rps.unwrap().to_bits(),
        recomputed.throughput_rps.unwrap().to_bits()
    );
}

#[test]
fn test_exact_match_against_baseline() {
    let workload = scenario();
    let baseline = Harness::new(scenario_config(RunMode::TransformerOnly))
        .unwrap()
        .run(&workload)
        .unwrap();
    let gated = Harness::new(scenario_config(RunMode::Gated))
        .unwrap()
        .with_reference(&baseline)
        .run(&workload)
        .unwrap();
    assert_eq!(gated.outcomes[3].exact_match, Some(true));
    assert!(gated.outcomes[..3].iter().all(|o| o.exact_match.is_none()));
    assert_eq!(gated.summary.exact_match_checked, 1);
}

fn timed_request(id: &str, timestamp: Option<f64>) -> Request {
    Request {
        id: id.to_string(),
        modality: Modality::Text,
        input: "Write something".to_string(),
        max_output_tokens: 16,
        timestamp,
        metadata: BTreeMap::new(),
    }
}

#[test]
fn test_respect_timestamps_replays_relative_to_start() {
    let mut config = scenario_config(RunMode::Gated);
    config.run.pacing = PacingMode::RespectTimestamps;
    let workload = Workload {
        id: "timed".to_string(),
        requests: vec![
            timed_request("t0", Some(500.0)),
            timed_request("t1", None),
            timed_request("t2", Some(500.1)),
            timed_request("t3", Some(500.2)),
        ],
        warnings: Vec::new(),
    };

    let start = Instant::now();
    let result = Harness::new(config).unwrap().run(&workload).unwrap();
    assert!(start.elapsed() >= Duration::from_millis(199));

    let offsets: Vec<f64> = result.outcomes.iter().map(|o| o.dispatch_offset_ms).collect();
    assert!(offsets[1] < 100.0, "untimed request waited: {}", offsets[1]);
    // Float offsets of 100 ms and 200 ms, give or take a rounding error.
    assert!(offsets[2] >= 99.9);
    assert!(offsets[3] >= 199.9);
    // Paced runs derive throughput from the dispatch span.
    let span_s = (offsets[3] - offsets[0]) / 1000.0;
    let rps = result.summary.throughput_rps.unwrap();
    assert!((rps - 4.0 / span_s).abs() < 1e-9);
}

#[test]
fn test_cancellation_yields_partial_run() {
    let mut config = scenario_config(RunMode::Gated);
    config.run.pacing = PacingMode::RespectTimestamps;
    config.run.workers = 1;
    let workload = Workload {
        id: "slow".to_string(),
        requests: vec![
            timed_request("s0", Some(0.0)),
            timed_request("s1", Some(0.0)),
            timed_request("s2", Some(30.0)),
            timed_request("s3", Some(60.0)),
        ],
        warnings: Vec::new(),
    };
    let harness = Harness::new(config).unwrap();
    let cancel = harness.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(150));
        cancel.cancel();
    });

    let start = Instant::now();
    let result = harness.run(&workload).unwrap();
    canceller.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(result.metadata.status, RunStatus::Partial);
    assert_eq!(result.metadata.total_requests, 4);
    assert_eq!(result.metadata.completed_requests, 2);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.summary.request_count, 2);
    assert!(result.verify_summary());
}

#[test]
fn test_empty_workload_has_null_statistics() {
    let workload = Workload {
        id: "empty".to_string(),
        requests: Vec::new(),
        warnings: Vec::new(),
    };
    let result = Harness::new(scenario_config(RunMode::Gated))
        .unwrap()
        .run(&workload)
        .unwrap();
    assert_eq!(result.metadata.status, RunStatus::Complete);
    assert!(result.summary.latency_ms.is_none());
    assert!(result.summary.invocation_rate.is_none());
    assert!(result.summary.throughput_rps.is_none());

    let json = serde_json::to_value(&result.summary).unwrap();
    assert!(json["latency_ms"].is_null());
    assert!(json["total_energy_joules"].is_null());
    assert!(json["total_tokens_avoided"].is_null());
}

#[test]
fn test_far_future_timestamp_does_not_abort_replay() {
    let mut config = scenario_config(RunMode::Gated);
    config.run.pacing = PacingMode::RespectTimestamps;
    let workload = Workload {
        id: "far".to_string(),
        requests: vec![timed_request("f0", Some(0.0)), timed_request("f1", Some(1.0e20))],
        warnings: Vec::new(),
    };
    let harness = Harness::new(config).unwrap();
    let cancel = harness.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });

    let result = harness.run(&workload).unwrap();
    canceller.join().unwrap();

    // Only the cancellation makes this run partial.
    assert!(harness.cancel_token().is_cancelled());
    assert_eq!(result.metadata.status, RunStatus::Partial);
    assert_eq!(result.metadata.completed_requests, 1);
    assert_eq!(result.outcomes[0].request_id, "f0");
}
