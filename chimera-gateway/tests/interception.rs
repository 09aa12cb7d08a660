// chimera-gateway/tests/interception.rs
// ============================================================================
// Module: Interception Tests
// Description: End-to-end routing scenarios through the full pipeline.
// Purpose: Verify agent-visible behavior and the forensic record together.
// Dependencies: chimera-core, chimera-gateway
// ============================================================================

//! End-to-end interception scenarios: trusted workflows, taint laundering,
//! keyword triggers, windowed accumulation, and the infinite honeypot.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod common;

use chimera_core::ledger::verify_chain;
use chimera_core::ledger::DEFAULT_GENESIS_HASH;
use serde_json::json;

use common::pipeline;
use common::Pipeline;
use common::REAL_FORMULA;

fn researcher_context(session: &str) -> serde_json::Value {
    json!({
        "session_id": session,
        "user_id": "dr_chen",
        "user_role": "lead_researcher",
        "source": "lab_workstation",
    })
}

#[test]
fn trusted_researcher_reads_the_real_formula() {
    let pipeline = pipeline(1_000);
    let response = pipeline.call(
        "read_file",
        json!({"filename": "/data/private/_CONF_chimera_formula.json"}),
        researcher_context("s-chen"),
    );
    // The classifier scores this 0.95, above the event threshold, but the
    // trusted-workflow phase runs first.
    let payload = Pipeline::payload(&response);
    assert_eq!(payload["content"], json!(REAL_FORMULA));

    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["route"], json!("production"));
    assert_eq!(entry.action["rule_id"], json!("dr-chen-production"));
}

#[test]
fn resume_laundering_locks_the_session_onto_shadow() {
    let pipeline = pipeline(1_000);

    // First call ingests an untrusted artifact; the read itself still works.
    let response = pipeline.call(
        "read_file",
        json!({"filename": "/shared/candidate_resume_j_doe.txt"}),
        json!({"session_id": "s-hr", "user_id": "hr_01", "user_role": "hr_manager"}),
    );
    assert!(Pipeline::payload(&response)["content"]
        .as_str()
        .expect("content")
        .contains("Jordan Doe"));

    // The tainted session now asks for a sensitive record and silently gets
    // the shadow plane's fabrication instead of the real patient.
    let response = pipeline.call(
        "get_patient_record",
        json!({"patient_id": 100}),
        json!({"session_id": "s-hr", "user_id": "hr_01", "user_role": "hr_manager"}),
    );
    let payload = Pipeline::payload(&response);
    assert_eq!(payload["patient_id"], json!(100));
    assert_ne!(payload["name"], json!("Elena Voss"));

    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["rule_id"], json!("taint-lockdown"));
    assert_eq!(
        entry.trigger["taint_source"],
        json!("/shared/candidate_resume_j_doe.txt")
    );
}

#[test]
fn taint_survives_across_calls_but_not_sessions() {
    let pipeline = pipeline(1_000);
    let tainted = json!({"session_id": "s-a", "user_id": "u1", "user_role": "analyst"});
    pipeline.call(
        "read_file",
        json!({"filename": "/shared/upload_batch.csv"}),
        tainted.clone(),
    );
    // A later benign call in the tainted session still carries the flag.
    pipeline.call("get_patient_record", json!({"patient_id": 100}), tainted);
    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["rule_id"], json!("taint-lockdown"));

    // A different session is unaffected.
    let response = pipeline.call(
        "get_patient_record",
        json!({"patient_id": 100}),
        json!({"session_id": "s-b", "user_id": "u2", "user_role": "analyst"}),
    );
    assert_eq!(Pipeline::payload(&response)["name"], json!("Elena Voss"));
}

#[test]
fn suspicious_keyword_sends_unknown_caller_to_shadow() {
    let pipeline = pipeline(1_000);
    let response = pipeline.call(
        "read_file",
        json!({"filename": "/data/private/_CONF_chimera_formula.json"}),
        json!({"session_id": "s-atk", "user_id": "attacker", "user_role": "external"}),
    );
    // Same response shape as production, different values.
    let payload = Pipeline::payload(&response);
    assert_eq!(payload["path"], json!("/data/private/_CONF_chimera_formula.json"));
    let content = payload["content"].as_str().expect("content");
    assert_ne!(content, REAL_FORMULA);

    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["rule_id"], json!("suspicious-keyword-trigger"));
    assert_eq!(entry.action["route"], json!("shadow"));
}

#[test]
fn windowed_accumulation_crosses_then_recovers() {
    let pipeline = pipeline(10_000);
    let context = json!({"session_id": "s-acc", "user_id": "u3", "user_role": "analyst"});

    for hint in [0.4, 0.5, 0.5] {
        pipeline.call("list_files", json!({"path": ".", "risk_hint": hint}), context.clone());
        pipeline.advance_secs(60);
    }
    // Sum is 1.4, still under the 1.5 threshold.
    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["route"], json!("production"));

    // A fourth low-risk call pushes the window to 1.6.
    pipeline.call("list_files", json!({"path": ".", "risk_hint": 0.2}), context.clone());
    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["route"], json!("shadow"));
    assert_eq!(entry.action["rule_id"], json!("threshold:accumulated_risk"));
    let accumulated = entry.accumulated_risk.expect("accumulated");
    assert!((accumulated - 1.6).abs() < 1e-9);

    // Once the oldest event ages out of the hour window the same call rides
    // production again.
    pipeline.advance_secs(3_600 - 180 + 1);
    pipeline.call("list_files", json!({"path": ".", "risk_hint": 0.2}), context);
    let entry = pipeline.last_ledger_entry();
    assert_eq!(entry.action["route"], json!("production"));
    let accumulated = entry.accumulated_risk.expect("accumulated");
    assert!((accumulated - 1.4).abs() < 1e-9);
}

#[test]
fn shadow_honeypot_is_infinite_and_stable_across_sessions() {
    let pipeline = pipeline(1_000);
    // A standing directive pins this caller to shadow.
    let first = pipeline.call(
        "get_patient_record",
        json!({"patient_id": 9999}),
        json!({"session_id": "s-m1", "user_id": "mallory", "user_role": "external"}),
    );
    let second = pipeline.call(
        "get_patient_record",
        json!({"patient_id": 9999}),
        json!({"session_id": "s-m2", "user_id": "mallory", "user_role": "external"}),
    );
    let first = Pipeline::payload(&first);
    let second = Pipeline::payload(&second);
    assert_eq!(first, second);
    assert_eq!(first["patient_id"], json!(9999));
    assert!(first["name"].is_string());
    assert!(first["ssn"].is_string());
}

#[test]
fn responses_never_disclose_route_or_warrant() {
    let pipeline = pipeline(1_000);
    let response = pipeline.call(
        "read_file",
        json!({"filename": "/data/private/_CONF_chimera_formula.json"}),
        json!({"session_id": "s-atk", "user_id": "attacker", "user_role": "external"}),
    );
    let text = response.to_string();
    assert!(!text.contains("__chimera_warrant__"));
    assert!(!text.contains("shadow"));
    assert!(!text.contains("rule_id"));
}

#[test]
fn non_tool_methods_pass_through_untouched() {
    let pipeline = pipeline(1_000);
    let request = json!({"jsonrpc": "2.0", "id": 9, "method": "tools/list"});
    let response = pipeline.interceptor.process_request(&request);
    assert_eq!(response["id"], json!(9));
    assert_eq!(response["result"]["tools"].as_array().expect("tools").len(), 3);
}

#[test]
fn ledger_chain_verifies_after_a_session() {
    let pipeline = pipeline(1_000);
    for idx in 0..4 {
        pipeline.call(
            "get_patient_record",
            json!({"patient_id": idx}),
            json!({"session_id": "s-ver", "user_id": "mallory", "user_role": "external"}),
        );
    }
    let report = verify_chain(&pipeline.ledger_path, DEFAULT_GENESIS_HASH).expect("chain intact");
    assert_eq!(report.entries, 4);
}

#[test]
fn identical_snapshots_route_identically() {
    let pipeline = pipeline(1_000);
    let context = json!({"session_id": "s-det", "user_id": "attacker", "user_role": "external"});
    let args = json!({"filename": "/data/private/_CONF_chimera_formula.json"});
    pipeline.call("read_file", args.clone(), context.clone());
    let first = pipeline.last_ledger_entry();
    pipeline.call("read_file", args, context);
    let second = pipeline.last_ledger_entry();
    assert_eq!(first.action["route"], second.action["route"]);
    assert_eq!(first.action["rule_id"], second.action["rule_id"]);
}
