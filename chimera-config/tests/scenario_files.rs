// chimera-config/tests/scenario_files.rs
// ============================================================================
// Module: Scenario File Tests
// Description: Tests for loading shipped scenario manifests from disk.
// Purpose: Keep the checked-in scenarios loadable and valid.
// Dependencies: chimera-config
// ============================================================================

//! Loads the shipped scenario manifests through the real file path.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::path::PathBuf;

use chimera_config::ScenarioConfig;
use chimera_config::Transport;

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../config/scenarios")
        .join(format!("{name}.toml"))
}

#[test]
fn aetheria_scenario_loads_and_validates() {
    let config = ScenarioConfig::load(Some(&scenario_path("aetheria"))).expect("loads");
    assert_eq!(config.scenario.as_deref(), Some("aetheria"));
    assert_eq!(config.gateway.transport, Transport::Http);
    let policy = config.policy.as_ref().expect("policy present");
    assert_eq!(policy.trusted_workflows.len(), 1);
    assert_eq!(policy.security_policies.len(), 2);
    assert!(policy.accumulated_risk.is_some());
    assert_eq!(config.backend.tools.len(), 3);
}

#[test]
fn oversized_config_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("big.toml");
    let filler = format!("scenario = \"big\"\n# {}\n", "x".repeat(2 * 1024 * 1024));
    std::fs::write(&path, filler).expect("write");
    assert!(ScenarioConfig::load(Some(&path)).is_err());
}

#[test]
fn missing_config_is_an_io_error() {
    let result = ScenarioConfig::load(Some(std::path::Path::new("/nonexistent/chimera.toml")));
    assert!(result.is_err());
}
