// chimera-config/src/lib.rs
// ============================================================================
// Module: Chimera Config
// Description: Scenario configuration loading and validation.
// Purpose: Single fail-closed entry point for all runtime configuration.
// Dependencies: chimera-core, serde, toml
// ============================================================================

//! ## Overview
//! This crate owns the scenario manifest: one TOML document configuring the
//! gateway, the execution environment, and every core component. Validation
//! is fail-closed; a gateway never starts on an inconsistent manifest.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::AnalysisConfig;
pub use config::AuditConfig;
pub use config::BackendConfig;
pub use config::ClassifierConfig;
pub use config::ClassifierMode;
pub use config::ConfigError;
pub use config::GatewayConfig;
pub use config::LedgerConfig;
pub use config::ScenarioConfig;
pub use config::ToolConfig;
pub use config::ToolHandler;
pub use config::Transport;
pub use config::WarrantConfig;
pub use config::CONFIG_ENV_VAR;
pub use config::SCENARIO_ENV_VAR;
