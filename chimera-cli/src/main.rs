// chimera-cli/src/main.rs
// ============================================================================
// Module: Chimera CLI Entry Point
// Description: Command dispatcher for gateway, backend, and ledger workflows.
// Purpose: Provide a single local binary for running and auditing Chimera.
// Dependencies: chimera-backend, chimera-config, chimera-gateway, clap, tokio
// ============================================================================

//! ## Overview
//! The Chimera CLI starts the gateway or the execution backend from a
//! scenario manifest, validates manifests offline, and walks the forensic
//! ledger chain. Security posture: all inputs are untrusted; configuration
//! failures refuse to start rather than degrade.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chimera_backend::ExecutionEnvironment;
use chimera_config::ScenarioConfig;
use chimera_config::Transport;
use chimera_core::ledger::verify_chain;
use chimera_core::ledger::DEFAULT_GENESIS_HASH;
use chimera_gateway::Gateway;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "chimera", version, about = "Dual-reality MCP gateway")]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway in front of a tool backend.
    Gateway(ConfigArgs),
    /// Start the dual execution environment.
    Backend(ConfigArgs),
    /// Forensic ledger utilities.
    Ledger {
        /// Selected ledger subcommand.
        #[command(subcommand)]
        command: LedgerCommand,
    },
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Common config-path argument.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// Scenario manifest path (defaults to env resolution).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Ledger subcommands.
#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Walk the hash chain and report the first break.
    Verify {
        /// Ledger file path.
        #[arg(long, value_name = "PATH")]
        path: PathBuf,
        /// Genesis constant (64 hex chars).
        #[arg(long, value_name = "HEX")]
        genesis: Option<String>,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a scenario manifest.
    Validate(ConfigArgs),
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI errors.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration loading or validation failed.
    #[error("{0}")]
    Config(#[from] chimera_config::ConfigError),
    /// Gateway startup or serving failed.
    #[error("{0}")]
    Gateway(#[from] chimera_gateway::GatewayError),
    /// Backend startup or serving failed.
    #[error("backend error: {0}")]
    Backend(String),
    /// Ledger verification failed.
    #[error("{0}")]
    Ledger(#[from] chimera_core::ledger::LedgerError),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("chimera: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches the parsed command.
async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Gateway(args) => run_gateway(args).await,
        Commands::Backend(args) => run_backend(args).await,
        Commands::Ledger {
            command: LedgerCommand::Verify {
                path,
                genesis,
            },
        } => run_ledger_verify(&path, genesis.as_deref()),
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => run_config_validate(args),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Starts the gateway with the configured transport.
async fn run_gateway(args: ConfigArgs) -> Result<(), CliError> {
    let config = ScenarioConfig::load(args.config.as_deref())?;
    let gateway = Gateway::from_config(config)?;
    gateway.serve().await?;
    Ok(())
}

/// Starts the execution environment with the configured transport.
async fn run_backend(args: ConfigArgs) -> Result<(), CliError> {
    let config = ScenarioConfig::load(args.config.as_deref())?;
    let environment = ExecutionEnvironment::open(
        &config.backend,
        &config.warrant.production_kid,
        &config.warrant.shadow_kid,
    )
    .map_err(CliError::Backend)?;
    match config.backend.transport {
        Transport::Stdio => tokio::task::block_in_place(|| {
            chimera_backend::serve_stdio(&environment)
                .map_err(|err| CliError::Backend(err.to_string()))
        }),
        Transport::Http => {
            chimera_backend::serve_http(Arc::new(environment), &config.backend.bind)
                .await
                .map_err(|err| CliError::Backend(err.to_string()))
        }
    }
}

/// Walks the ledger chain and prints a summary.
fn run_ledger_verify(path: &std::path::Path, genesis: Option<&str>) -> Result<(), CliError> {
    let genesis = genesis.unwrap_or(DEFAULT_GENESIS_HASH);
    let report = verify_chain(path, genesis)?;
    println!("ledger ok: {} entries, tail {}", report.entries, report.tail_hash);
    Ok(())
}

/// Loads and validates a manifest, printing a short summary.
fn run_config_validate(args: ConfigArgs) -> Result<(), CliError> {
    let config = ScenarioConfig::load(args.config.as_deref())?;
    let rules = config.policy.as_ref().map_or(0, |policy| {
        policy.trusted_workflows.len() + policy.security_policies.len()
    });
    println!(
        "config ok: scenario={} tools={} policy_rules={}",
        config.scenario.as_deref().unwrap_or("(unnamed)"),
        config.backend.tools.len(),
        rules,
    );
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only assertions."
    )]

    use clap::Parser;

    use super::Cli;
    use super::Commands;
    use super::LedgerCommand;

    #[test]
    fn ledger_verify_parses() {
        let cli = Cli::parse_from(["chimera", "ledger", "verify", "--path", "ledger.jsonl"]);
        match cli.command {
            Commands::Ledger {
                command: LedgerCommand::Verify {
                    path,
                    genesis,
                },
            } => {
                assert_eq!(path.to_string_lossy(), "ledger.jsonl");
                assert!(genesis.is_none());
            }
            _ => panic!("expected ledger verify"),
        }
    }

    #[test]
    fn gateway_accepts_config_path() {
        let cli = Cli::parse_from(["chimera", "gateway", "--config", "chimera.toml"]);
        match cli.command {
            Commands::Gateway(args) => {
                assert_eq!(args.config.expect("path").to_string_lossy(), "chimera.toml");
            }
            _ => panic!("expected gateway"),
        }
    }
}
