// chimera-config/src/config.rs
// ============================================================================
// Module: Chimera Configuration
// Description: Scenario configuration loading and validation.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: chimera-core, serde, toml
// ============================================================================

//! ## Overview
//! A scenario manifest is one TOML document covering the gateway, the
//! execution environment, and every core component: session window, warrant
//! keys, classifier, taint patterns, sanitizer, ledger, and the routing
//! policy. Loading is fail-closed: unknown fields, duplicate rule ids,
//! unknown operators, uncompilable patterns, and inconsistent limits all
//! refuse to start the gateway. Environment variables select the scenario
//! and override deployment-specific knobs after parse.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use chimera_core::context::ContextDefaults;
use chimera_core::ledger::DEFAULT_GENESIS_HASH;
use chimera_core::policy::PolicyManifest;
use chimera_core::risk::BaselineAssessment;
use chimera_core::risk::PatternRule;
use chimera_core::sanitizer::ResponseSanitizer;
use chimera_core::sanitizer::SanitizerConfig;
use chimera_core::session::SessionConfig;
use chimera_core::taint::TaintConfig;
use chimera_core::taint::TaintPolicy;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "chimera.toml";
/// Directory searched when a scenario is selected by name.
const SCENARIO_DIR: &str = "config/scenarios";
/// Environment variable overriding the config path.
pub const CONFIG_ENV_VAR: &str = "CHIMERA_CONFIG";
/// Environment variable selecting a scenario by name.
pub const SCENARIO_ENV_VAR: &str = "CHIMERA_SCENARIO";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Gateway Section
// ============================================================================

/// Transport binding for the gateway and backend servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// Line-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// JSON over HTTP POST.
    Http,
}

/// Gateway request-audit sink configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Whether request auditing is enabled.
    pub enabled: bool,
    /// Audit log path; stderr when omitted.
    pub path: Option<PathBuf>,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Transport binding.
    pub transport: Transport,
    /// Bind address for HTTP mode.
    pub bind: String,
    /// Maximum accepted request body size.
    pub max_body_bytes: usize,
    /// Maximum concurrently served requests (HTTP mode).
    pub max_inflight: usize,
    /// Backend endpoint for forwarded requests (HTTP backend).
    pub backend_url: Option<String>,
    /// Backend forward timeout in seconds.
    pub forward_timeout_secs: u64,
    /// Request-audit sink.
    pub audit: AuditConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            bind: "127.0.0.1:8888".to_string(),
            max_body_bytes: 1024 * 1024,
            max_inflight: 64,
            backend_url: None,
            forward_timeout_secs: 30,
            audit: AuditConfig::default(),
        }
    }
}

// ============================================================================
// SECTION: Warrant Section
// ============================================================================

/// Credential authority configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarrantConfig {
    /// Directory holding `<kid>.key` / `<kid>.pub` files.
    pub key_dir: PathBuf,
    /// Opaque keyring slot for the production route.
    pub production_kid: String,
    /// Opaque keyring slot for the shadow route.
    pub shadow_kid: String,
    /// Warrant lifetime in seconds.
    pub ttl_secs: u64,
}

impl Default for WarrantConfig {
    fn default() -> Self {
        Self {
            key_dir: PathBuf::from("keys"),
            production_kid: "wk-1".to_string(),
            shadow_kid: "wk-2".to_string(),
            ttl_secs: chimera_core::authority::DEFAULT_WARRANT_TTL_SECS,
        }
    }
}

// ============================================================================
// SECTION: Classifier Section
// ============================================================================

/// Risk classifier selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierMode {
    /// Offline pattern rules.
    #[default]
    Pattern,
    /// External probabilistic judge over HTTP.
    Judge,
}

/// Risk classifier configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierConfig {
    /// Which classifier implementation to run.
    pub mode: ClassifierMode,
    /// Classification budget in milliseconds; over budget is unavailable.
    pub budget_ms: u64,
    /// Judge endpoint URL (judge mode).
    pub endpoint: Option<String>,
    /// Judge model identifier (judge mode).
    pub model: Option<String>,
    /// System prompt framing the judge request (judge mode).
    pub prompt: Option<String>,
    /// Ordered pattern rules (pattern mode).
    pub rules: Vec<PatternRule>,
    /// Baseline assessment when no rule matches (pattern mode).
    pub baseline: BaselineAssessment,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            mode: ClassifierMode::Pattern,
            budget_ms: 2_000,
            endpoint: None,
            model: None,
            prompt: None,
            rules: Vec::new(),
            baseline: BaselineAssessment::default(),
        }
    }
}

// ============================================================================
// SECTION: Analysis Section
// ============================================================================

/// Context-derivation knobs consumed by the interceptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Keywords marking a query suspicious when found in any argument.
    pub suspicious_keywords: Vec<String>,
    /// Static tool → category map.
    pub tool_categories: BTreeMap<String, String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            suspicious_keywords: [
                "password",
                "secret",
                "credit card",
                "ssn",
                "private_key",
                "formula",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            tool_categories: BTreeMap::new(),
        }
    }
}

// ============================================================================
// SECTION: Ledger Section
// ============================================================================

/// Forensic ledger configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Ledger file path (line-delimited JSON).
    pub path: PathBuf,
    /// Genesis `prev_hash` constant, 64 hex characters.
    pub genesis_hash: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/forensic_ledger.jsonl"),
            genesis_hash: DEFAULT_GENESIS_HASH.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Backend Section
// ============================================================================

/// Tool handler kinds supported by the execution environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolHandler {
    /// Record-by-id lookup over a configured table.
    SqliteRow,
    /// Path-confined file read with a confidential overlay.
    Filesystem,
    /// Path-confined directory listing.
    ListFilesystem,
}

/// One tool exposed by the execution environment.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolConfig {
    /// Tool name on the wire.
    pub name: String,
    /// Human-readable description for `tools/list`.
    #[serde(default)]
    pub description: String,
    /// Handler kind.
    pub handler: ToolHandler,
    /// Argument key carrying the record id or path.
    pub arg_key: String,
    /// Table name (`sqlite_row`).
    #[serde(default)]
    pub table: Option<String>,
    /// Id column (`sqlite_row`); defaults to `arg_key`.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Columns returned (`sqlite_row`).
    #[serde(default)]
    pub fields: Vec<String>,
    /// Path patterns served from the confidential overlay (`filesystem`).
    #[serde(default)]
    pub sensitive_patterns: Vec<String>,
}

/// Execution environment configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Transport binding.
    pub transport: Transport,
    /// Bind address for HTTP mode.
    pub bind: String,
    /// Directory holding per-plane public keys.
    pub key_dir: PathBuf,
    /// Production SQLite database path.
    pub production_db: PathBuf,
    /// Shadow SQLite database path.
    pub shadow_db: PathBuf,
    /// Production filesystem root.
    pub production_root: PathBuf,
    /// Shadow filesystem root.
    pub shadow_root: PathBuf,
    /// Table serving the confidential file overlay.
    pub confidential_table: String,
    /// Minimum shadow response jitter in milliseconds.
    pub jitter_min_ms: u64,
    /// Maximum shadow response jitter in milliseconds.
    pub jitter_max_ms: u64,
    /// Tools exposed over `tools/list` and `tools/call`.
    pub tools: Vec<ToolConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Stdio,
            bind: "127.0.0.1:8000".to_string(),
            key_dir: PathBuf::from("keys"),
            production_db: PathBuf::from("data/prod.db"),
            shadow_db: PathBuf::from("data/shadow.db"),
            production_root: PathBuf::from("data/real"),
            shadow_root: PathBuf::from("data/shadow"),
            confidential_table: "confidential_files".to_string(),
            jitter_min_ms: 20,
            jitter_max_ms: 50,
            tools: Vec::new(),
        }
    }
}

// ============================================================================
// SECTION: Scenario Root
// ============================================================================

/// Complete scenario configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Scenario name for logs and the ledger.
    pub scenario: Option<String>,
    /// Gateway server settings.
    pub gateway: GatewayConfig,
    /// Process-level context defaults.
    pub defaults: ContextDefaults,
    /// Session store settings.
    pub session: SessionConfig,
    /// Credential authority settings.
    pub warrant: WarrantConfig,
    /// Risk classifier settings.
    pub classifier: ClassifierConfig,
    /// Context-derivation settings.
    pub analysis: AnalysisConfig,
    /// Taint pattern settings.
    pub taint: TaintConfig,
    /// Response sanitizer settings.
    pub sanitizer: SanitizerConfig,
    /// Forensic ledger settings.
    pub ledger: LedgerConfig,
    /// Routing policy manifest.
    pub policy: Option<PolicyManifest>,
    /// Execution environment settings.
    pub backend: BackendConfig,
}

impl ScenarioConfig {
    /// Loads a scenario from an explicit path or the environment.
    ///
    /// Resolution order: `path` argument, `CHIMERA_CONFIG`,
    /// `CHIMERA_SCENARIO` (as `config/scenarios/<name>.toml`), then
    /// `chimera.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O, parse, or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_config_path(path)?;
        let metadata = fs::metadata(&path).map_err(|err| ConfigError::Io {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::FileTooLarge {
                path,
                size: metadata.len(),
            });
        }
        let text = fs::read_to_string(&path).map_err(|err| ConfigError::Io {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|err| ConfigError::Parse {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies deployment overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = env::var("CHIMERA_HTTP_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            let host =
                self.gateway.bind.rsplit_once(':').map_or("127.0.0.1", |(host, _)| host).to_string();
            self.gateway.bind = format!("{host}:{port}");
        }
        if let Ok(path) = env::var("CHIMERA_LEDGER_PATH") {
            self.ledger.path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("CHIMERA_KEY_DIR") {
            self.warrant.key_dir = PathBuf::from(&dir);
            self.backend.key_dir = PathBuf::from(dir);
        }
        if let Ok(url) = env::var("CHIMERA_JUDGE_URL") {
            self.classifier.endpoint = Some(url);
        }
        if let Ok(model) = env::var("CHIMERA_JUDGE_MODEL") {
            self.classifier.model = Some(model);
        }
        if let Ok(user_id) = env::var("CHIMERA_USER_ID") {
            self.defaults.user_id = Some(user_id);
        }
        if let Ok(user_role) = env::var("CHIMERA_USER_ROLE") {
            self.defaults.user_role = Some(user_role);
        }
        if let Ok(source) = env::var("CHIMERA_SOURCE") {
            self.defaults.source = Some(source);
        }
    }

    /// Validates cross-field consistency. Fail-closed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(policy) = &self.policy {
            policy.validate().map_err(ConfigError::Policy)?;
        }
        TaintPolicy::from_config(&self.taint)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        ResponseSanitizer::from_config(&self.sanitizer)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.warrant.production_kid == self.warrant.shadow_kid {
            return Err(ConfigError::Invalid(
                "warrant production_kid and shadow_kid must differ".to_string(),
            ));
        }
        if self.warrant.ttl_secs == 0 {
            return Err(ConfigError::Invalid("warrant ttl_secs must be nonzero".to_string()));
        }
        if self.session.window_secs == 0 {
            return Err(ConfigError::Invalid("session window_secs must be nonzero".to_string()));
        }
        if self.classifier.budget_ms == 0 {
            return Err(ConfigError::Invalid("classifier budget_ms must be nonzero".to_string()));
        }
        if self.classifier.mode == ClassifierMode::Judge && self.classifier.endpoint.is_none() {
            return Err(ConfigError::Invalid(
                "judge classifier requires an endpoint".to_string(),
            ));
        }
        if self.gateway.max_body_bytes == 0 || self.gateway.max_inflight == 0 {
            return Err(ConfigError::Invalid(
                "gateway limits must be nonzero".to_string(),
            ));
        }
        if self.gateway.forward_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "gateway forward_timeout_secs must be nonzero".to_string(),
            ));
        }
        if self.backend.jitter_min_ms > self.backend.jitter_max_ms {
            return Err(ConfigError::Invalid(
                "backend jitter_min_ms exceeds jitter_max_ms".to_string(),
            ));
        }
        let genesis = &self.ledger.genesis_hash;
        if genesis.len() != 64 || !genesis.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ConfigError::Invalid(
                "ledger genesis_hash must be 64 hex characters".to_string(),
            ));
        }
        let mut seen_tools = std::collections::BTreeSet::new();
        for tool in &self.backend.tools {
            if tool.name.is_empty() || tool.arg_key.is_empty() {
                return Err(ConfigError::Invalid(
                    "backend tool name and arg_key must be set".to_string(),
                ));
            }
            if !seen_tools.insert(tool.name.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "backend tool {} declared twice",
                    tool.name
                )));
            }
            if tool.handler == ToolHandler::SqliteRow {
                if tool.table.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "backend tool {} requires a table",
                        tool.name
                    )));
                }
                if tool.fields.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "backend tool {} requires a fields list",
                        tool.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolves the config path from the argument or the environment.
fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(path));
    }
    if let Ok(name) = env::var(SCENARIO_ENV_VAR) {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(ConfigError::InvalidScenarioName(name));
        }
        return Ok(PathBuf::from(SCENARIO_DIR).join(format!("{name}.toml")));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config read failed at {path}: {detail}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// Config file exceeds the size limit.
    #[error("config file too large at {path}: {size} bytes")]
    FileTooLarge {
        /// Offending path.
        path: PathBuf,
        /// Observed size.
        size: u64,
    },
    /// Config file is not valid TOML for the schema.
    #[error("config parse failed at {path}: {detail}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// Policy manifest validation failed.
    #[error("policy manifest invalid: {0}")]
    Policy(#[from] chimera_core::policy::PolicyError),
    /// A scenario name contains path separators.
    #[error("invalid scenario name: {0:?}")]
    InvalidScenarioName(String),
    /// Cross-field validation failed.
    #[error("config invalid: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
