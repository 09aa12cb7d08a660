// chimera-backend/src/environment.rs
// ============================================================================
// Module: Chimera Execution Environment
// Description: Warrant-gated JSON-RPC tool execution over two data planes.
// Purpose: Select production or shadow per warrant and keep responses at parity.
// Dependencies: chimera-config, chimera-core, rand, serde_json
// ============================================================================

//! ## Overview
//! The execution environment receives forwarded `tools/call` requests, each
//! carrying a signed warrant under the reserved argument key. Plane
//! selection is purely cryptographic: the production verifier knows only the
//! production public key, the shadow verifier only the shadow key, and
//! exactly one of them accepts any well-formed warrant. Responses from both
//! planes share one schema; only values differ. Shadow responses pick up
//! uniform timing jitter, and shadow record misses synthesize a stable fake
//! instead of answering "not found".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use chimera_config::BackendConfig;
use chimera_config::ToolConfig;
use chimera_config::ToolHandler;
use chimera_core::authority::PlaneVerifier;
use chimera_core::authority::WARRANT_PARAM_KEY;
use chimera_core::route::Route;
use rand::Rng;
use serde_json::json;
use serde_json::Value;
use thiserror::Error;

use crate::planes::DataPlane;
use crate::planes::PlaneError;
use crate::synth;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool execution errors surfaced as JSON-RPC method errors.
///
/// Messages stay generic: the wire never reveals which plane served a call
/// or why a warrant was refused.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Warrant missing, malformed, expired, or signed with an unknown key.
    #[error("unauthorized")]
    Unauthorized,
    /// The tool is not registered.
    #[error("unknown tool")]
    UnknownTool,
    /// The call arguments are malformed.
    #[error("invalid params: {0}")]
    InvalidParams(String),
    /// The record or file does not exist on the selected plane.
    #[error("not found")]
    NotFound,
    /// Internal store failure.
    #[error("internal error")]
    Internal,
}

impl ExecutionError {
    /// Returns the JSON-RPC error code for this failure.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Unauthorized => -32001,
            Self::UnknownTool => -32601,
            Self::InvalidParams(_) => -32602,
            Self::NotFound => -32004,
            Self::Internal => -32050,
        }
    }
}

impl From<PlaneError> for ExecutionError {
    fn from(err: PlaneError) -> Self {
        match err {
            PlaneError::NotFound => Self::NotFound,
            PlaneError::PathEscape => Self::InvalidParams("invalid path".to_string()),
            PlaneError::Db(_) | PlaneError::Io(_) => Self::Internal,
        }
    }
}

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Dual-plane execution environment.
pub struct ExecutionEnvironment {
    production: DataPlane,
    shadow: DataPlane,
    tools: BTreeMap<String, ToolConfig>,
    jitter_ms: (u64, u64),
}

impl ExecutionEnvironment {
    /// Opens both planes from backend configuration, loading each plane's
    /// public key from the key directory.
    ///
    /// # Errors
    ///
    /// Returns a string error when keys or stores cannot be opened.
    pub fn open(
        config: &BackendConfig,
        production_kid: &str,
        shadow_kid: &str,
    ) -> Result<Self, String> {
        let production_verifier = PlaneVerifier::load(&config.key_dir, production_kid)
            .map_err(|err| err.to_string())?;
        let shadow_verifier =
            PlaneVerifier::load(&config.key_dir, shadow_kid).map_err(|err| err.to_string())?;
        let production = DataPlane::open(
            Route::Production,
            production_verifier,
            &config.production_db,
            &config.production_root,
            &config.confidential_table,
        )
        .map_err(|err| err.to_string())?;
        let shadow = DataPlane::open(
            Route::Shadow,
            shadow_verifier,
            &config.shadow_db,
            &config.shadow_root,
            &config.confidential_table,
        )
        .map_err(|err| err.to_string())?;
        Ok(Self::new(production, shadow, config.tools.clone(), (
            config.jitter_min_ms,
            config.jitter_max_ms,
        )))
    }

    /// Builds an environment from already-open planes.
    #[must_use]
    pub fn new(
        production: DataPlane,
        shadow: DataPlane,
        tools: Vec<ToolConfig>,
        jitter_ms: (u64, u64),
    ) -> Self {
        let tools = tools.into_iter().map(|tool| (tool.name.clone(), tool)).collect();
        Self {
            production,
            shadow,
            tools,
            jitter_ms,
        }
    }

    /// Handles one JSON-RPC request and returns the response object.
    #[must_use]
    pub fn handle(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        match method {
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"tools": self.list_tools()},
            }),
            "tools/call" => match self.handle_call(request.get("params")) {
                Ok(payload) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {"content": [{"type": "json", "json": payload}]},
                }),
                Err(err) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": err.code(), "message": err.to_string()},
                }),
            },
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {"status": "ok"},
            }),
        }
    }

    /// Builds the `tools/list` payload from the configured tool table.
    fn list_tools(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": {"type": "object"},
                })
            })
            .collect()
    }

    /// Verifies the warrant, selects the plane, and executes the handler.
    fn handle_call(&self, params: Option<&Value>) -> Result<Value, ExecutionError> {
        let params = params.ok_or_else(|| ExecutionError::InvalidParams("missing params".to_string()))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutionError::InvalidParams("missing tool name".to_string()))?;
        let mut args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let warrant = args
            .as_object_mut()
            .and_then(|map| map.remove(WARRANT_PARAM_KEY))
            .and_then(|value| value.as_str().map(str::to_string))
            .ok_or(ExecutionError::Unauthorized)?;

        let plane = self.select_plane(&warrant)?;
        let tool = self.tools.get(name).ok_or(ExecutionError::UnknownTool)?;
        let payload = match tool.handler {
            ToolHandler::SqliteRow => self.handle_sqlite_row(plane, tool, &args),
            ToolHandler::Filesystem => self.handle_filesystem(plane, tool, &args),
            ToolHandler::ListFilesystem => handle_list_filesystem(plane, tool, &args),
        }?;
        if plane.route() == Route::Shadow {
            self.apply_jitter();
        }
        Ok(payload)
    }

    /// Selects the plane whose single-key verifier accepts the warrant.
    fn select_plane(&self, warrant: &str) -> Result<&DataPlane, ExecutionError> {
        let now = epoch_secs();
        if self.production.verifier().verify(warrant, now).is_ok() {
            return Ok(&self.production);
        }
        if self.shadow.verifier().verify(warrant, now).is_ok() {
            return Ok(&self.shadow);
        }
        Err(ExecutionError::Unauthorized)
    }

    /// Record-by-id lookup; a shadow miss synthesizes and persists a record.
    fn handle_sqlite_row(
        &self,
        plane: &DataPlane,
        tool: &ToolConfig,
        args: &Value,
    ) -> Result<Value, ExecutionError> {
        let id = args.get(&tool.arg_key).ok_or_else(|| {
            ExecutionError::InvalidParams(format!("{} is required", tool.arg_key))
        })?;
        let table = tool.table.as_deref().ok_or(ExecutionError::Internal)?;
        let id_field = tool.id_field.as_deref().unwrap_or(&tool.arg_key);
        if plane.route() == Route::Shadow {
            // The shadow store may start empty; the table must exist before
            // the first lookup can miss into synthesis.
            plane.ensure_table(table, id_field, &tool.fields)?;
        }
        match plane.fetch_row(table, id_field, &tool.fields, id) {
            Ok(record) => Ok(Value::Object(record)),
            Err(PlaneError::NotFound) if plane.route() == Route::Shadow => {
                let record = synth::synth_row(table, id, id_field, &tool.fields);
                plane.insert_row(table, &record)?;
                Ok(Value::Object(record))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Confined file read; sensitive paths consult the confidential overlay
    /// first, and a shadow miss synthesizes a stable file.
    fn handle_filesystem(
        &self,
        plane: &DataPlane,
        tool: &ToolConfig,
        args: &Value,
    ) -> Result<Value, ExecutionError> {
        let path = args.get(&tool.arg_key).and_then(Value::as_str).ok_or_else(|| {
            ExecutionError::InvalidParams(format!("{} is required", tool.arg_key))
        })?;
        if path_is_sensitive(path, &tool.sensitive_patterns)
            && let Ok(content) = plane.fetch_confidential(path)
        {
            return Ok(file_payload(path, content));
        }
        match plane.read_file(path) {
            Ok(content) => Ok(file_payload(path, content)),
            Err(PlaneError::NotFound) if plane.route() == Route::Shadow => {
                let content = synth::synth_file(path);
                plane.write_file(path, &content)?;
                Ok(file_payload(path, content))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Sleeps for a uniform random interval inside the configured band.
    fn apply_jitter(&self) {
        let (min, max) = self.jitter_ms;
        if max == 0 {
            return;
        }
        let millis = rand::thread_rng().gen_range(min..=max);
        std::thread::sleep(Duration::from_millis(millis));
    }
}

/// Confined directory listing; a missing shadow directory lists empty
/// rather than revealing the miss.
fn handle_list_filesystem(
    plane: &DataPlane,
    tool: &ToolConfig,
    args: &Value,
) -> Result<Value, ExecutionError> {
    let path = args
        .get(&tool.arg_key)
        .and_then(Value::as_str)
        .unwrap_or(".");
    match plane.list_dir(path) {
        Ok(entries) => Ok(json!({"path": path, "entries": entries})),
        Err(PlaneError::NotFound) if plane.route() == Route::Shadow => {
            Ok(json!({"path": path, "entries": []}))
        }
        Err(err) => Err(err.into()),
    }
}

/// Common file response shape for both planes.
fn file_payload(path: &str, content: String) -> Value {
    json!({"path": path, "content": content})
}

/// Returns true when the path matches any configured sensitive pattern.
fn path_is_sensitive(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| path.contains(pattern.as_str()))
}

/// Current time as epoch seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
