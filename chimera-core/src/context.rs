// chimera-core/src/context.rs
// ============================================================================
// Module: Chimera Call Context
// Description: Per-call context assembly and dotted-path field resolution.
// Purpose: Provide the enriched context snapshot consumed by policy phases.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every inspected `tools/call` carries a context snapshot built from three
//! sources merged in order (later wins): process-level defaults, the agent's
//! envelope fields, and fields derived by the interceptor (taint, suspicion,
//! accumulated risk, tool category). Policy match leaves address the snapshot
//! through dotted paths rooted at `args` or `context`; scenario-specific keys
//! land in the `extra` map and resolve through the same paths.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

// ============================================================================
// SECTION: Context Defaults
// ============================================================================

/// Process-level context defaults applied before the agent envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextDefaults {
    /// Default user identifier when the envelope omits one.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Default user role when the envelope omits one.
    #[serde(default)]
    pub user_role: Option<String>,
    /// Default call source when the envelope omits one.
    #[serde(default)]
    pub source: Option<String>,
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// Context fields supplied by the agent alongside a tool call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextEnvelope {
    /// Caller identity asserted by the agent.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Caller role asserted by the agent.
    #[serde(default)]
    pub user_role: Option<String>,
    /// Origin of the call (workstation, pipeline, ...).
    #[serde(default)]
    pub source: Option<String>,
    /// Ticket or change reference attached to the call.
    #[serde(default)]
    pub ticket: Option<String>,
    /// Session identifier chosen by the agent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Scenario-specific envelope keys.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextEnvelope {
    /// Parses an envelope from the optional `params.context` value.
    #[must_use]
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }
}

// ============================================================================
// SECTION: Call Context
// ============================================================================

/// Enriched context snapshot for one tool call.
#[derive(Debug, Clone, Serialize)]
pub struct CallContext {
    /// Session identifier (minted when the agent supplies none).
    pub session_id: String,
    /// Caller identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    /// Origin of the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Ticket or change reference.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    /// Whether the session has ingested untrusted content.
    pub is_tainted: bool,
    /// Artifact that tainted the session, when tainted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taint_source: Option<String>,
    /// Whether any argument matched a configured suspicious keyword.
    pub is_suspicious_query: bool,
    /// Windowed risk sum for the session at evaluation time.
    pub accumulated_risk: f64,
    /// Static category of the called tool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_category: Option<String>,
    /// Scenario-specific keys reachable through `context.<key>` paths.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CallContext {
    /// Builds a context from defaults and an agent envelope.
    ///
    /// Derived fields start at their neutral values; the interceptor fills
    /// them in before policy evaluation.
    #[must_use]
    pub fn assemble(defaults: &ContextDefaults, envelope: ContextEnvelope, session_id: String) -> Self {
        Self {
            session_id,
            user_id: envelope.user_id.or_else(|| defaults.user_id.clone()),
            user_role: envelope.user_role.or_else(|| defaults.user_role.clone()),
            source: envelope.source.or_else(|| defaults.source.clone()),
            ticket: envelope.ticket,
            is_tainted: false,
            taint_source: None,
            is_suspicious_query: false,
            accumulated_risk: 0.0,
            tool_category: None,
            extra: envelope.extra,
        }
    }

    /// Returns the snapshot as a JSON value for dotted-path resolution.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ============================================================================
// SECTION: Field Resolution
// ============================================================================

/// Read-only view over `{args, context}` for match-leaf resolution.
#[derive(Debug)]
pub struct FieldView {
    root: Value,
}

impl FieldView {
    /// Builds a view over the call arguments and context snapshot.
    #[must_use]
    pub fn new(args: &Value, context: &CallContext) -> Self {
        let mut root = Map::new();
        root.insert("args".to_string(), args.clone());
        root.insert("context".to_string(), context.to_value());
        Self {
            root: Value::Object(root),
        }
    }

    /// Resolves a dotted path, returning `None` for any missing segment.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        deep_get(&self.root, path)
    }
}

/// Fetches a nested JSON value using dot notation.
#[must_use]
pub fn deep_get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
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

    use serde_json::json;

    use super::CallContext;
    use super::ContextDefaults;
    use super::ContextEnvelope;
    use super::FieldView;

    fn sample_context() -> CallContext {
        let defaults = ContextDefaults {
            user_id: Some("99".to_string()),
            user_role: Some("patient".to_string()),
            source: Some("internal".to_string()),
        };
        let envelope = ContextEnvelope::from_value(Some(&json!({
            "user_id": "dr_chen",
            "user_role": "lead_researcher",
            "source": "lab_workstation",
            "clearance": "l4",
        })));
        CallContext::assemble(&defaults, envelope, "s-1".to_string())
    }

    #[test]
    fn envelope_overrides_defaults() {
        let context = sample_context();
        assert_eq!(context.user_id.as_deref(), Some("dr_chen"));
        assert_eq!(context.source.as_deref(), Some("lab_workstation"));
    }

    #[test]
    fn missing_envelope_falls_back_to_defaults() {
        let defaults = ContextDefaults {
            user_id: Some("99".to_string()),
            user_role: Some("patient".to_string()),
            source: None,
        };
        let context =
            CallContext::assemble(&defaults, ContextEnvelope::default(), "s-2".to_string());
        assert_eq!(context.user_role.as_deref(), Some("patient"));
        assert!(context.source.is_none());
    }

    #[test]
    fn dotted_paths_reach_args_and_extra() {
        let context = sample_context();
        let args = json!({"filename": "/data/private/report.json"});
        let view = FieldView::new(&args, &context);
        assert_eq!(
            view.resolve("args.filename").and_then(|value| value.as_str()),
            Some("/data/private/report.json")
        );
        assert_eq!(
            view.resolve("context.clearance").and_then(|value| value.as_str()),
            Some("l4")
        );
        assert!(view.resolve("context.absent").is_none());
        assert!(view.resolve("args.filename.deeper").is_none());
    }
}
