// chimera-gateway/src/interceptor.rs
// ============================================================================
// Module: Chimera Interceptor
// Description: Per-call orchestration of the routing-and-enforcement pipeline.
// Purpose: Taint, classify, accumulate, evaluate, warrant, log, forward.
// Dependencies: chimera-config, chimera-core, serde_json
// ============================================================================

//! ## Overview
//! The interceptor is straight-line code over injected dependencies: for each
//! inspected `tools/call` it updates taint, classifies risk, accumulates the
//! windowed sum, derives context flags, evaluates policy, issues a warrant,
//! logs the decision, forwards the modified request, and sanitizes the reply.
//! Every failure mode is explicit and local; the agent only ever sees a
//! successful tool response or a generic JSON-RPC error, never the routing
//! outcome.
//!
//! Within one session, calls complete this pipeline in arrival order; the
//! session store serializes the stateful steps per session key.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use chimera_config::AnalysisConfig;
use chimera_core::authority::CredentialAuthority;
use chimera_core::authority::WARRANT_PARAM_KEY;
use chimera_core::context::CallContext;
use chimera_core::context::ContextDefaults;
use chimera_core::context::ContextEnvelope;
use chimera_core::hashing::hex_encode;
use chimera_core::ledger::ForensicLedger;
use chimera_core::ledger::LedgerEvent;
use chimera_core::ledger::EVENT_AUTHORITY_ERROR;
use chimera_core::ledger::EVENT_BACKEND_FAILURE;
use chimera_core::ledger::EVENT_POLICY_FALLBACK;
use chimera_core::ledger::EVENT_TOOL_INTERCEPTION;
use chimera_core::policy::Decision;
use chimera_core::policy::PolicyEvaluator;
use chimera_core::risk::RiskClassifier;
use chimera_core::sanitizer::ResponseSanitizer;
use chimera_core::session::SessionStore;
use chimera_core::taint::SourceTrust;
use chimera_core::taint::TaintPolicy;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use serde_json::Value;

use crate::backend_client::BackendTransport;
use crate::backend_client::ForwardError;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source for the pipeline's stateful steps.
///
/// The evaluator itself never reads a clock; injecting the source here keeps
/// window-aging behavior drivable from tests.
pub trait Clock: Send + Sync {
    /// Current time as epoch seconds.
    fn epoch_secs(&self) -> u64;

    /// Current time as epoch milliseconds.
    fn epoch_millis(&self) -> u64 {
        self.epoch_secs().saturating_mul(1_000)
    }
}

/// Wall-clock time source.
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or_default()
    }

    fn epoch_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default()
    }
}

// ============================================================================
// SECTION: Construction
// ============================================================================

/// Injected dependencies for the interceptor.
pub struct InterceptorParts {
    /// Process-level context defaults.
    pub defaults: ContextDefaults,
    /// Session store.
    pub sessions: SessionStore,
    /// Risk classifier.
    pub classifier: Box<dyn RiskClassifier>,
    /// Policy evaluator over the validated manifest.
    pub evaluator: PolicyEvaluator,
    /// Credential authority.
    pub authority: CredentialAuthority,
    /// Forensic ledger.
    pub ledger: ForensicLedger,
    /// Response sanitizer.
    pub sanitizer: ResponseSanitizer,
    /// Taint policy.
    pub taint: TaintPolicy,
    /// Suspicious keywords and tool categories.
    pub analysis: AnalysisConfig,
    /// Backend transport.
    pub backend: Box<dyn BackendTransport>,
    /// Time source.
    pub clock: Box<dyn Clock>,
}

/// Per-call orchestrator.
pub struct Interceptor {
    defaults: ContextDefaults,
    sessions: SessionStore,
    classifier: Box<dyn RiskClassifier>,
    evaluator: PolicyEvaluator,
    authority: CredentialAuthority,
    ledger: ForensicLedger,
    sanitizer: ResponseSanitizer,
    taint: TaintPolicy,
    suspicious_keywords: Vec<String>,
    analysis: AnalysisConfig,
    backend: Box<dyn BackendTransport>,
    clock: Box<dyn Clock>,
}

impl Interceptor {
    /// Assembles the pipeline from its parts.
    #[must_use]
    pub fn new(parts: InterceptorParts) -> Self {
        let suspicious_keywords = parts
            .analysis
            .suspicious_keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect();
        Self {
            defaults: parts.defaults,
            sessions: parts.sessions,
            classifier: parts.classifier,
            evaluator: parts.evaluator,
            authority: parts.authority,
            ledger: parts.ledger,
            sanitizer: parts.sanitizer,
            taint: parts.taint,
            suspicious_keywords,
            analysis: parts.analysis,
            backend: parts.backend,
            clock: parts.clock,
        }
    }

    /// True once the ledger has crossed its write-failure ceiling.
    #[must_use]
    pub fn ledger_fatal(&self) -> bool {
        self.ledger.is_fatal()
    }

    // ------------------------------------------------------------------------

    /// Processes one JSON-RPC request and returns the response to the agent.
    ///
    /// Only `tools/call` is inspected; every other method passes through to
    /// the backend unchanged.
    #[must_use]
    pub fn process_request(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        if method != "tools/call" {
            return match self.backend.forward(request) {
                Ok(response) => response,
                Err(_) => error_response(id, -32000, "upstream error"),
            };
        }
        self.handle_tool_call(request, id)
    }

    /// Runs the full pipeline for an inspected tool call.
    fn handle_tool_call(&self, request: &Value, id: Value) -> Value {
        let params = request.get("params");
        let Some(tool) = params.and_then(|params| params.get("name")).and_then(Value::as_str)
        else {
            return error_response(id, -32602, "invalid tool params");
        };
        let args = params
            .and_then(|params| params.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        if !args.is_object() {
            return error_response(id, -32602, "invalid tool params");
        }

        let envelope =
            ContextEnvelope::from_value(params.and_then(|params| params.get("context")));
        let session_id = resolve_session_id(request, &envelope);
        let now = self.clock.epoch_secs();
        let now_ms = self.clock.epoch_millis();

        // Within-session ordering: hold the session gate through the
        // stateful steps (taint, accumulate, evaluate, ledger) so call n
        // finishes them before call n+1 starts. Dropped before the forward.
        let gate = self.sessions.gate(&session_id, now);
        let serial = match gate.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        // 1-2. Session facts and taint update. The taint flag is a label the
        // policy reads; it never routes by itself.
        let view = self.sessions.touch(&session_id, now);
        let mut context = CallContext::assemble(&self.defaults, envelope, session_id.clone());
        context.is_tainted = view.tainted;
        context.taint_source = view.taint_source;
        if let Some(path) = self.taint.path_argument(tool, &args)
            && self.taint.classify_source(&path) == SourceTrust::Untrusted
        {
            self.sessions.mark_tainted(&session_id, &path, now);
            context.is_tainted = true;
            context.taint_source.get_or_insert(path);
        }

        // 3. Classify. Failures already degraded to the zeroed assessment.
        let assessment = self.classifier.classify(tool, &args, &context).clamped();

        // 4. Accumulate inside the trailing window.
        self.sessions.record_risk(&session_id, assessment.risk, tool, now);
        let accumulated = self.sessions.accumulated_risk(&session_id, now);
        context.accumulated_risk = accumulated;

        // 5. Derived flags.
        context.is_suspicious_query = self.is_suspicious(&args);
        context.tool_category = self.analysis.tool_categories.get(tool).cloned();

        // 6. Policy evaluation; an evaluator panic falls through to the
        // manifest default and is ledgered as a fallback.
        let evaluated = catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.evaluate(tool, &args, &context, &assessment)
        }));
        let decision = match evaluated {
            Ok(decision) => decision,
            Err(_) => {
                let decision = Decision {
                    route: self.evaluator.default_action(),
                    reason: "policy evaluation failed".to_string(),
                    rule_id: "policy_fallback".to_string(),
                };
                self.ledger.append(LedgerEvent::new(
                    now_ms,
                    session_id.clone(),
                    EVENT_POLICY_FALLBACK,
                    json!({"tool": tool}),
                    json!({"route": decision.route, "rule_id": decision.rule_id}),
                    json!({"routed_to": decision.route}),
                    Some(accumulated),
                ));
                decision
            }
        };

        // 7. Warrant issuance binds the decision cryptographically.
        let warrant = match self.authority.issue(&session_id, tool, decision.route, now) {
            Ok(warrant) => warrant,
            Err(_) => {
                self.ledger.append(LedgerEvent::new(
                    now_ms,
                    session_id.clone(),
                    EVENT_AUTHORITY_ERROR,
                    json!({"tool": tool}),
                    json!({"route": decision.route, "rule_id": decision.rule_id}),
                    json!({"outcome": "authority_error"}),
                    Some(accumulated),
                ));
                return error_response(id, -32000, "upstream error");
            }
        };
        let forwarded = inject_warrant(request, &warrant);

        // 8. Ledger the decision before the forward; the attempt is a durable
        // fact even if the agent disconnects mid-call.
        let history_len = self.sessions.risk_history_len(&session_id, now);
        self.ledger.append(LedgerEvent::new(
            now_ms,
            session_id.clone(),
            EVENT_TOOL_INTERCEPTION,
            json!({
                "tool": tool,
                "args": args,
                "risk": assessment.risk,
                "confidence": assessment.confidence,
                "classifier_reason": assessment.reason,
                "tags": assessment.tags,
                "risk_history_length": history_len,
                "is_tainted": context.is_tainted,
                "taint_source": context.taint_source,
            }),
            json!({
                "route": decision.route,
                "rule_id": decision.rule_id,
                "reason": decision.reason,
            }),
            json!({"routed_to": decision.route}),
            Some(accumulated),
        ));

        drop(serial);

        // 9. Forward, then scrub the reply.
        let mut response = match self.backend.forward(&forwarded) {
            Ok(response) => response,
            Err(err) => {
                let outcome = match err {
                    ForwardError::Timeout => "timeout",
                    ForwardError::Transport(_) => "transport_error",
                };
                self.ledger.append(LedgerEvent::new(
                    self.clock.epoch_millis(),
                    session_id,
                    EVENT_BACKEND_FAILURE,
                    json!({"tool": tool}),
                    json!({"route": decision.route, "rule_id": decision.rule_id}),
                    json!({"outcome": outcome}),
                    Some(accumulated),
                ));
                return error_response(id, -32000, "upstream error");
            }
        };
        strip_warrant_key(&mut response);
        if let Some(result) = response.get_mut("result") {
            self.sanitizer.sanitize_value(result);
        }
        response
    }

    /// True when any argument string contains a configured keyword.
    fn is_suspicious(&self, args: &Value) -> bool {
        let haystack = args.to_string().to_lowercase();
        self.suspicious_keywords.iter().any(|keyword| haystack.contains(keyword.as_str()))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the session id from the envelope, the request, or a fresh mint.
fn resolve_session_id(request: &Value, envelope: &ContextEnvelope) -> String {
    if let Some(session_id) = &envelope.session_id {
        return session_id.clone();
    }
    if let Some(session_id) = request.get("session_id").and_then(Value::as_str) {
        return session_id.to_string();
    }
    let mut bytes = [0u8; 12];
    OsRng.fill_bytes(&mut bytes);
    format!("session_{}", hex_encode(&bytes))
}

/// Returns the request with the warrant injected under the reserved key.
fn inject_warrant(request: &Value, warrant: &str) -> Value {
    let mut forwarded = request.clone();
    let params = forwarded
        .as_object_mut()
        .and_then(|request| request.get_mut("params"))
        .and_then(Value::as_object_mut);
    if let Some(params) = params {
        let arguments = params.entry("arguments").or_insert_with(|| json!({}));
        if let Some(arguments) = arguments.as_object_mut() {
            arguments.insert(WARRANT_PARAM_KEY.to_string(), Value::String(warrant.to_string()));
        }
    }
    forwarded
}

/// Removes any echo of the reserved warrant key from a response subtree.
fn strip_warrant_key(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove(WARRANT_PARAM_KEY);
            for item in map.values_mut() {
                strip_warrant_key(item);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_warrant_key(item);
            }
        }
        _ => {}
    }
}

/// Builds a generic JSON-RPC error response.
fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {"code": code, "message": message},
    })
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

    use super::inject_warrant;
    use super::resolve_session_id;
    use super::strip_warrant_key;
    use chimera_core::authority::WARRANT_PARAM_KEY;
    use chimera_core::context::ContextEnvelope;

    #[test]
    fn warrant_is_injected_under_arguments() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "read_file", "arguments": {"filename": "/x"}}
        });
        let forwarded = inject_warrant(&request, "tok");
        assert_eq!(forwarded["params"]["arguments"][WARRANT_PARAM_KEY], json!("tok"));
        // The original request is untouched.
        assert!(request["params"]["arguments"].get(WARRANT_PARAM_KEY).is_none());
    }

    #[test]
    fn warrant_is_injected_even_without_arguments() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "read_file"}
        });
        let forwarded = inject_warrant(&request, "tok");
        assert_eq!(forwarded["params"]["arguments"][WARRANT_PARAM_KEY], json!("tok"));
    }

    #[test]
    fn warrant_echoes_are_stripped_recursively() {
        let mut response = json!({
            "result": {
                "echo": {WARRANT_PARAM_KEY: "tok"},
                "items": [{WARRANT_PARAM_KEY: "tok", "keep": 1}]
            }
        });
        strip_warrant_key(&mut response);
        assert!(response["result"]["echo"].as_object().expect("object").is_empty());
        assert_eq!(response["result"]["items"][0], json!({"keep": 1}));
    }

    #[test]
    fn session_id_prefers_envelope_then_request_then_mint() {
        let envelope = ContextEnvelope::from_value(Some(&json!({"session_id": "env-1"})));
        let request = json!({"session_id": "req-1"});
        assert_eq!(resolve_session_id(&request, &envelope), "env-1");

        let envelope = ContextEnvelope::default();
        assert_eq!(resolve_session_id(&request, &envelope), "req-1");

        let minted = resolve_session_id(&json!({}), &envelope);
        assert!(minted.starts_with("session_"));
        assert_ne!(minted, resolve_session_id(&json!({}), &envelope));
    }
}
