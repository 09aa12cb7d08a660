// chimera-gateway/src/server.rs
// ============================================================================
// Module: Gateway Server
// Description: Stdio and HTTP JSON-RPC bindings for the gateway.
// Purpose: Frame requests, enforce limits, and drive the interceptor.
// Dependencies: axum, chimera-config, serde_json, tokio
// ============================================================================

//! ## Overview
//! The gateway serves JSON-RPC over two bindings. Stdio reads one JSON
//! object per LF-terminated line with independently buffered read and write
//! sides; HTTP accepts one request object per `POST /mcp` body and serves
//! requests concurrently behind an inflight semaphore and a body-size guard.
//! Framing failures answer with a JSON-RPC parse error; everything else goes
//! through the interceptor pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chimera_config::ClassifierMode;
use chimera_config::ScenarioConfig;
use chimera_config::Transport;
use chimera_core::authority::CredentialAuthority;
use chimera_core::ledger::ForensicLedger;
use chimera_core::policy::Directives;
use chimera_core::policy::PolicyEvaluator;
use chimera_core::policy::PolicyManifest;
use chimera_core::risk::PatternClassifier;
use chimera_core::risk::RiskClassifier;
use chimera_core::route::Route;
use chimera_core::sanitizer::ResponseSanitizer;
use chimera_core::session::SessionStore;
use chimera_core::taint::TaintPolicy;
use serde_json::json;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::audit::FileAuditSink;
use crate::audit::GatewayAuditEvent;
use crate::audit::GatewayAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::StderrAuditSink;
use crate::backend_client::BackendTransport;
use crate::backend_client::HttpBackendClient;
use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorParts;
use crate::interceptor::SystemClock;
use crate::judge::HttpJudgeClassifier;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway server errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Gateway server instance.
pub struct Gateway {
    config: ScenarioConfig,
    interceptor: Arc<Interceptor>,
    audit: Arc<dyn GatewayAuditSink>,
}

impl Gateway {
    /// Builds a gateway whose backend is reached over HTTP, per config.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when initialization fails.
    pub fn from_config(config: ScenarioConfig) -> Result<Self, GatewayError> {
        let url = config
            .gateway
            .backend_url
            .clone()
            .ok_or_else(|| GatewayError::Config("gateway requires backend_url".to_string()))?;
        let backend = HttpBackendClient::new(url, config.gateway.forward_timeout_secs)
            .map_err(|err| GatewayError::Init(err.to_string()))?;
        Self::from_config_with_backend(config, Box::new(backend))
    }

    /// Builds a gateway over an explicit backend transport.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when initialization fails.
    pub fn from_config_with_backend(
        config: ScenarioConfig,
        backend: Box<dyn BackendTransport>,
    ) -> Result<Self, GatewayError> {
        config.validate().map_err(|err| GatewayError::Config(err.to_string()))?;
        let interceptor = build_interceptor(&config, backend)?;
        let audit = build_audit_sink(&config)?;
        Ok(Self {
            config,
            interceptor: Arc::new(interceptor),
            audit,
        })
    }

    /// Returns the interceptor for in-process callers.
    #[must_use]
    pub fn interceptor(&self) -> Arc<Interceptor> {
        Arc::clone(&self.interceptor)
    }

    /// Serves requests using the configured transport.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the server fails.
    pub async fn serve(self) -> Result<(), GatewayError> {
        match self.config.gateway.transport {
            Transport::Stdio => {
                // Stdio is a blocking loop; keep it off the async reactor.
                tokio::task::block_in_place(|| serve_stdio(&self.interceptor, &self.audit))
            }
            Transport::Http => serve_http(self.config, self.interceptor, self.audit).await,
        }
    }
}

// ============================================================================
// SECTION: Assembly
// ============================================================================

/// Builds the interceptor pipeline from validated configuration.
fn build_interceptor(
    config: &ScenarioConfig,
    backend: Box<dyn BackendTransport>,
) -> Result<Interceptor, GatewayError> {
    let manifest = config.policy.clone().unwrap_or_else(permissive_manifest);
    let taint = TaintPolicy::from_config(&config.taint)
        .map_err(|err| GatewayError::Config(err.to_string()))?;
    let sanitizer = ResponseSanitizer::from_config(&config.sanitizer)
        .map_err(|err| GatewayError::Config(err.to_string()))?;
    let classifier: Box<dyn RiskClassifier> = match config.classifier.mode {
        ClassifierMode::Pattern => Box::new(PatternClassifier::new(
            config.classifier.rules.clone(),
            config.classifier.baseline.clone(),
        )),
        ClassifierMode::Judge => {
            let endpoint = config
                .classifier
                .endpoint
                .clone()
                .ok_or_else(|| GatewayError::Config("judge requires endpoint".to_string()))?;
            Box::new(
                HttpJudgeClassifier::new(
                    endpoint,
                    config.classifier.model.clone(),
                    config.classifier.prompt.clone(),
                    config.classifier.budget_ms,
                )
                .map_err(GatewayError::Init)?,
            )
        }
    };
    let authority = CredentialAuthority::load(
        &config.warrant.key_dir,
        &config.warrant.production_kid,
        &config.warrant.shadow_kid,
        config.warrant.ttl_secs,
    )
    .map_err(|err| GatewayError::Init(err.to_string()))?;
    let ledger = ForensicLedger::open(&config.ledger.path, &config.ledger.genesis_hash)
        .map_err(|err| GatewayError::Init(err.to_string()))?;
    Ok(Interceptor::new(InterceptorParts {
        defaults: config.defaults.clone(),
        sessions: SessionStore::new(config.session.clone()),
        classifier,
        evaluator: PolicyEvaluator::new(manifest),
        authority,
        ledger,
        sanitizer,
        taint,
        analysis: config.analysis.clone(),
        backend,
        clock: Box::new(SystemClock),
    }))
}

/// Manifest used when a scenario declares no policy: everything rides the
/// production default.
pub(crate) fn permissive_manifest() -> PolicyManifest {
    PolicyManifest {
        evaluation_order: None,
        default_action: Route::Production,
        directives: Directives::default(),
        trusted_workflows: Vec::new(),
        security_policies: Vec::new(),
        accumulated_risk: None,
        event_risk: None,
    }
}

/// Builds the request-audit sink from configuration.
fn build_audit_sink(config: &ScenarioConfig) -> Result<Arc<dyn GatewayAuditSink>, GatewayError> {
    if !config.gateway.audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    if let Some(path) = &config.gateway.audit.path {
        let sink = FileAuditSink::new(path)
            .map_err(|err| GatewayError::Config(format!("audit log open failed: {err}")))?;
        return Ok(Arc::new(sink));
    }
    Ok(Arc::new(StderrAuditSink))
}

// ============================================================================
// SECTION: Request Handling
// ============================================================================

/// Parses one framed payload and drives the interceptor.
fn handle_payload(interceptor: &Interceptor, payload: &[u8]) -> Value {
    let Ok(request) = serde_json::from_slice::<Value>(payload) else {
        return json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "parse error"},
        });
    };
    if !request.is_object() {
        return json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "parse error"},
        });
    }
    interceptor.process_request(&request)
}

/// Emits a request-audit event for one handled payload.
fn record_audit(
    audit: &Arc<dyn GatewayAuditSink>,
    transport: &'static str,
    payload: &[u8],
    response: &Value,
) {
    let request: Value = serde_json::from_slice(payload).unwrap_or(Value::Null);
    let method =
        request.get("method").and_then(Value::as_str).unwrap_or("invalid").to_string();
    let tool = request
        .pointer("/params/name")
        .and_then(Value::as_str)
        .map(str::to_string);
    let session_id = request
        .pointer("/params/context/session_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let error_code = response.pointer("/error/code").and_then(Value::as_i64);
    let response_bytes = serde_json::to_vec(response).map_or(0, |bytes| bytes.len());
    audit.record(&GatewayAuditEvent::new(
        transport,
        method,
        tool,
        session_id,
        error_code,
        payload.len(),
        response_bytes,
    ));
}

// ============================================================================
// SECTION: Stdio Transport
// ============================================================================

/// Serves line-delimited JSON-RPC over stdin/stdout until EOF.
///
/// Reading is decoupled from request handling through a dedicated reader
/// thread and an unbounded queue, so a slow backend never blocks the read
/// side. Calls are processed in arrival order, which also gives every
/// session its in-order guarantee on this transport.
fn serve_stdio(
    interceptor: &Arc<Interceptor>,
    audit: &Arc<dyn GatewayAuditSink>,
) -> Result<(), GatewayError> {
    let (lines_tx, lines_rx) = std::sync::mpsc::channel::<String>();
    let reader_thread = std::thread::spawn(move || {
        let reader = BufReader::new(std::io::stdin());
        for line in reader.lines() {
            let Ok(line) = line else {
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            if lines_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut writer = std::io::stdout();
    let mut result = Ok(());
    for line in lines_rx {
        if interceptor.ledger_fatal() {
            result = Err(GatewayError::Transport(
                "forensic ledger write-failure ceiling reached".to_string(),
            ));
            break;
        }
        let response = handle_payload(interceptor, line.as_bytes());
        record_audit(audit, "stdio", line.as_bytes(), &response);
        let Ok(payload) = serde_json::to_string(&response) else {
            result = Err(GatewayError::Transport("response serialization failed".to_string()));
            break;
        };
        if writeln!(writer, "{payload}").and_then(|()| writer.flush()).is_err() {
            result = Err(GatewayError::Transport("stdout write failed".to_string()));
            break;
        }
    }
    // On EOF the reader thread has already finished; on an early break it is
    // parked on stdin and simply dies with the process.
    if result.is_ok() {
        let _ = reader_thread.join();
    }
    result
}

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// Shared state for HTTP handlers.
struct HttpState {
    interceptor: Arc<Interceptor>,
    audit: Arc<dyn GatewayAuditSink>,
    inflight: Semaphore,
    max_body_bytes: usize,
}

/// Serves JSON-RPC over `POST /mcp`.
async fn serve_http(
    config: ScenarioConfig,
    interceptor: Arc<Interceptor>,
    audit: Arc<dyn GatewayAuditSink>,
) -> Result<(), GatewayError> {
    let addr: SocketAddr = config
        .gateway
        .bind
        .parse()
        .map_err(|_| GatewayError::Config("invalid bind address".to_string()))?;
    let state = Arc::new(HttpState {
        interceptor,
        audit,
        inflight: Semaphore::new(config.gateway.max_inflight),
        max_body_bytes: config.gateway.max_body_bytes,
    });
    let app = Router::new().route("/mcp", post(handle_http)).with_state(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| GatewayError::Transport("http bind failed".to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|_| GatewayError::Transport("http server failed".to_string()))
}

/// Handles one HTTP JSON-RPC request.
async fn handle_http(State(state): State<Arc<HttpState>>, body: Bytes) -> Json<Value> {
    let permit = state.inflight.try_acquire();
    if permit.is_err() {
        return Json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32072, "message": "server overloaded"},
        }));
    }
    if body.len() > state.max_body_bytes {
        return Json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32070, "message": "request body too large"},
        }));
    }
    if state.interceptor.ledger_fatal() {
        return Json(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32050, "message": "service unavailable"},
        }));
    }
    let response =
        tokio::task::block_in_place(|| handle_payload(&state.interceptor, body.as_ref()));
    record_audit(&state.audit, "http", body.as_ref(), &response);
    Json(response)
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

    use super::handle_payload;
    use super::permissive_manifest;

    #[test]
    fn permissive_manifest_is_valid() {
        permissive_manifest().validate().expect("valid");
    }

    #[test]
    fn malformed_payload_maps_to_parse_error() {
        // A scalar payload exercises the non-object rejection too.
        let fixture = crate::testutil::in_process_interceptor();
        let response = handle_payload(&fixture.interceptor, b"{broken");
        assert_eq!(response["error"]["code"], json!(-32700));
        let response = handle_payload(&fixture.interceptor, b"42");
        assert_eq!(response["error"]["code"], json!(-32700));
    }
}
