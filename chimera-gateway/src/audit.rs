// chimera-gateway/src/audit.rs
// ============================================================================
// Module: Gateway Audit Logging
// Description: Structured audit events for gateway request handling.
// Purpose: Emit JSON-line request logs without hard sink dependencies.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Request auditing is distinct from the forensic ledger: the ledger records
//! routing decisions with hash chaining, while these events record transport
//! metadata for operations. Sinks are intentionally lightweight so
//! deployments can route events into their own pipeline.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

// ============================================================================
// SECTION: Event
// ============================================================================

/// Gateway request audit event.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Transport label (`stdio` or `http`).
    pub transport: &'static str,
    /// JSON-RPC method.
    pub method: String,
    /// Tool name for `tools/call` requests.
    pub tool: Option<String>,
    /// Session identifier when one was resolved.
    pub session_id: Option<String>,
    /// Whether the response carried an error.
    pub error_code: Option<i64>,
    /// Request body size in bytes.
    pub request_bytes: usize,
    /// Response body size in bytes.
    pub response_bytes: usize,
}

impl GatewayAuditEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        transport: &'static str,
        method: String,
        tool: Option<String>,
        session_id: Option<String>,
        error_code: Option<i64>,
        request_bytes: usize,
        response_bytes: usize,
    ) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "gateway_request",
            timestamp_ms,
            transport,
            method,
            tool,
            session_id,
            error_code,
            request_bytes,
            response_bytes,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for gateway request events.
pub trait GatewayAuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: &GatewayAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl GatewayAuditSink for StderrAuditSink {
    fn record(&self, event: &GatewayAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl GatewayAuditSink for FileAuditSink {
    fn record(&self, event: &GatewayAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl GatewayAuditSink for NoopAuditSink {
    fn record(&self, _event: &GatewayAuditEvent) {}
}
