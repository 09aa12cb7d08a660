// chimera-gateway/src/backend_client.rs
// ============================================================================
// Module: Backend Transport
// Description: Forwarding seam between the gateway and the execution backend.
// Purpose: Swap HTTP and in-process backends without touching the pipeline.
// Dependencies: chimera-backend, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The interceptor forwards modified requests through a transport trait.
//! Deployments split across processes use the HTTP client; single-process
//! deployments and tests wrap the execution environment directly. Forward
//! failures surface as timeout or transport errors; the wire message the
//! agent sees stays generic either way.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use chimera_backend::ExecutionEnvironment;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Forwarding errors.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The backend did not answer within the deadline.
    #[error("backend timeout")]
    Timeout,
    /// The backend could not be reached or answered garbage.
    #[error("backend transport failure: {0}")]
    Transport(String),
}

/// Transport carrying requests to the execution backend.
pub trait BackendTransport: Send + Sync {
    /// Forwards one JSON-RPC request and returns the response object.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError`] when the backend fails or times out.
    fn forward(&self, request: &Value) -> Result<Value, ForwardError>;
}

// ============================================================================
// SECTION: HTTP Client
// ============================================================================

/// HTTP backend client posting to the backend's `/mcp` endpoint.
pub struct HttpBackendClient {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpBackendClient {
    /// Builds a client with the forward deadline as its request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ForwardError::Transport`] when the client cannot be built.
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, ForwardError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|err| ForwardError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl BackendTransport for HttpBackendClient {
    fn forward(&self, request: &Value) -> Result<Value, ForwardError> {
        let response = self.client.post(&self.url).json(request).send().map_err(|err| {
            if err.is_timeout() {
                ForwardError::Timeout
            } else {
                ForwardError::Transport(err.to_string())
            }
        })?;
        let response =
            response.error_for_status().map_err(|err| ForwardError::Transport(err.to_string()))?;
        response.json().map_err(|err| ForwardError::Transport(err.to_string()))
    }
}

// ============================================================================
// SECTION: In-Process Backend
// ============================================================================

/// Direct wrapper over the execution environment for single-process
/// deployments and tests.
pub struct InProcessBackend {
    environment: Arc<ExecutionEnvironment>,
}

impl InProcessBackend {
    /// Wraps an execution environment.
    #[must_use]
    pub fn new(environment: Arc<ExecutionEnvironment>) -> Self {
        Self {
            environment,
        }
    }
}

impl BackendTransport for InProcessBackend {
    fn forward(&self, request: &Value) -> Result<Value, ForwardError> {
        Ok(self.environment.handle(request))
    }
}
