// chimera-backend/src/server.rs
// ============================================================================
// Module: Chimera Backend Server
// Description: Stdio and HTTP bindings for the execution environment.
// Purpose: Expose the dual data plane over line-delimited JSON-RPC and HTTP.
// Dependencies: axum, chimera-config, serde_json, tokio
// ============================================================================

//! ## Overview
//! The backend serves JSON-RPC over two bindings: one JSON object per
//! LF-terminated line on stdio, or `POST /mcp` over HTTP. Framing errors
//! answer with a JSON-RPC parse error; everything else is delegated to the
//! execution environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::json;
use serde_json::Value;
use thiserror::Error;

use crate::environment::ExecutionEnvironment;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Backend server errors.
#[derive(Debug, Error)]
pub enum BackendServerError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Stdio Binding
// ============================================================================

/// Serves requests over stdin/stdout until EOF.
///
/// # Errors
///
/// Returns [`BackendServerError`] on an unrecoverable stream failure.
pub fn serve_stdio(environment: &ExecutionEnvironment) -> Result<(), BackendServerError> {
    let reader = BufReader::new(std::io::stdin());
    let mut writer = std::io::stdout();
    for line in reader.lines() {
        let line = line.map_err(|err| BackendServerError::Transport(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(environment, &line);
        let payload = serde_json::to_string(&response)
            .map_err(|err| BackendServerError::Transport(err.to_string()))?;
        writeln!(writer, "{payload}")
            .map_err(|err| BackendServerError::Transport(err.to_string()))?;
        writer.flush().map_err(|err| BackendServerError::Transport(err.to_string()))?;
    }
    Ok(())
}

/// Parses one line and dispatches it; malformed JSON yields a parse error.
#[must_use]
pub fn handle_line(environment: &ExecutionEnvironment, line: &str) -> Value {
    match serde_json::from_str::<Value>(line) {
        Ok(request) => environment.handle(&request),
        Err(_) => json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": -32700, "message": "parse error"},
        }),
    }
}

// ============================================================================
// SECTION: HTTP Binding
// ============================================================================

/// Serves requests over `POST /mcp`.
///
/// # Errors
///
/// Returns [`BackendServerError`] when binding or serving fails.
pub async fn serve_http(
    environment: Arc<ExecutionEnvironment>,
    bind: &str,
) -> Result<(), BackendServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| BackendServerError::Transport("invalid bind address".to_string()))?;
    let app = Router::new().route("/mcp", post(handle_http)).with_state(environment);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|_| BackendServerError::Transport("http bind failed".to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|_| BackendServerError::Transport("http server failed".to_string()))
}

/// Handles one HTTP JSON-RPC request.
async fn handle_http(
    State(environment): State<Arc<ExecutionEnvironment>>,
    body: String,
) -> Json<Value> {
    let response = tokio::task::block_in_place(|| handle_line(&environment, &body));
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

    use chimera_core::authority::CredentialAuthority;
    use chimera_core::route::Route;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use rusqlite::Connection;
    use serde_json::json;

    use super::handle_line;
    use crate::environment::ExecutionEnvironment;
    use crate::planes::DataPlane;

    fn environment(dir: &std::path::Path) -> ExecutionEnvironment {
        let authority = CredentialAuthority::from_keys(
            "wk-1",
            SigningKey::generate(&mut OsRng),
            "wk-2",
            SigningKey::generate(&mut OsRng),
            3_600,
        );
        let production = DataPlane::from_connection(
            Route::Production,
            authority.plane_verifier(Route::Production),
            Connection::open_in_memory().expect("open"),
            dir,
            "confidential_files",
        );
        let shadow = DataPlane::from_connection(
            Route::Shadow,
            authority.plane_verifier(Route::Shadow),
            Connection::open_in_memory().expect("open"),
            dir,
            "confidential_files",
        );
        ExecutionEnvironment::new(production, shadow, Vec::new(), (0, 0))
    }

    #[test]
    fn malformed_line_yields_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let environment = environment(dir.path());
        let response = handle_line(&environment, "{not json");
        assert_eq!(response["error"]["code"], json!(-32700));
        assert_eq!(response["id"], json!(null));
    }

    #[test]
    fn tools_list_round_trips_over_the_line_codec() {
        let dir = tempfile::tempdir().expect("tempdir");
        let environment = environment(dir.path());
        let line = r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#;
        let response = handle_line(&environment, line);
        assert_eq!(response["id"], json!(3));
        assert!(response["result"]["tools"].as_array().expect("tools").is_empty());
    }
}
