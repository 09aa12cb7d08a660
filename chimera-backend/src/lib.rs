// chimera-backend/src/lib.rs
// ============================================================================
// Module: Chimera Backend
// Description: Dual execution environment behind warrant verification.
// Purpose: Serve production or shadow data per the warrant's signing key.
// Dependencies: axum, chimera-config, chimera-core, rusqlite, tokio
// ============================================================================

//! ## Overview
//! The backend is the tool-execution side of the wire contract: it verifies
//! the warrant injected by the gateway, selects the production or shadow
//! data plane, executes the tool handler, and keeps the two planes'
//! responses schema-identical. Shadow misses synthesize stable fakes so the
//! shadow plane never reveals itself through a "not found".

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod environment;
pub mod planes;
pub mod server;
pub mod synth;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use environment::ExecutionEnvironment;
pub use environment::ExecutionError;
pub use planes::DataPlane;
pub use planes::PlaneError;
pub use server::handle_line;
pub use server::serve_http;
pub use server::serve_stdio;
pub use server::BackendServerError;
