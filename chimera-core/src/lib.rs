// chimera-core/src/lib.rs
// ============================================================================
// Module: Chimera Core
// Description: Core routing, warrant, and forensic-ledger logic.
// Purpose: Pure decision pipeline shared by the gateway and backend crates.
// Dependencies: ed25519-dalek, regex, serde, serde_jcs, serde_json, sha2
// ============================================================================

//! ## Overview
//! Chimera core holds the pieces of the routing-and-enforcement pipeline
//! that are pure logic: the session store, risk classification interface,
//! phase-ordered policy evaluator, dual-keyed credential authority,
//! hash-chained forensic ledger, taint rules, and response sanitizer. The
//! gateway crate wires these into a transport; the backend crate consumes
//! per-plane verifiers. Security posture: all inputs crossing this crate's
//! boundary originate from an untrusted agent and must be treated as hostile.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod authority;
pub mod context;
pub mod hashing;
pub mod ledger;
pub mod policy;
pub mod risk;
pub mod route;
pub mod sanitizer;
pub mod session;
pub mod taint;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use authority::AuthorityError;
pub use authority::CredentialAuthority;
pub use authority::PlaneVerifier;
pub use authority::WarrantClaims;
pub use authority::DEFAULT_WARRANT_TTL_SECS;
pub use authority::WARRANT_PARAM_KEY;
pub use context::CallContext;
pub use context::ContextDefaults;
pub use context::ContextEnvelope;
pub use context::FieldView;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use ledger::ChainReport;
pub use ledger::ForensicLedger;
pub use ledger::LedgerEntry;
pub use ledger::LedgerError;
pub use ledger::LedgerEvent;
pub use ledger::DEFAULT_GENESIS_HASH;
pub use policy::Decision;
pub use policy::PolicyError;
pub use policy::PolicyEvaluator;
pub use policy::PolicyManifest;
pub use risk::BaselineAssessment;
pub use risk::PatternClassifier;
pub use risk::PatternRule;
pub use risk::RiskAssessment;
pub use risk::RiskClassifier;
pub use route::Route;
pub use sanitizer::ResponseSanitizer;
pub use sanitizer::SanitizerConfig;
pub use session::SessionConfig;
pub use session::SessionStore;
pub use session::SessionView;
pub use taint::SourceTrust;
pub use taint::TaintConfig;
pub use taint::TaintPolicy;
