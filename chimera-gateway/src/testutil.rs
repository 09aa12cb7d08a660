// chimera-gateway/src/testutil.rs
// ============================================================================
// Module: Gateway Test Fixtures
// Description: In-process pipeline fixtures for unit tests.
// Purpose: Stand up a full interceptor without touching the network.
// Dependencies: chimera-backend, chimera-core, rusqlite
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only fixture construction."
)]

use std::sync::Arc;

use chimera_backend::DataPlane;
use chimera_backend::ExecutionEnvironment;
use chimera_config::AnalysisConfig;
use chimera_core::authority::CredentialAuthority;
use chimera_core::context::ContextDefaults;
use chimera_core::ledger::ForensicLedger;
use chimera_core::ledger::DEFAULT_GENESIS_HASH;
use chimera_core::policy::PolicyEvaluator;
use chimera_core::risk::BaselineAssessment;
use chimera_core::risk::PatternClassifier;
use chimera_core::route::Route;
use chimera_core::sanitizer::ResponseSanitizer;
use chimera_core::session::SessionConfig;
use chimera_core::session::SessionStore;
use chimera_core::taint::TaintConfig;
use chimera_core::taint::TaintPolicy;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rusqlite::Connection;

use crate::backend_client::InProcessBackend;
use crate::interceptor::Interceptor;
use crate::interceptor::InterceptorParts;

/// In-process pipeline fixture; the temp dir keeps the ledger alive.
pub struct TestFixture {
    /// Assembled interceptor over an in-process backend.
    pub interceptor: Arc<Interceptor>,
    _dir: tempfile::TempDir,
}

/// Builds an interceptor over an empty in-process backend with a
/// production-default policy.
pub fn in_process_interceptor() -> TestFixture {
    let dir = tempfile::tempdir().expect("tempdir");
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
        dir.path(),
        "confidential_files",
    );
    let shadow = DataPlane::from_connection(
        Route::Shadow,
        authority.plane_verifier(Route::Shadow),
        Connection::open_in_memory().expect("open"),
        dir.path(),
        "confidential_files",
    );
    let environment =
        Arc::new(ExecutionEnvironment::new(production, shadow, Vec::new(), (0, 0)));
    let ledger = ForensicLedger::open(&dir.path().join("ledger.jsonl"), DEFAULT_GENESIS_HASH)
        .expect("ledger");
    let interceptor = Interceptor::new(InterceptorParts {
        defaults: ContextDefaults::default(),
        sessions: SessionStore::new(SessionConfig::default()),
        classifier: Box::new(PatternClassifier::new(Vec::new(), BaselineAssessment::default())),
        evaluator: PolicyEvaluator::new(crate::server::permissive_manifest()),
        authority,
        ledger,
        sanitizer: ResponseSanitizer::default(),
        taint: TaintPolicy::from_config(&TaintConfig::default()).expect("taint"),
        analysis: AnalysisConfig::default(),
        backend: Box::new(InProcessBackend::new(environment)),
        clock: Box::new(crate::interceptor::SystemClock),
    });
    TestFixture {
        interceptor: Arc::new(interceptor),
        _dir: dir,
    }
}
