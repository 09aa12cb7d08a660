// chimera-gateway/tests/common/mod.rs
// ============================================================================
// Module: Interception Test Fixtures
// Description: Full-pipeline fixture with a controllable clock.
// Purpose: Drive agent-visible behavior end-to-end without a network.
// Dependencies: chimera-backend, chimera-config, chimera-core, chimera-gateway
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    dead_code,
    reason = "Test-only fixture construction; not every helper is used by every suite."
)]

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chimera_backend::DataPlane;
use chimera_backend::ExecutionEnvironment;
use chimera_config::AnalysisConfig;
use chimera_core::authority::CredentialAuthority;
use chimera_core::context::ContextDefaults;
use chimera_core::ledger::ForensicLedger;
use chimera_core::ledger::LedgerEntry;
use chimera_core::ledger::DEFAULT_GENESIS_HASH;
use chimera_core::policy::PolicyEvaluator;
use chimera_core::policy::PolicyManifest;
use chimera_core::risk::BaselineAssessment;
use chimera_core::risk::PatternClassifier;
use chimera_core::risk::PatternRule;
use chimera_core::route::Route;
use chimera_core::sanitizer::ResponseSanitizer;
use chimera_core::session::SessionConfig;
use chimera_core::session::SessionStore;
use chimera_core::taint::TaintConfig;
use chimera_core::taint::TaintPolicy;
use chimera_gateway::Clock;
use chimera_gateway::InProcessBackend;
use chimera_gateway::Interceptor;
use chimera_gateway::InterceptorParts;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rusqlite::Connection;
use serde_json::json;
use serde_json::Value;

/// Real confidential content seeded into the production overlay.
pub const REAL_FORMULA: &str =
    "{\"project\": \"Chimera\", \"sequence_id\": \"CHIM-017\", \"chain_a\": \"ATG-CGT-TTA\"}";

/// Manually advanced clock shared between the test and the pipeline.
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl Clock for ManualClock {
    fn epoch_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Assembled pipeline plus the handles the tests poke.
pub struct Pipeline {
    /// Interceptor over an in-process dual-plane backend.
    pub interceptor: Interceptor,
    /// Seconds handle driving the pipeline clock.
    pub clock: Arc<AtomicU64>,
    /// Ledger path for chain inspection.
    pub ledger_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

impl Pipeline {
    /// Sends one `tools/call` and returns the agent-visible response.
    pub fn call(&self, tool: &str, args: Value, context: Value) -> Value {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": tool, "arguments": args, "context": context},
        });
        self.interceptor.process_request(&request)
    }

    /// Advances the pipeline clock.
    pub fn advance_secs(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }

    /// Returns the payload inside a successful tool response.
    pub fn payload(response: &Value) -> &Value {
        &response["result"]["content"][0]["json"]
    }

    /// Parses the most recent ledger entry.
    pub fn last_ledger_entry(&self) -> LedgerEntry {
        let content = std::fs::read_to_string(&self.ledger_path).expect("ledger readable");
        let line = content.lines().filter(|line| !line.trim().is_empty()).last().expect("entries");
        serde_json::from_str(line).expect("entry parses")
    }
}

/// Routing manifest used by the interception suites.
fn manifest() -> PolicyManifest {
    let manifest: PolicyManifest = serde_json::from_value(json!({
        "default_action": "production",
        "directives": {
            "users": {
                "mallory": {"action": "shadow", "reason": "standing containment order"}
            }
        },
        "trusted_workflows": [{
            "id": "dr-chen-production",
            "tools": ["read_file"],
            "allow_only": true,
            "action": "production",
            "reason": "approved research workflow",
            "match": {"all": [
                {"field": "context.user_id", "value": "dr_chen"},
                {"field": "context.user_role", "value": "lead_researcher"},
                {"field": "context.source", "value": "lab_workstation"}
            ]}
        }],
        "security_policies": [
            {
                "id": "taint-lockdown",
                "action": "shadow",
                "reason": "tainted session touching sensitive tool",
                "match": {"all": [
                    {"field": "context.is_tainted", "value": true},
                    {"field": "context.tool_category", "value": "sensitive"}
                ]}
            },
            {
                "id": "suspicious-keyword-trigger",
                "action": "shadow",
                "reason": "suspicious keyword in arguments",
                "match": {"field": "context.is_suspicious_query", "value": true}
            }
        ],
        "accumulated_risk": {
            "field": "accumulated_risk",
            "operator": "gte",
            "threshold": 1.5,
            "action": "shadow",
            "reason": "windowed risk over threshold"
        },
        "event_risk": {
            "field": "event_risk",
            "operator": "gte",
            "threshold": 0.8,
            "action": "shadow",
            "reason": "event risk over threshold",
            "confidence_floor": 0.5
        }
    }))
    .expect("manifest parses");
    manifest.validate().expect("manifest valid");
    manifest
}

/// Pattern classifier: confidential reads score high, `risk_hint` values map
/// straight through for the accumulation scenarios.
fn classifier() -> PatternClassifier {
    let rules: Vec<PatternRule> = serde_json::from_value(json!([
        {
            "tools": ["read_file"],
            "field": "args.filename",
            "operator": "contains",
            "value": "_CONF_",
            "risk": 0.95,
            "reason": "confidential artifact requested"
        },
        {"field": "args.risk_hint", "value": 0.2, "risk": 0.2, "reason": "hinted"},
        {"field": "args.risk_hint", "value": 0.4, "risk": 0.4, "reason": "hinted"},
        {"field": "args.risk_hint", "value": 0.5, "risk": 0.5, "reason": "hinted"}
    ]))
    .expect("rules parse");
    PatternClassifier::new(
        rules,
        BaselineAssessment {
            risk: 0.1,
            confidence: 1.0,
            reason: "baseline".to_string(),
        },
    )
}

/// Tools exposed by the in-process backend.
fn tools() -> Vec<chimera_config::ToolConfig> {
    serde_json::from_value(json!([
        {
            "name": "get_patient_record",
            "handler": "sqlite_row",
            "arg_key": "patient_id",
            "table": "patients",
            "fields": ["patient_id", "name", "diagnosis", "ssn"]
        },
        {
            "name": "read_file",
            "handler": "filesystem",
            "arg_key": "filename",
            "sensitive_patterns": ["_CONF_"]
        },
        {
            "name": "list_files",
            "handler": "list_filesystem",
            "arg_key": "path"
        }
    ]))
    .expect("tool configs parse")
}

fn patients_ddl(db: &Connection) {
    db.execute(
        "CREATE TABLE patients (patient_id INTEGER PRIMARY KEY, name TEXT, diagnosis TEXT, ssn \
         TEXT)",
        [],
    )
    .expect("ddl");
    db.execute("CREATE TABLE confidential_files (path TEXT PRIMARY KEY, content TEXT)", [])
        .expect("ddl");
}

/// Builds the full pipeline: seeded production plane, empty shadow plane,
/// manual clock starting at `start_secs`.
pub fn pipeline(start_secs: u64) -> Pipeline {
    let dir = tempfile::tempdir().expect("tempdir");
    let production_root = dir.path().join("real");
    let shadow_root = dir.path().join("shadow");
    std::fs::create_dir_all(production_root.join("shared")).expect("mkdir");
    std::fs::create_dir_all(&shadow_root).expect("mkdir");
    std::fs::write(
        production_root.join("shared/candidate_resume_j_doe.txt"),
        "Jordan Doe - Senior Lab Technician",
    )
    .expect("seed resume");

    let authority = CredentialAuthority::from_keys(
        "wk-1",
        SigningKey::generate(&mut OsRng),
        "wk-2",
        SigningKey::generate(&mut OsRng),
        3_600,
    );

    let production_db = Connection::open_in_memory().expect("open");
    patients_ddl(&production_db);
    production_db
        .execute(
            "INSERT INTO patients VALUES (100, 'Elena Voss', 'chronic migraine', '123-45-6789')",
            [],
        )
        .expect("seed patient");
    production_db
        .execute(
            "INSERT INTO confidential_files VALUES ('/data/private/_CONF_chimera_formula.json', \
             ?1)",
            [REAL_FORMULA],
        )
        .expect("seed formula");

    let shadow_db = Connection::open_in_memory().expect("open");
    patients_ddl(&shadow_db);

    let production = DataPlane::from_connection(
        Route::Production,
        authority.plane_verifier(Route::Production),
        production_db,
        &production_root,
        "confidential_files",
    );
    let shadow = DataPlane::from_connection(
        Route::Shadow,
        authority.plane_verifier(Route::Shadow),
        shadow_db,
        &shadow_root,
        "confidential_files",
    );
    let environment = Arc::new(ExecutionEnvironment::new(production, shadow, tools(), (0, 0)));

    let ledger_path = dir.path().join("forensic_ledger.jsonl");
    let ledger = ForensicLedger::open(&ledger_path, DEFAULT_GENESIS_HASH).expect("ledger");

    let mut analysis = AnalysisConfig::default();
    analysis.tool_categories.insert("get_patient_record".to_string(), "sensitive".to_string());

    let secs = Arc::new(AtomicU64::new(start_secs));
    let interceptor = Interceptor::new(InterceptorParts {
        defaults: ContextDefaults::default(),
        sessions: SessionStore::new(SessionConfig::default()),
        classifier: Box::new(classifier()),
        evaluator: PolicyEvaluator::new(manifest()),
        authority,
        ledger,
        sanitizer: ResponseSanitizer::default(),
        taint: TaintPolicy::from_config(&TaintConfig::default()).expect("taint"),
        analysis,
        backend: Box::new(InProcessBackend::new(environment)),
        clock: Box::new(ManualClock {
            secs: Arc::clone(&secs),
        }),
    });

    Pipeline {
        interceptor,
        clock: secs,
        ledger_path,
        _dir: dir,
    }
}
