// chimera-core/src/ledger.rs
// ============================================================================
// Module: Chimera Forensic Ledger
// Description: Append-only hash-chained decision log.
// Purpose: Provide tamper-evident evidence for every routing decision.
// Dependencies: rand, serde, serde_json, sha2
// ============================================================================

//! ## Overview
//! Every routing decision appends one entry to a line-delimited JSON file.
//! Entries chain: each hash covers the canonical JSON of the entry (minus its
//! own `hash` field) concatenated with the previous entry's hash, so
//! truncation or edits break the chain. The writer is mutex-serialized and
//! recovers the tail hash at startup. A failed write never fails the call:
//! the entry queues for retry on the next append, and repeated failures trip
//! a fatal flag the gateway treats as a shutdown signal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::hashing::chain_hash;
use crate::hashing::hex_encode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Genesis `prev_hash` used when no other constant is configured.
pub const DEFAULT_GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Consecutive write failures tolerated before the ledger reports fatal.
pub const DEFAULT_FAILURE_CEILING: u32 = 8;

/// Event type for an inspected and routed tool call.
pub const EVENT_TOOL_INTERCEPTION: &str = "TOOL_INTERCEPTION";
/// Event type recorded when policy evaluation fell back to the default.
pub const EVENT_POLICY_FALLBACK: &str = "POLICY_FALLBACK";
/// Event type recorded when warrant issuance failed.
pub const EVENT_AUTHORITY_ERROR: &str = "AUTHORITY_ERROR";
/// Event type recorded when the backend forward failed or timed out.
pub const EVENT_BACKEND_FAILURE: &str = "BACKEND_FAILURE";

// ============================================================================
// SECTION: Entry
// ============================================================================

/// One chained ledger entry as written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Random event identifier.
    pub event_id: String,
    /// Previous entry's hash (genesis constant for the first entry).
    pub prev_hash: String,
    /// Event time in epoch milliseconds.
    pub timestamp: u64,
    /// Session the decision belongs to.
    pub session_id: String,
    /// Event classification.
    pub event_type: String,
    /// What prompted the decision (tool, args, risk).
    pub trigger: Value,
    /// What was decided (route, rule, reason).
    pub action: Value,
    /// What happened (routed_to, outcome label).
    pub outcome: Value,
    /// Windowed risk sum at decision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulated_risk: Option<f64>,
    /// Chain hash over the canonical entry and `prev_hash`.
    pub hash: String,
}

/// Un-hashed event payload queued for append.
#[derive(Debug, Clone)]
pub struct LedgerEvent {
    /// Random event identifier, assigned at draft time.
    pub event_id: String,
    /// Event time in epoch milliseconds.
    pub timestamp: u64,
    /// Session the decision belongs to.
    pub session_id: String,
    /// Event classification.
    pub event_type: String,
    /// What prompted the decision.
    pub trigger: Value,
    /// What was decided.
    pub action: Value,
    /// What happened.
    pub outcome: Value,
    /// Windowed risk sum at decision time.
    pub accumulated_risk: Option<f64>,
}

impl LedgerEvent {
    /// Builds an event draft with a fresh random identifier.
    #[must_use]
    pub fn new(
        timestamp: u64,
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        trigger: Value,
        action: Value,
        outcome: Value,
        accumulated_risk: Option<f64>,
    ) -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self {
            event_id: hex_encode(&bytes),
            timestamp,
            session_id: session_id.into(),
            event_type: event_type.into(),
            trigger,
            action,
            outcome,
            accumulated_risk,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger file could not be opened or created.
    #[error("ledger open failed at {path}: {detail}")]
    Open {
        /// Offending path.
        path: PathBuf,
        /// Failure detail.
        detail: String,
    },
    /// The configured genesis constant is not 64 hex characters.
    #[error("genesis hash must be 64 hex characters")]
    InvalidGenesis,
    /// An existing tail entry could not be parsed during recovery.
    #[error("ledger tail recovery failed: {0}")]
    Recovery(String),
    /// Entry serialization failed.
    #[error("ledger serialization failed: {0}")]
    Serialization(String),
    /// The chain broke during verification.
    #[error("ledger chain break at line {line}: {detail}")]
    ChainBreak {
        /// One-based line number of the breaking entry.
        line: usize,
        /// Break detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Ledger
// ============================================================================

/// Inner single-writer state.
#[derive(Debug)]
struct LedgerInner {
    /// Chain tail hash.
    last_hash: String,
    /// Entries awaiting a successful write, oldest first.
    pending: VecDeque<LedgerEvent>,
    /// Consecutive failed flush attempts.
    consecutive_failures: u32,
}

/// Append-only hash-chained forensic ledger.
#[derive(Debug)]
pub struct ForensicLedger {
    path: PathBuf,
    failure_ceiling: u32,
    inner: Mutex<LedgerInner>,
}

impl ForensicLedger {
    /// Opens the ledger, creating the file and recovering the tail hash.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] when the file cannot be created, the genesis
    /// constant is malformed, or the existing tail cannot be parsed.
    pub fn open(path: &Path, genesis_hash: &str) -> Result<Self, LedgerError> {
        if genesis_hash.len() != 64 || !genesis_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LedgerError::InvalidGenesis);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|err| LedgerError::Open {
                path: path.to_path_buf(),
                detail: err.to_string(),
            })?;
        }
        let last_hash = recover_last_hash(path)?.unwrap_or_else(|| genesis_hash.to_string());
        Ok(Self {
            path: path.to_path_buf(),
            failure_ceiling: DEFAULT_FAILURE_CEILING,
            inner: Mutex::new(LedgerInner {
                last_hash,
                pending: VecDeque::new(),
                consecutive_failures: 0,
            }),
        })
    }

    /// Appends an event. Never fails the calling request: on a write failure
    /// the event stays queued and is retried on the next append.
    ///
    /// Returns the event identifier.
    pub fn append(&self, event: LedgerEvent) -> String {
        let event_id = event.event_id.clone();
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.pending.push_back(event);
        self.flush_pending(&mut inner);
        event_id
    }

    /// Returns true once repeated write failures crossed the ceiling.
    pub fn is_fatal(&self) -> bool {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.consecutive_failures >= self.failure_ceiling
    }

    /// Returns the number of entries still awaiting a successful write.
    pub fn pending_len(&self) -> usize {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.pending.len()
    }

    /// Writes queued entries in order, stopping at the first failure.
    fn flush_pending(&self, inner: &mut LedgerInner) {
        while let Some(event) = inner.pending.front() {
            match write_entry(&self.path, event, &inner.last_hash) {
                Ok(hash) => {
                    inner.last_hash = hash;
                    inner.pending.pop_front();
                    inner.consecutive_failures = 0;
                }
                Err(_) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    break;
                }
            }
        }
    }
}

/// Chains, serializes, and appends one entry; returns its hash.
fn write_entry(path: &Path, event: &LedgerEvent, prev_hash: &str) -> Result<String, LedgerError> {
    let mut entry = LedgerEntry {
        event_id: event.event_id.clone(),
        prev_hash: prev_hash.to_string(),
        timestamp: event.timestamp,
        session_id: event.session_id.clone(),
        event_type: event.event_type.clone(),
        trigger: event.trigger.clone(),
        action: event.action.clone(),
        outcome: event.outcome.clone(),
        accumulated_risk: event.accumulated_risk,
        hash: String::new(),
    };
    entry.hash = entry_hash(&entry)?;
    let line =
        serde_json::to_string(&entry).map_err(|err| LedgerError::Serialization(err.to_string()))?;
    let mut file =
        OpenOptions::new().create(true).append(true).open(path).map_err(|err| {
            LedgerError::Open {
                path: path.to_path_buf(),
                detail: err.to_string(),
            }
        })?;
    writeln!(file, "{line}").map_err(|err| LedgerError::Open {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    file.flush().map_err(|err| LedgerError::Open {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    Ok(entry.hash)
}

/// Computes the chain hash of an entry, ignoring its `hash` field.
fn entry_hash(entry: &LedgerEntry) -> Result<String, LedgerError> {
    let mut value =
        serde_json::to_value(entry).map_err(|err| LedgerError::Serialization(err.to_string()))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("hash");
    }
    chain_hash(&value, &entry.prev_hash)
        .map_err(|err| LedgerError::Serialization(err.to_string()))
}

/// Reads the final entry's hash, if the file has content.
fn recover_last_hash(path: &Path) -> Result<Option<String>, LedgerError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(LedgerError::Open {
                path: path.to_path_buf(),
                detail: err.to_string(),
            });
        }
    };
    let mut last = None;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|err| LedgerError::Recovery(err.to_string()))?;
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    match last {
        None => Ok(None),
        Some(line) => {
            let entry: LedgerEntry =
                serde_json::from_str(&line).map_err(|err| LedgerError::Recovery(err.to_string()))?;
            Ok(Some(entry.hash))
        }
    }
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Summary of a successful chain walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of verified entries.
    pub entries: usize,
    /// Hash of the final entry (genesis when the file is empty).
    pub tail_hash: String,
}

/// Recomputes the chain from the start and reports the first break.
///
/// # Errors
///
/// Returns [`LedgerError::ChainBreak`] at the first inconsistent entry, or
/// other [`LedgerError`] variants for I/O and parse failures.
pub fn verify_chain(path: &Path, genesis_hash: &str) -> Result<ChainReport, LedgerError> {
    let file = std::fs::File::open(path).map_err(|err| LedgerError::Open {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    let mut expected_prev = genesis_hash.to_string();
    let mut entries = 0usize;
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|err| LedgerError::Recovery(err.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LedgerEntry =
            serde_json::from_str(&line).map_err(|err| LedgerError::ChainBreak {
                line: index + 1,
                detail: format!("unparseable entry: {err}"),
            })?;
        if entry.prev_hash != expected_prev {
            return Err(LedgerError::ChainBreak {
                line: index + 1,
                detail: "prev_hash does not match previous entry".to_string(),
            });
        }
        let recomputed = entry_hash(&entry)?;
        if recomputed != entry.hash {
            return Err(LedgerError::ChainBreak {
                line: index + 1,
                detail: "stored hash does not match recomputed hash".to_string(),
            });
        }
        expected_prev = entry.hash;
        entries += 1;
    }
    Ok(ChainReport {
        entries,
        tail_hash: expected_prev,
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

    use super::verify_chain;
    use super::ForensicLedger;
    use super::LedgerEvent;
    use super::DEFAULT_GENESIS_HASH;
    use super::EVENT_TOOL_INTERCEPTION;

    fn sample_event(session: &str, at: u64) -> LedgerEvent {
        LedgerEvent::new(
            at,
            session,
            EVENT_TOOL_INTERCEPTION,
            json!({"tool": "read_file", "risk": 0.4}),
            json!({"route": "production", "rule_id": "default"}),
            json!({"routed_to": "production"}),
            Some(0.4),
        )
    }

    #[test]
    fn chain_verifies_after_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("open");
        for idx in 0..5 {
            ledger.append(sample_event("s-1", 1_000 + idx));
        }
        let report = verify_chain(&path, DEFAULT_GENESIS_HASH).expect("chain verifies");
        assert_eq!(report.entries, 5);
    }

    #[test]
    fn tail_hash_is_recovered_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        {
            let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("open");
            ledger.append(sample_event("s-1", 1_000));
        }
        {
            let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("reopen");
            ledger.append(sample_event("s-1", 2_000));
        }
        let report = verify_chain(&path, DEFAULT_GENESIS_HASH).expect("chain verifies");
        assert_eq!(report.entries, 2);
    }

    #[test]
    fn tampering_breaks_the_chain() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("open");
        ledger.append(sample_event("s-1", 1_000));
        ledger.append(sample_event("s-1", 2_000));

        let content = std::fs::read_to_string(&path).expect("read");
        let tampered = content.replacen("production", "shadow", 1);
        std::fs::write(&path, tampered).expect("write");
        assert!(verify_chain(&path, DEFAULT_GENESIS_HASH).is_err());
    }

    #[test]
    fn truncation_breaks_the_chain_tail_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("open");
        ledger.append(sample_event("s-1", 1_000));
        ledger.append(sample_event("s-1", 2_000));

        // Drop the first line; the survivor's prev_hash no longer chains
        // from genesis.
        let content = std::fs::read_to_string(&path).expect("read");
        let second_line = content.lines().nth(1).expect("two lines");
        std::fs::write(&path, format!("{second_line}\n")).expect("write");
        assert!(verify_chain(&path, DEFAULT_GENESIS_HASH).is_err());
    }

    #[test]
    fn invalid_genesis_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        assert!(ForensicLedger::open(&path, "xyz").is_err());
    }

    #[test]
    fn append_returns_event_id_and_flushes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.jsonl");
        let ledger = ForensicLedger::open(&path, DEFAULT_GENESIS_HASH).expect("open");
        let event = sample_event("s-1", 1_000);
        let expected_id = event.event_id.clone();
        let event_id = ledger.append(event);
        assert_eq!(event_id, expected_id);
        assert_eq!(ledger.pending_len(), 0);
        assert!(!ledger.is_fatal());
    }
}
