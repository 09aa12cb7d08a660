// chimera-core/src/session.rs
// ============================================================================
// Module: Chimera Session Store
// Description: Per-session taint flag and windowed risk accumulation.
// Purpose: Track durable per-session facts with within-session serialization.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The session store is the only hot shared structure in the pipeline. Each
//! session is guarded by its own mutex so within-session operations are
//! linearizable while distinct sessions proceed in parallel. The taint flag
//! transitions false→true exactly once; risk events are pruned to a trailing
//! window and `accumulated_risk` is always the sum of the retained events.
//! Idle sessions are evicted once the store grows past its entry ceiling.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Session store tuning knobs.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Trailing risk window in seconds.
    pub window_secs: u64,
    /// Idle seconds before a session becomes evictable.
    pub idle_eviction_secs: u64,
    /// Entry count that triggers an eviction sweep.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_secs: 3_600,
            idle_eviction_secs: 86_400,
            max_sessions: 4_096,
        }
    }
}

// ============================================================================
// SECTION: Session State
// ============================================================================

/// One recorded risk observation.
#[derive(Debug, Clone)]
pub struct RiskEvent {
    /// Epoch seconds when the event was recorded.
    pub timestamp: u64,
    /// Risk score in `[0, 1]`.
    pub risk: f64,
    /// Tool that produced the observation.
    pub tool: String,
}

/// Mutable per-session state.
#[derive(Debug)]
struct Session {
    /// Monotonic taint flag.
    tainted: bool,
    /// Artifact that tainted the session.
    taint_source: Option<String>,
    /// Risk events inside the trailing window, oldest first.
    risk_events: Vec<RiskEvent>,
    /// Last touch time for eviction.
    last_seen: u64,
    /// Pipeline-ordering gate: callers hold this across a whole call so
    /// within-session calls complete the stateful steps in arrival order.
    gate: Arc<Mutex<()>>,
}

impl Session {
    fn new(now: u64) -> Self {
        Self {
            tainted: false,
            taint_source: None,
            risk_events: Vec::new(),
            last_seen: now,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Drops events older than `now - window`.
    fn prune(&mut self, now: u64, window_secs: u64) {
        let cutoff = now.saturating_sub(window_secs);
        self.risk_events.retain(|event| event.timestamp >= cutoff);
    }

    fn accumulated(&self) -> f64 {
        self.risk_events.iter().map(|event| event.risk).sum()
    }
}

/// Read-only view of a session's durable facts.
#[derive(Debug, Clone)]
pub struct SessionView {
    /// Whether the session has ingested untrusted content.
    pub tainted: bool,
    /// Artifact that tainted the session, when tainted.
    pub taint_source: Option<String>,
}

// ============================================================================
// SECTION: Session Store
// ============================================================================

/// Concurrent session store with per-session serialization.
#[derive(Debug)]
pub struct SessionStore {
    /// Store configuration.
    config: SessionConfig,
    /// Session map; the outer lock covers lookup and eviction only.
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    /// Creates a store with the provided configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the session's ordering gate, creating the session if needed.
    ///
    /// Holding the gate's lock serializes a whole pipeline pass against other
    /// calls on the same session; distinct sessions never contend.
    pub fn gate(&self, session_id: &str, now: u64) -> Arc<Mutex<()>> {
        let handle = self.handle(session_id, now);
        let session = lock_unpoisoned(&handle);
        Arc::clone(&session.gate)
    }

    /// Returns or creates the session and reports its durable facts.
    pub fn touch(&self, session_id: &str, now: u64) -> SessionView {
        let handle = self.handle(session_id, now);
        let session = lock_unpoisoned(&handle);
        SessionView {
            tainted: session.tainted,
            taint_source: session.taint_source.clone(),
        }
    }

    /// Marks the session tainted. Idempotent; the first call wins the source.
    ///
    /// Returns `true` when this call performed the false→true transition.
    pub fn mark_tainted(&self, session_id: &str, source: &str, now: u64) -> bool {
        let handle = self.handle(session_id, now);
        let mut session = lock_unpoisoned(&handle);
        if session.tainted {
            return false;
        }
        session.tainted = true;
        session.taint_source = Some(source.to_string());
        true
    }

    /// Records a risk event and prunes the trailing window.
    pub fn record_risk(&self, session_id: &str, risk: f64, tool: &str, now: u64) {
        let handle = self.handle(session_id, now);
        let mut session = lock_unpoisoned(&handle);
        session.risk_events.push(RiskEvent {
            timestamp: now,
            risk: risk.clamp(0.0, 1.0),
            tool: tool.to_string(),
        });
        session.prune(now, self.config.window_secs);
    }

    /// Returns the windowed risk sum for the session.
    pub fn accumulated_risk(&self, session_id: &str, now: u64) -> f64 {
        let handle = self.handle(session_id, now);
        let mut session = lock_unpoisoned(&handle);
        session.prune(now, self.config.window_secs);
        session.accumulated()
    }

    /// Returns the number of risk events retained in the window.
    pub fn risk_history_len(&self, session_id: &str, now: u64) -> usize {
        let handle = self.handle(session_id, now);
        let mut session = lock_unpoisoned(&handle);
        session.prune(now, self.config.window_secs);
        session.risk_events.len()
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.sessions).len()
    }

    /// Returns true when no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up or creates the per-session handle, sweeping idle entries
    /// when the map grows past its ceiling.
    fn handle(&self, session_id: &str, now: u64) -> Arc<Mutex<Session>> {
        let mut sessions = lock_unpoisoned(&self.sessions);
        if sessions.len() > self.config.max_sessions {
            let ttl = self.config.idle_eviction_secs;
            sessions.retain(|_, handle| {
                let session = lock_unpoisoned(handle);
                now.saturating_sub(session.last_seen) <= ttl
            });
        }
        let handle = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(now))));
        {
            let mut session = lock_unpoisoned(handle);
            session.last_seen = now;
        }
        Arc::clone(handle)
    }
}

/// Locks a mutex, recovering the guard when a holder panicked.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
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
        clippy::float_cmp,
        reason = "Test-only assertions."
    )]

    use super::SessionConfig;
    use super::SessionStore;

    fn store() -> SessionStore {
        SessionStore::new(SessionConfig {
            window_secs: 3_600,
            idle_eviction_secs: 86_400,
            max_sessions: 4,
        })
    }

    #[test]
    fn taint_is_monotonic_and_first_source_wins() {
        let store = store();
        assert!(!store.touch("s", 0).tainted);
        assert!(store.mark_tainted("s", "/shared/resume.txt", 1));
        assert!(!store.mark_tainted("s", "/shared/other.txt", 2));
        let view = store.touch("s", 3);
        assert!(view.tainted);
        assert_eq!(view.taint_source.as_deref(), Some("/shared/resume.txt"));
    }

    #[test]
    fn accumulated_risk_is_windowed_sum() {
        let store = store();
        store.record_risk("s", 0.4, "get_patient_record", 0);
        store.record_risk("s", 0.5, "get_patient_record", 600);
        store.record_risk("s", 0.5, "get_patient_record", 1_200);
        let sum = store.accumulated_risk("s", 1_200);
        assert!((sum - 1.4).abs() < 1e-9);

        // The first event ages out of the 3600 s window.
        let sum = store.accumulated_risk("s", 3_601);
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn accumulated_risk_is_zero_after_window_elapses() {
        let store = store();
        store.record_risk("s", 0.9, "read_file", 10);
        assert_eq!(store.accumulated_risk("s", 10 + 3_600 + 1), 0.0);
        assert_eq!(store.risk_history_len("s", 10 + 3_600 + 1), 0);
    }

    #[test]
    fn risk_values_are_clamped() {
        let store = store();
        store.record_risk("s", 7.5, "read_file", 0);
        assert_eq!(store.accumulated_risk("s", 0), 1.0);
    }

    #[test]
    fn idle_sessions_are_swept_past_ceiling() {
        let store = store();
        for idx in 0..5 {
            store.touch(&format!("old-{idx}"), 0);
        }
        // All five are idle for longer than the eviction ttl; the next touch
        // crosses the ceiling and sweeps them.
        store.touch("fresh", 86_400 + 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sessions_are_independent() {
        let store = store();
        store.mark_tainted("a", "/shared/upload.bin", 0);
        assert!(!store.touch("b", 0).tainted);
    }
}
