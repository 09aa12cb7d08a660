// chimera-backend/src/synth.rs
// ============================================================================
// Module: Chimera Shadow Synthesis
// Description: Deterministic-per-id generation of synthetic records and files.
// Purpose: Keep the shadow plane answerable for any id without a seed row.
// Dependencies: serde_json, sha2
// ============================================================================

//! ## Overview
//! When a shadow lookup misses, the plane fabricates a plausible record and
//! persists it so repeat reads are stable. Generation is deterministic per
//! `(table, id, column)`: values are drawn from fixed wordlists indexed by a
//! SHA-256 digest, so two processes synthesizing the same id produce the
//! same record and no id ever answers "not found".

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Wordlists
// ============================================================================

const FIRST_NAMES: &[&str] = &[
    "Avery", "Bianca", "Carlos", "Dana", "Elif", "Farid", "Greta", "Hiro", "Ingrid", "Jonas",
    "Keiko", "Lamar", "Mireille", "Nikolai", "Opal", "Priya", "Quentin", "Rosa", "Soren", "Tamsin",
];

const LAST_NAMES: &[&str] = &[
    "Alvarez", "Brandt", "Calloway", "Duval", "Eriksen", "Fontaine", "Grimaldi", "Hale", "Ivanov",
    "Jansen", "Kowalski", "Lindqvist", "Moreau", "Novak", "Okafor", "Petrov", "Quinn", "Rhodes",
    "Santos", "Tanaka",
];

const CLINICAL_TERMS: &[&str] = &[
    "chronic migraine", "type 2 diabetes", "mild hypertension", "seasonal rhinitis",
    "lumbar strain", "iron deficiency", "atrial flutter", "plantar fasciitis",
    "contact dermatitis", "tension headache", "vitamin D deficiency", "acid reflux",
];

const FILLER_WORDS: &[&str] = &[
    "ledger", "cascade", "profile", "summary", "revision", "archive", "baseline", "projection",
    "manifest", "register", "extract", "digest", "rollup", "snapshot", "index", "bundle",
];

// ============================================================================
// SECTION: Deterministic Selection
// ============================================================================

/// Derives a stable 64-bit index from the generation coordinates.
fn seed(table: &str, id: &str, column: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update([0x1f]);
    hasher.update(id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(column.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn pick<'a>(list: &[&'a str], seed: u64) -> &'a str {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Index reduction over a short fixed list."
    )]
    let index = (seed % list.len() as u64) as usize;
    list[index]
}

// ============================================================================
// SECTION: Record Synthesis
// ============================================================================

/// Fabricates one row for `(table, id)` across the requested columns.
///
/// The id column echoes the requested id so the record is self-consistent;
/// other columns derive from their names so schemas line up with production.
#[must_use]
pub fn synth_row(table: &str, id: &Value, id_field: &str, fields: &[String]) -> Map<String, Value> {
    let id_text = value_text(id);
    let mut row = Map::new();
    for field in fields {
        if field == id_field {
            row.insert(field.clone(), id.clone());
            continue;
        }
        row.insert(field.clone(), synth_column(table, &id_text, field));
    }
    row
}

/// Fabricates one column value from its name.
fn synth_column(table: &str, id: &str, column: &str) -> Value {
    let seed = seed(table, id, column);
    let lowered = column.to_lowercase();
    if lowered.contains("name") {
        return Value::String(format!(
            "{} {}",
            pick(FIRST_NAMES, seed),
            pick(LAST_NAMES, seed >> 8)
        ));
    }
    if lowered.contains("ssn") {
        return Value::String(format!(
            "{:03}-{:02}-{:04}",
            100 + seed % 800,
            10 + (seed >> 16) % 89,
            1_000 + (seed >> 32) % 9_000
        ));
    }
    if lowered.contains("diagnosis") || lowered.contains("condition") {
        return Value::String(pick(CLINICAL_TERMS, seed).to_string());
    }
    if lowered.contains("date") || lowered.contains("_at") {
        return Value::String(format!(
            "20{:02}-{:02}-{:02}",
            18 + seed % 8,
            1 + (seed >> 8) % 12,
            1 + (seed >> 16) % 28
        ));
    }
    if lowered.contains("count") || lowered.contains("amount") || lowered.contains("age") {
        return Value::from(18 + seed % 70);
    }
    Value::String(format!(
        "{}-{}",
        pick(FILLER_WORDS, seed),
        pick(FILLER_WORDS, seed >> 8)
    ))
}

// ============================================================================
// SECTION: File Synthesis
// ============================================================================

/// Fabricates plausible text content for a missing shadow file.
#[must_use]
pub fn synth_file(path: &str) -> String {
    let mut lines = Vec::with_capacity(4);
    for line in 0..4u64 {
        let seed = seed("fs", path, &line.to_string());
        lines.push(format!(
            "{} {} {} {}",
            pick(FILLER_WORDS, seed),
            pick(FILLER_WORDS, seed >> 8),
            pick(FILLER_WORDS, seed >> 16),
            pick(FILLER_WORDS, seed >> 24),
        ));
    }
    lines.join("\n")
}

/// Renders a JSON value as the text used in generation coordinates.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
