// chimera-core/src/taint.rs
// ============================================================================
// Module: Chimera Taint Policy
// Description: Source-trust classification for file reads.
// Purpose: Decide whether an accessed artifact taints the session.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! A taint policy classifies accessed paths as trusted or untrusted using
//! red (untrusted) and green (trusted) pattern lists from the scenario
//! manifest. Red patterns are consulted first, then green, then the
//! configured default. An untrusted verdict marks the session tainted; the
//! flag is a label the policy phases read, never a routing short-circuit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default trust applied when no pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DefaultTrust {
    /// Unmatched sources are trusted (utility by default).
    #[default]
    Green,
    /// Unmatched sources are untrusted (secure by default).
    Red,
}

/// Taint configuration delivered by the scenario manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct TaintConfig {
    /// Patterns marking a source untrusted.
    #[serde(default = "default_red_patterns")]
    pub untrusted_patterns: Vec<String>,
    /// Patterns marking a source trusted.
    #[serde(default = "default_green_patterns")]
    pub trusted_patterns: Vec<String>,
    /// Trust applied when neither list matches.
    #[serde(default)]
    pub default_trust: DefaultTrust,
    /// File-read tools and the argument keys carrying their path.
    #[serde(default = "default_file_read_tools")]
    pub file_read_tools: BTreeMap<String, Vec<String>>,
}

impl Default for TaintConfig {
    fn default() -> Self {
        Self {
            untrusted_patterns: default_red_patterns(),
            trusted_patterns: default_green_patterns(),
            default_trust: DefaultTrust::Green,
            file_read_tools: default_file_read_tools(),
        }
    }
}

fn default_red_patterns() -> Vec<String> {
    ["resume", "upload", "external", "/shared/", "attachment"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_green_patterns() -> Vec<String> {
    ["/private/", "/real/", "_conf_", "system", "internal"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_file_read_tools() -> BTreeMap<String, Vec<String>> {
    let mut tools = BTreeMap::new();
    tools.insert("read_file".to_string(), vec!["filename".to_string(), "path".to_string()]);
    tools
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Trust verdict for one accessed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTrust {
    /// The source is trusted; the session stays as it was.
    Trusted,
    /// The source is untrusted; accessing it taints the session.
    Untrusted,
}

/// Compiled taint policy.
#[derive(Debug)]
pub struct TaintPolicy {
    red: Vec<Regex>,
    green: Vec<Regex>,
    default_trust: DefaultTrust,
    file_read_tools: BTreeMap<String, Vec<String>>,
}

impl TaintPolicy {
    /// Compiles a policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TaintError`] when a pattern does not compile.
    pub fn from_config(config: &TaintConfig) -> Result<Self, TaintError> {
        Ok(Self {
            red: compile_patterns(&config.untrusted_patterns)?,
            green: compile_patterns(&config.trusted_patterns)?,
            default_trust: config.default_trust,
            file_read_tools: config.file_read_tools.clone(),
        })
    }

    /// Classifies a source path. Red patterns win over green.
    #[must_use]
    pub fn classify_source(&self, source: &str) -> SourceTrust {
        let source = source.to_lowercase();
        if self.red.iter().any(|pattern| pattern.is_match(&source)) {
            return SourceTrust::Untrusted;
        }
        if self.green.iter().any(|pattern| pattern.is_match(&source)) {
            return SourceTrust::Trusted;
        }
        match self.default_trust {
            DefaultTrust::Green => SourceTrust::Trusted,
            DefaultTrust::Red => SourceTrust::Untrusted,
        }
    }

    /// Extracts the path argument for a file-read tool, if the tool is one.
    #[must_use]
    pub fn path_argument(&self, tool: &str, args: &Value) -> Option<String> {
        let keys = self.file_read_tools.get(tool)?;
        for key in keys {
            if let Some(path) = args.get(key).and_then(Value::as_str)
                && !path.is_empty()
            {
                return Some(path.to_string());
            }
        }
        None
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, TaintError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|err| TaintError::InvalidPattern(pattern.clone(), err.to_string()))
        })
        .collect()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Taint configuration errors.
#[derive(Debug, Error)]
pub enum TaintError {
    /// A configured pattern does not compile.
    #[error("invalid taint pattern {0:?}: {1}")]
    InvalidPattern(String, String),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
