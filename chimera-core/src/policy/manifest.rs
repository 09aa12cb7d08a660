// chimera-core/src/policy/manifest.rs
// ============================================================================
// Module: Chimera Policy Manifest
// Description: Declarative model for phase-ordered routing policy.
// Purpose: Provide a validated, immutable manifest for the evaluator.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! A manifest declares an ordered list of phases plus a terminal default
//! action. Phases are directive tables (exact user/role lookups), ordered
//! rule lists with boolean match trees, or numeric threshold clauses over
//! the session's risk state. Validation is fail-closed: duplicate rule ids,
//! uncompilable regex leaves, mislabeled threshold fields, and allow-only
//! rules that do not route to production all reject the manifest at load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::policy::matcher::MatchOperator;
use crate::route::Route;

// ============================================================================
// SECTION: Phases
// ============================================================================

/// Phase names accepted in `evaluation_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseName {
    /// Exact user/role directive lookup.
    Directives,
    /// Explicit allows for known-good workflows.
    TrustedWorkflows,
    /// Explicit routing for known-bad signals.
    SecurityPolicies,
    /// Stateful windowed-risk threshold.
    AccumulatedRisk,
    /// Single-event risk threshold.
    EventRisk,
}

impl PhaseName {
    /// Returns the manifest spelling of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Directives => "directives",
            Self::TrustedWorkflows => "trusted_workflows",
            Self::SecurityPolicies => "security_policies",
            Self::AccumulatedRisk => "accumulated_risk",
            Self::EventRisk => "event_risk",
        }
    }
}

/// Default phase ordering: explicit human decisions first, then explicit
/// allows, then explicit blocks, then stateful risk, then single-event risk.
pub const DEFAULT_EVALUATION_ORDER: [PhaseName; 5] = [
    PhaseName::Directives,
    PhaseName::TrustedWorkflows,
    PhaseName::SecurityPolicies,
    PhaseName::AccumulatedRisk,
    PhaseName::EventRisk,
];

// ============================================================================
// SECTION: Directives
// ============================================================================

/// One human-authored directive for a user or role.
#[derive(Debug, Clone, Deserialize)]
pub struct Directive {
    /// Route applied on lookup hit.
    pub action: Route,
    /// Reason recorded with the decision.
    pub reason: String,
}

/// Directive tables keyed on exact context fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Directives {
    /// Directives keyed on `context.user_id`.
    #[serde(default)]
    pub users: BTreeMap<String, Directive>,
    /// Directives keyed on `context.user_role`.
    #[serde(default)]
    pub roles: BTreeMap<String, Directive>,
}

// ============================================================================
// SECTION: Rules
// ============================================================================

/// One leaf condition of a match tree.
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    /// Dotted path into `{args, context}`.
    pub field: String,
    /// Comparison operator.
    #[serde(default = "default_operator")]
    pub operator: MatchOperator,
    /// Literal comparand.
    #[serde(default)]
    pub value: Option<Value>,
    /// Context path resolved at evaluation time instead of a literal.
    #[serde(default)]
    pub value_from_context: Option<String>,
}

const fn default_operator() -> MatchOperator {
    MatchOperator::Eq
}

/// Boolean match tree over leaf conditions.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MatchNode {
    /// Conjunction of children.
    All {
        /// Children that must all hold.
        all: Vec<MatchNode>,
    },
    /// Disjunction of children.
    Any {
        /// Children of which one must hold.
        any: Vec<MatchNode>,
    },
    /// Negation of a child.
    Not {
        /// Child that must not hold.
        not: Box<MatchNode>,
    },
    /// Leaf condition.
    Leaf(Condition),
}

/// Named routing rule inside a rule-list phase.
#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    /// Globally unique rule identifier.
    pub id: String,
    /// Optional tool whitelist; absent means every tool.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// Match tree; a rule with no tree matches unconditionally.
    #[serde(default, rename = "match")]
    pub matcher: Option<MatchNode>,
    /// Route applied when the rule fires.
    pub action: Route,
    /// Reason recorded with the decision.
    pub reason: String,
    /// Review marker: the rule may only ever route to production.
    #[serde(default)]
    pub allow_only: bool,
}

impl Rule {
    /// Returns true when the rule's tool whitelist admits the call.
    #[must_use]
    pub fn applies_to(&self, tool: &str) -> bool {
        match &self.tools {
            None => true,
            Some(tools) => tools.iter().any(|name| name == tool || name == "*"),
        }
    }
}

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// Numeric fields a threshold clause may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdField {
    /// Windowed per-session risk sum.
    AccumulatedRisk,
    /// Risk score of the current call.
    EventRisk,
}

/// Comparison operators a threshold clause may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdOperator {
    /// Fires at or above the threshold.
    Gte,
    /// Fires strictly above the threshold.
    Gt,
}

/// Risk-threshold phase clause.
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdClause {
    /// Field the clause compares.
    pub field: ThresholdField,
    /// Boundary semantics.
    #[serde(default = "default_threshold_operator")]
    pub operator: ThresholdOperator,
    /// Threshold value in `[0, n]`.
    pub threshold: f64,
    /// Route applied when the clause fires.
    pub action: Route,
    /// Reason recorded with the decision.
    pub reason: String,
    /// Minimum classifier confidence required for the clause to fire.
    #[serde(default)]
    pub confidence_floor: Option<f64>,
}

const fn default_threshold_operator() -> ThresholdOperator {
    ThresholdOperator::Gte
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Complete routing-policy manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyManifest {
    /// Declared phase ordering; defaults to [`DEFAULT_EVALUATION_ORDER`].
    #[serde(default)]
    pub evaluation_order: Option<Vec<PhaseName>>,
    /// Terminal action when no phase produces one.
    pub default_action: Route,
    /// Directive tables.
    #[serde(default)]
    pub directives: Directives,
    /// Explicit allow rules for known-good workflows.
    #[serde(default)]
    pub trusted_workflows: Vec<Rule>,
    /// Explicit routing rules for known-bad signals.
    #[serde(default)]
    pub security_policies: Vec<Rule>,
    /// Windowed-risk threshold clause.
    #[serde(default)]
    pub accumulated_risk: Option<ThresholdClause>,
    /// Single-event risk threshold clause.
    #[serde(default)]
    pub event_risk: Option<ThresholdClause>,
}

impl PolicyManifest {
    /// Returns the effective phase ordering.
    #[must_use]
    pub fn phases(&self) -> Vec<PhaseName> {
        self.evaluation_order
            .clone()
            .unwrap_or_else(|| DEFAULT_EVALUATION_ORDER.to_vec())
    }

    /// Validates internal consistency. Fail-closed: the gateway refuses to
    /// start on any violation.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError`] on the first violation found.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut seen = BTreeSet::new();
        for rule in self.trusted_workflows.iter().chain(&self.security_policies) {
            if rule.id.is_empty() {
                return Err(PolicyError::EmptyRuleId);
            }
            if !seen.insert(rule.id.clone()) {
                return Err(PolicyError::DuplicateRuleId(rule.id.clone()));
            }
            if rule.allow_only && rule.action != Route::Production {
                return Err(PolicyError::AllowOnlyViolation(rule.id.clone()));
            }
            if let Some(matcher) = &rule.matcher {
                validate_node(matcher)?;
            }
        }
        if let Some(clause) = &self.accumulated_risk
            && clause.field != ThresholdField::AccumulatedRisk
        {
            return Err(PolicyError::ThresholdFieldMismatch {
                phase: PhaseName::AccumulatedRisk.as_str(),
            });
        }
        if let Some(clause) = &self.event_risk
            && clause.field != ThresholdField::EventRisk
        {
            return Err(PolicyError::ThresholdFieldMismatch {
                phase: PhaseName::EventRisk.as_str(),
            });
        }
        for clause in self.accumulated_risk.iter().chain(&self.event_risk) {
            if !clause.threshold.is_finite() || clause.threshold < 0.0 {
                return Err(PolicyError::InvalidThreshold(clause.threshold));
            }
            if let Some(floor) = clause.confidence_floor
                && !(0.0..=1.0).contains(&floor)
            {
                return Err(PolicyError::InvalidConfidenceFloor(floor));
            }
        }
        if let Some(order) = &self.evaluation_order {
            let mut seen_phases = BTreeSet::new();
            for phase in order {
                if !seen_phases.insert(phase.as_str()) {
                    return Err(PolicyError::DuplicatePhase(phase.as_str()));
                }
            }
        }
        Ok(())
    }
}

/// Recursively validates a match tree.
fn validate_node(node: &MatchNode) -> Result<(), PolicyError> {
    match node {
        MatchNode::All { all } => all.iter().try_for_each(validate_node),
        MatchNode::Any { any } => any.iter().try_for_each(validate_node),
        MatchNode::Not { not } => validate_node(not),
        MatchNode::Leaf(condition) => validate_condition(condition),
    }
}

/// Validates one leaf condition.
fn validate_condition(condition: &Condition) -> Result<(), PolicyError> {
    if condition.field.is_empty() {
        return Err(PolicyError::EmptyFieldPath);
    }
    if condition.value.is_some() && condition.value_from_context.is_some() {
        return Err(PolicyError::AmbiguousComparand(condition.field.clone()));
    }
    if condition.operator == MatchOperator::Regex {
        let Some(Value::String(pattern)) = &condition.value else {
            return Err(PolicyError::RegexValueNotString(condition.field.clone()));
        };
        Regex::new(pattern)
            .map_err(|err| PolicyError::InvalidRegex(pattern.clone(), err.to_string()))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Manifest validation errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A rule id appears more than once across all rule lists.
    #[error("duplicate rule id: {0}")]
    DuplicateRuleId(String),
    /// A rule has an empty id.
    #[error("rule id must not be empty")]
    EmptyRuleId,
    /// An allow-only rule routes somewhere other than production.
    #[error("allow-only rule {0} must route to production")]
    AllowOnlyViolation(String),
    /// A match leaf has an empty field path.
    #[error("match leaf field path must not be empty")]
    EmptyFieldPath,
    /// A match leaf supplies both a literal and a context comparand.
    #[error("match leaf on {0} sets both value and value_from_context")]
    AmbiguousComparand(String),
    /// A regex leaf's value is not a string.
    #[error("regex leaf on {0} requires a string pattern")]
    RegexValueNotString(String),
    /// A regex pattern does not compile.
    #[error("invalid regex {0:?}: {1}")]
    InvalidRegex(String, String),
    /// A threshold clause names the wrong field for its phase slot.
    #[error("threshold clause for phase {phase} names the wrong field")]
    ThresholdFieldMismatch {
        /// Phase whose clause is mislabeled.
        phase: &'static str,
    },
    /// A threshold value is negative or non-finite.
    #[error("invalid threshold value: {0}")]
    InvalidThreshold(f64),
    /// A confidence floor lies outside `[0, 1]`.
    #[error("confidence floor out of range: {0}")]
    InvalidConfidenceFloor(f64),
    /// A phase appears twice in `evaluation_order`.
    #[error("phase {0} listed twice in evaluation_order")]
    DuplicatePhase(&'static str),
}

// ============================================================================
// SECTION: Tests
// ============================================================================
