// chimera-core/src/policy/mod.rs
// ============================================================================
// Module: Chimera Policy
// Description: Policy manifest model, match operators, and evaluator.
// Purpose: Deterministic phase-ordered routing decisions.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! The policy subsystem decides which data plane serves a tool call. A
//! validated [`PolicyManifest`] declares phases; the [`PolicyEvaluator`]
//! executes them in order and returns on the first phase that produces an
//! action, falling back to the manifest's default action.

pub mod evaluator;
pub mod manifest;
pub mod matcher;

pub use evaluator::Decision;
pub use evaluator::PolicyEvaluator;
pub use evaluator::DEFAULT_RULE_ID;
pub use manifest::Condition;
pub use manifest::Directive;
pub use manifest::Directives;
pub use manifest::MatchNode;
pub use manifest::PhaseName;
pub use manifest::PolicyError;
pub use manifest::PolicyManifest;
pub use manifest::Rule;
pub use manifest::ThresholdClause;
pub use manifest::ThresholdField;
pub use manifest::ThresholdOperator;
pub use manifest::DEFAULT_EVALUATION_ORDER;
pub use matcher::compare;
pub use matcher::MatchOperator;
