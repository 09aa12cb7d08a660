// chimera-core/src/risk.rs
// ============================================================================
// Module: Chimera Risk Classification
// Description: Risk assessment record and classifier interface.
// Purpose: Fuse probabilistic judgement into the deterministic pipeline.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! A classifier maps `(tool, args, context)` to an immutable
//! [`RiskAssessment`]. Classification is side-effect-free and fail-open: any
//! classifier failure degrades to the zeroed "unavailable" assessment so the
//! deterministic policy phases still run. The offline implementation here
//! evaluates ordered pattern rules; the external probabilistic judge lives in
//! the gateway crate where the HTTP client belongs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::context::CallContext;
use crate::context::FieldView;
use crate::policy::matcher::compare;
use crate::policy::matcher::MatchOperator;

// ============================================================================
// SECTION: Assessment
// ============================================================================

/// Immutable classifier verdict for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Risk score in `[0, 1]`.
    pub risk: f64,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
    /// Reasoning behind the score.
    pub reason: String,
    /// Violation tags attached by the classifier.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RiskAssessment {
    /// Builds an assessment with both scores clamped to `[0, 1]`.
    #[must_use]
    pub fn new(risk: f64, confidence: f64, reason: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            risk: clamp_unit(risk),
            confidence: clamp_unit(confidence),
            reason: reason.into(),
            tags,
        }
    }

    /// The fail-open substitute used when the classifier cannot answer.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            risk: 0.0,
            confidence: 0.0,
            reason: "unavailable".to_string(),
            tags: Vec::new(),
        }
    }

    /// Returns a copy with both scores clamped to `[0, 1]`.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.risk = clamp_unit(self.risk);
        self.confidence = clamp_unit(self.confidence);
        self
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

// ============================================================================
// SECTION: Classifier Interface
// ============================================================================

/// Maps a tool call to a risk assessment.
///
/// Implementations must be side-effect-free and must return within the
/// configured budget; callers substitute [`RiskAssessment::unavailable`] when
/// they cannot.
pub trait RiskClassifier: Send + Sync {
    /// Classifies one tool call.
    fn classify(&self, tool: &str, args: &Value, context: &CallContext) -> RiskAssessment;
}

// ============================================================================
// SECTION: Pattern Classifier
// ============================================================================

/// One offline classification rule, evaluated top-to-bottom.
#[derive(Debug, Clone, Deserialize)]
pub struct PatternRule {
    /// Optional tool whitelist; absent means every tool.
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    /// Dotted path into `{args, context}`.
    pub field: String,
    /// Comparison operator.
    #[serde(default = "default_pattern_operator")]
    pub operator: MatchOperator,
    /// Comparand.
    pub value: Value,
    /// Risk emitted on match.
    pub risk: f64,
    /// Confidence emitted on match.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Reason emitted on match.
    pub reason: String,
    /// Tags emitted on match.
    #[serde(default)]
    pub tags: Vec<String>,
}

const fn default_pattern_operator() -> MatchOperator {
    MatchOperator::Eq
}

const fn default_confidence() -> f64 {
    1.0
}

/// Baseline assessment returned when no pattern rule matches.
#[derive(Debug, Clone, Deserialize)]
pub struct BaselineAssessment {
    /// Baseline risk score.
    pub risk: f64,
    /// Baseline confidence.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Baseline reason.
    pub reason: String,
}

impl Default for BaselineAssessment {
    fn default() -> Self {
        Self {
            risk: 0.1,
            confidence: 1.0,
            reason: "baseline: no rule matched".to_string(),
        }
    }
}

/// Offline classifier over ordered pattern rules; first match wins.
#[derive(Debug)]
pub struct PatternClassifier {
    /// Ordered rules.
    rules: Vec<PatternRule>,
    /// Fallthrough assessment.
    baseline: BaselineAssessment,
}

impl PatternClassifier {
    /// Creates a classifier from ordered rules and a baseline.
    #[must_use]
    pub fn new(rules: Vec<PatternRule>, baseline: BaselineAssessment) -> Self {
        Self {
            rules,
            baseline,
        }
    }
}

impl RiskClassifier for PatternClassifier {
    fn classify(&self, tool: &str, args: &Value, context: &CallContext) -> RiskAssessment {
        let view = FieldView::new(args, context);
        for rule in &self.rules {
            if let Some(tools) = &rule.tools
                && !tools.iter().any(|name| name == tool || name == "*")
            {
                continue;
            }
            if compare(view.resolve(&rule.field), rule.operator, Some(&rule.value)) {
                return RiskAssessment::new(
                    rule.risk,
                    rule.confidence,
                    rule.reason.clone(),
                    rule.tags.clone(),
                );
            }
        }
        RiskAssessment::new(
            self.baseline.risk,
            self.baseline.confidence,
            self.baseline.reason.clone(),
            Vec::new(),
        )
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
