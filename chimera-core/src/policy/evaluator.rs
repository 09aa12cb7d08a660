// chimera-core/src/policy/evaluator.rs
// ============================================================================
// Module: Chimera Policy Evaluator
// Description: Phase-ordered, first-match-wins routing evaluation.
// Purpose: Turn a context snapshot plus risk state into a routing decision.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! The evaluator walks the manifest's phases in declared order and returns on
//! the first phase that produces an action. It is a pure function of its
//! snapshot: no I/O, no clock reads, no session mutation. Evaluating the same
//! snapshot twice yields the same decision.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::context::CallContext;
use crate::context::FieldView;
use crate::policy::manifest::Condition;
use crate::policy::manifest::MatchNode;
use crate::policy::manifest::PhaseName;
use crate::policy::manifest::PolicyManifest;
use crate::policy::manifest::Rule;
use crate::policy::manifest::ThresholdClause;
use crate::policy::manifest::ThresholdField;
use crate::policy::manifest::ThresholdOperator;
use crate::policy::matcher::compare;
use crate::risk::RiskAssessment;
use crate::route::Route;

// ============================================================================
// SECTION: Decision
// ============================================================================

/// Routing decision emitted by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Selected data plane.
    pub route: Route,
    /// Human-readable reason recorded in the ledger.
    pub reason: String,
    /// Rule, directive, or phase identifier that produced the decision.
    pub rule_id: String,
}

/// Rule id recorded when the terminal default action applies.
pub const DEFAULT_RULE_ID: &str = "default";

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Deterministic policy evaluator over a validated manifest.
#[derive(Debug)]
pub struct PolicyEvaluator {
    /// Immutable manifest snapshot.
    manifest: PolicyManifest,
}

impl PolicyEvaluator {
    /// Wraps a validated manifest.
    #[must_use]
    pub fn new(manifest: PolicyManifest) -> Self {
        Self {
            manifest,
        }
    }

    /// Returns the manifest's terminal default action.
    #[must_use]
    pub fn default_action(&self) -> Route {
        self.manifest.default_action
    }

    /// Evaluates the manifest phases against one call snapshot.
    #[must_use]
    pub fn evaluate(
        &self,
        tool: &str,
        args: &Value,
        context: &CallContext,
        assessment: &RiskAssessment,
    ) -> Decision {
        let view = FieldView::new(args, context);
        for phase in self.manifest.phases() {
            let decision = match phase {
                PhaseName::Directives => self.evaluate_directives(context),
                PhaseName::TrustedWorkflows => {
                    evaluate_rules(&self.manifest.trusted_workflows, tool, &view)
                }
                PhaseName::SecurityPolicies => {
                    evaluate_rules(&self.manifest.security_policies, tool, &view)
                }
                PhaseName::AccumulatedRisk => evaluate_threshold(
                    self.manifest.accumulated_risk.as_ref(),
                    context.accumulated_risk,
                    assessment.confidence,
                ),
                PhaseName::EventRisk => evaluate_threshold(
                    self.manifest.event_risk.as_ref(),
                    assessment.risk,
                    assessment.confidence,
                ),
            };
            if let Some(decision) = decision {
                return decision;
            }
        }
        Decision {
            route: self.manifest.default_action,
            reason: "no phase produced an action".to_string(),
            rule_id: DEFAULT_RULE_ID.to_string(),
        }
    }

    /// Directive lookup: user id first, then role.
    fn evaluate_directives(&self, context: &CallContext) -> Option<Decision> {
        if let Some(user_id) = &context.user_id
            && let Some(directive) = self.manifest.directives.users.get(user_id)
        {
            return Some(Decision {
                route: directive.action,
                reason: directive.reason.clone(),
                rule_id: format!("directive:user:{user_id}"),
            });
        }
        if let Some(user_role) = &context.user_role
            && let Some(directive) = self.manifest.directives.roles.get(user_role)
        {
            return Some(Decision {
                route: directive.action,
                reason: directive.reason.clone(),
                rule_id: format!("directive:role:{user_role}"),
            });
        }
        None
    }
}

// ============================================================================
// SECTION: Phase Evaluation
// ============================================================================

/// Evaluates a rule list in declared order; first match wins.
fn evaluate_rules(rules: &[Rule], tool: &str, view: &FieldView) -> Option<Decision> {
    for rule in rules {
        if !rule.applies_to(tool) {
            continue;
        }
        let matched = match &rule.matcher {
            None => true,
            Some(node) => evaluate_node(node, view),
        };
        if matched {
            return Some(Decision {
                route: rule.action,
                reason: rule.reason.clone(),
                rule_id: rule.id.clone(),
            });
        }
    }
    None
}

/// Evaluates a threshold clause against the selected risk value.
fn evaluate_threshold(
    clause: Option<&ThresholdClause>,
    value: f64,
    confidence: f64,
) -> Option<Decision> {
    let clause = clause?;
    if let Some(floor) = clause.confidence_floor
        && confidence < floor
    {
        return None;
    }
    let fired = match clause.operator {
        ThresholdOperator::Gte => value >= clause.threshold,
        ThresholdOperator::Gt => value > clause.threshold,
    };
    if !fired {
        return None;
    }
    Some(Decision {
        route: clause.action,
        reason: clause.reason.clone(),
        rule_id: match clause.field {
            ThresholdField::AccumulatedRisk => "threshold:accumulated_risk".to_string(),
            ThresholdField::EventRisk => "threshold:event_risk".to_string(),
        },
    })
}

/// Recursively evaluates a match tree.
fn evaluate_node(node: &MatchNode, view: &FieldView) -> bool {
    match node {
        MatchNode::All { all } => all.iter().all(|child| evaluate_node(child, view)),
        MatchNode::Any { any } => any.iter().any(|child| evaluate_node(child, view)),
        MatchNode::Not { not } => !evaluate_node(not, view),
        MatchNode::Leaf(condition) => evaluate_leaf(condition, view),
    }
}

/// Evaluates one leaf condition.
fn evaluate_leaf(condition: &Condition, view: &FieldView) -> bool {
    let lhs = view.resolve(&condition.field);
    let resolved;
    let rhs = if let Some(path) = &condition.value_from_context {
        resolved = view.resolve(&format!("context.{path}")).cloned();
        resolved.as_ref()
    } else {
        condition.value.as_ref()
    };
    compare(lhs, condition.operator, rhs)
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
    use serde_json::Value;

    use super::PolicyEvaluator;
    use crate::context::CallContext;
    use crate::context::ContextDefaults;
    use crate::context::ContextEnvelope;
    use crate::policy::manifest::PolicyManifest;
    use crate::risk::RiskAssessment;
    use crate::route::Route;

    fn manifest() -> PolicyManifest {
        let manifest: PolicyManifest = serde_json::from_value(json!({
            "default_action": "production",
            "directives": {
                "users": {
                    "mallory": {"action": "shadow", "reason": "containment order"}
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

    fn context(user_id: &str, role: &str, source: &str) -> CallContext {
        let envelope = ContextEnvelope::from_value(Some(&json!({
            "user_id": user_id,
            "user_role": role,
            "source": source,
        })));
        CallContext::assemble(&ContextDefaults::default(), envelope, "s-1".to_string())
    }

    fn assessment(risk: f64, confidence: f64) -> RiskAssessment {
        RiskAssessment {
            risk,
            confidence,
            reason: "test".to_string(),
            tags: Vec::new(),
        }
    }

    fn args() -> Value {
        json!({"filename": "/data/private/_CONF_chimera_formula.json"})
    }

    #[test]
    fn trusted_workflow_beats_event_risk() {
        let evaluator = PolicyEvaluator::new(manifest());
        let context = context("dr_chen", "lead_researcher", "lab_workstation");
        let decision = evaluator.evaluate("read_file", &args(), &context, &assessment(0.95, 1.0));
        assert_eq!(decision.route, Route::Production);
        assert_eq!(decision.rule_id, "dr-chen-production");
    }

    #[test]
    fn directive_lookup_wins_over_everything() {
        let evaluator = PolicyEvaluator::new(manifest());
        let context = context("mallory", "lead_researcher", "lab_workstation");
        let decision = evaluator.evaluate("read_file", &args(), &context, &assessment(0.0, 1.0));
        assert_eq!(decision.route, Route::Shadow);
        assert_eq!(decision.rule_id, "directive:user:mallory");
    }

    #[test]
    fn taint_plus_sensitive_tool_routes_to_shadow() {
        let evaluator = PolicyEvaluator::new(manifest());
        let mut context = context("hr_user", "hr_manager", "internal");
        context.is_tainted = true;
        context.taint_source = Some("/shared/candidate_resume_j_doe.txt".to_string());
        context.tool_category = Some("sensitive".to_string());
        let decision = evaluator.evaluate(
            "get_patient_record",
            &json!({"patient_id": 100}),
            &context,
            &assessment(0.3, 1.0),
        );
        assert_eq!(decision.route, Route::Shadow);
        assert_eq!(decision.rule_id, "taint-lockdown");
    }

    #[test]
    fn accumulated_threshold_uses_gte_boundary() {
        let evaluator = PolicyEvaluator::new(manifest());
        let mut context = context("alice", "analyst", "internal");
        context.accumulated_risk = 1.5;
        let decision = evaluator.evaluate("read_file", &json!({}), &context, &assessment(0.1, 1.0));
        assert_eq!(decision.route, Route::Shadow);
        assert_eq!(decision.rule_id, "threshold:accumulated_risk");

        context.accumulated_risk = 1.499_999;
        let decision = evaluator.evaluate("read_file", &json!({}), &context, &assessment(0.1, 1.0));
        assert_eq!(decision.route, Route::Production);
    }

    #[test]
    fn confidence_floor_suppresses_event_threshold() {
        let evaluator = PolicyEvaluator::new(manifest());
        let context = context("alice", "analyst", "internal");
        let decision = evaluator.evaluate("read_file", &json!({}), &context, &assessment(0.9, 0.2));
        assert_eq!(decision.route, Route::Production);
        assert_eq!(decision.rule_id, "default");

        let decision = evaluator.evaluate("read_file", &json!({}), &context, &assessment(0.9, 0.6));
        assert_eq!(decision.route, Route::Shadow);
        assert_eq!(decision.rule_id, "threshold:event_risk");
    }

    #[test]
    fn first_declared_rule_wins_within_a_phase() {
        let manifest: PolicyManifest = serde_json::from_value(json!({
            "default_action": "production",
            "security_policies": [
                {
                    "id": "narrow-allow",
                    "action": "production",
                    "reason": "carve-out",
                    "match": {"field": "context.user_role", "value": "auditor"}
                },
                {
                    "id": "broad-block",
                    "action": "shadow",
                    "reason": "catch-all",
                    "match": {"field": "context.user_role", "operator": "neq", "value": ""}
                }
            ]
        }))
        .expect("manifest parses");
        manifest.validate().expect("valid");
        let evaluator = PolicyEvaluator::new(manifest);
        // Both rules match an auditor; the earlier production rule must win
        // even though a later shadow rule also matches.
        let context = context("a1", "auditor", "internal");
        let decision = evaluator.evaluate("read_file", &json!({}), &context, &assessment(0.0, 1.0));
        assert_eq!(decision.route, Route::Production);
        assert_eq!(decision.rule_id, "narrow-allow");
    }

    #[test]
    fn evaluation_is_deterministic_for_identical_snapshots() {
        let evaluator = PolicyEvaluator::new(manifest());
        let context = context("bob", "external", "unknown");
        let first = evaluator.evaluate("read_file", &args(), &context, &assessment(0.4, 1.0));
        let second = evaluator.evaluate("read_file", &args(), &context, &assessment(0.4, 1.0));
        assert_eq!(first, second);
    }
}
