// chimera-core/src/policy/matcher.rs
// ============================================================================
// Module: Chimera Match Operators
// Description: Closed operator set for policy match leaves.
// Purpose: Deterministic field comparison over call arguments and context.
// Dependencies: regex, serde, serde_json
// ============================================================================

//! ## Overview
//! Match leaves compare a dotted-path field against a literal value (or a
//! value resolved from context) using a closed set of ten operators. Missing
//! fields compare false except under `neq` and `not_in`, which treat absence
//! as inequality; that rule is what lets cross-tenant policies fire when the
//! comparator key is absent from the context. Numeric operators coerce
//! numeric strings so envelope fields survive JSON stringification.

// ============================================================================
// SECTION: Imports
// ============================================================================

use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Operators
// ============================================================================

/// Operators accepted in policy match leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOperator {
    /// Equality.
    Eq,
    /// Inequality; true when the field is missing.
    Neq,
    /// Numeric greater-than.
    Gt,
    /// Numeric greater-than-or-equal.
    Gte,
    /// Numeric less-than.
    Lt,
    /// Numeric less-than-or-equal.
    Lte,
    /// Substring or element containment.
    Contains,
    /// Regular-expression search (anchored only if the pattern anchors).
    Regex,
    /// Membership in a literal set.
    In,
    /// Non-membership; true when the field is missing.
    NotIn,
}

impl MatchOperator {
    /// Returns the manifest spelling of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::Regex => "regex",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }
}

// ============================================================================
// SECTION: Comparison
// ============================================================================

/// Evaluates `lhs <operator> rhs`, where `lhs` is the resolved field.
#[must_use]
pub fn compare(lhs: Option<&Value>, operator: MatchOperator, rhs: Option<&Value>) -> bool {
    let Some(lhs) = lhs else {
        // Absence is inequality / non-membership; every other operator fails.
        return matches!(operator, MatchOperator::Neq | MatchOperator::NotIn);
    };
    let Some(rhs) = rhs else {
        return false;
    };

    match operator {
        MatchOperator::Eq => values_equal(lhs, rhs),
        MatchOperator::Neq => !values_equal(lhs, rhs),
        MatchOperator::Gt => numeric_cmp(lhs, rhs).is_some_and(|ord| ord.is_gt()),
        MatchOperator::Gte => numeric_cmp(lhs, rhs).is_some_and(|ord| ord.is_ge()),
        MatchOperator::Lt => numeric_cmp(lhs, rhs).is_some_and(|ord| ord.is_lt()),
        MatchOperator::Lte => numeric_cmp(lhs, rhs).is_some_and(|ord| ord.is_le()),
        MatchOperator::Contains => compare_contains(lhs, rhs),
        MatchOperator::Regex => compare_regex(lhs, rhs),
        MatchOperator::In => set_contains(rhs, lhs),
        MatchOperator::NotIn => !set_contains(rhs, lhs),
    }
}

/// Equality with numeric normalization across integer/float encodings.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if let (Some(left), Some(right)) = (lhs.as_f64(), rhs.as_f64()) {
        return (left - right).abs() < f64::EPSILON;
    }
    lhs == rhs
}

/// Numeric ordering with string coercion.
fn numeric_cmp(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    let left = as_number(lhs)?;
    let right = as_number(rhs)?;
    left.partial_cmp(&right)
}

/// Extracts a number, coercing numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Containment: substring for strings, element for arrays, stringified
/// substring otherwise.
fn compare_contains(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle),
        (Value::Array(items), needle) => items.contains(needle),
        (haystack, needle) => value_to_text(haystack).contains(&value_to_text(needle)),
    }
}

/// Regex search over the stringified field.
fn compare_regex(lhs: &Value, rhs: &Value) -> bool {
    let Value::String(pattern) = rhs else {
        return false;
    };
    let Ok(regex) = Regex::new(pattern) else {
        return false;
    };
    regex.is_match(&value_to_text(lhs))
}

/// Membership of `needle` in the literal set `set`.
fn set_contains(set: &Value, needle: &Value) -> bool {
    match set {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(text) => needle.as_str().is_some_and(|needle| text.contains(needle)),
        _ => false,
    }
}

/// Stringifies a value the way the manifest authors expect: bare strings stay
/// unquoted, everything else serializes as JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
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
        reason = "Test-only assertions."
    )]

    use serde_json::json;

    use super::compare;
    use super::MatchOperator;

    #[test]
    fn neq_is_true_for_missing_field() {
        assert!(compare(None, MatchOperator::Neq, Some(&json!("tenant-a"))));
        assert!(compare(None, MatchOperator::NotIn, Some(&json!(["a", "b"]))));
        assert!(!compare(None, MatchOperator::Eq, Some(&json!("tenant-a"))));
        assert!(!compare(None, MatchOperator::Gte, Some(&json!(1))));
    }

    #[test]
    fn numeric_operators_coerce_strings() {
        assert!(compare(Some(&json!("1.5")), MatchOperator::Gte, Some(&json!(1.5))));
        assert!(compare(Some(&json!(2)), MatchOperator::Gt, Some(&json!("1"))));
        assert!(!compare(Some(&json!("abc")), MatchOperator::Gt, Some(&json!(1))));
    }

    #[test]
    fn gte_holds_at_exact_boundary() {
        assert!(compare(Some(&json!(1.5)), MatchOperator::Gte, Some(&json!(1.5))));
        assert!(!compare(Some(&json!(1.5)), MatchOperator::Gt, Some(&json!(1.5))));
    }

    #[test]
    fn contains_covers_strings_and_arrays() {
        assert!(compare(
            Some(&json!("/data/private/_CONF_formula.json")),
            MatchOperator::Contains,
            Some(&json!("_CONF_"))
        ));
        assert!(compare(Some(&json!(["read", "write"])), MatchOperator::Contains, Some(&json!("read"))));
        assert!(!compare(Some(&json!("abc")), MatchOperator::Contains, Some(&json!("xyz"))));
    }

    #[test]
    fn regex_is_unanchored_by_default() {
        assert!(compare(
            Some(&json!("/shared/candidate_resume_j_doe.txt")),
            MatchOperator::Regex,
            Some(&json!("resume"))
        ));
        assert!(!compare(
            Some(&json!("/shared/notes.txt")),
            MatchOperator::Regex,
            Some(&json!("^notes"))
        ));
    }

    #[test]
    fn in_and_not_in_use_set_membership() {
        let set = json!(["hr_manager", "external"]);
        assert!(compare(Some(&json!("external")), MatchOperator::In, Some(&set)));
        assert!(compare(Some(&json!("auditor")), MatchOperator::NotIn, Some(&set)));
    }
}
