//! Pure evaluation of step conditions against the execution context.

use serde_json::Value;

use crate::models::{ConditionKind, StepCondition};

/// Walk a dot-separated path through nested objects.
///
/// Numeric segments index into arrays. Returns `None` for a missing or null
/// intermediate.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
        if current.is_null() {
            return None;
        }
    }

    Some(current)
}

/// Evaluate `condition` against `context`. Never fails; anything that cannot
/// be evaluated is `false`.
pub fn evaluate(condition: &StepCondition, context: &Value) -> bool {
    let resolved = resolve_path(context, &condition.field);

    match condition.kind {
        ConditionKind::Exists => resolved.is_some(),
        ConditionKind::Equals => resolved.is_some_and(|actual| equals(actual, &condition.value)),
        ConditionKind::Contains => {
            resolved.is_some_and(|actual| contains(actual, &condition.value))
        }
        ConditionKind::GreaterThan => {
            compare(resolved, &condition.value).is_some_and(|(a, b)| a > b)
        }
        ConditionKind::LessThan => compare(resolved, &condition.value).is_some_and(|(a, b)| a < b),
    }
}

/// Structural equality, except that numbers compare by value (`87 == 87.0`).
fn equals(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => actual == expected,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        (Value::Array(items), _) => items.contains(expected),
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<(f64, f64)> {
    Some((as_number(actual?)?, as_number(expected)?))
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (!number.is_nan()).then_some(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> Value {
        json!({
            "trigger": {
                "severity": "critical",
                "score": 87,
                "riskScore": "42.5",
                "title": "Suspicious PowerShell execution",
                "tags": ["malware", "lateral-movement"],
                "indicators": [{"value": "10.0.0.5"}],
                "owner": null
            },
            "analysisActions": {"aiAnalysis": {"success": true}}
        })
    }

    fn cond(kind: ConditionKind, field: &str, value: Value) -> StepCondition {
        StepCondition::new(kind, field, value)
    }

    #[test]
    fn test_resolve_path() {
        let ctx = context();
        assert_eq!(resolve_path(&ctx, "trigger.score"), Some(&json!(87)));
        assert_eq!(
            resolve_path(&ctx, "trigger.indicators.0.value"),
            Some(&json!("10.0.0.5"))
        );
        assert!(resolve_path(&ctx, "trigger.owner").is_none());
        assert!(resolve_path(&ctx, "trigger.owner.name").is_none());
        assert!(resolve_path(&ctx, "trigger.missing.deep").is_none());
        assert!(resolve_path(&ctx, "trigger.tags.x").is_none());
        assert!(resolve_path(&ctx, "").is_none());
    }

    #[test]
    fn test_equals_is_strict() {
        let ctx = context();
        assert!(evaluate(
            &cond(ConditionKind::Equals, "trigger.severity", json!("critical")),
            &ctx
        ));
        assert!(evaluate(&cond(ConditionKind::Equals, "trigger.score", json!(87)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Equals, "trigger.score", json!("87")), &ctx));
        assert!(evaluate(&cond(ConditionKind::Equals, "trigger.score", json!(87.0)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Equals, "trigger.score", json!(87.5)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Equals, "trigger.riskScore", json!(42.5)), &ctx));
        assert!(evaluate(
            &cond(ConditionKind::Equals, "analysisActions.aiAnalysis.success", json!(true)),
            &ctx
        ));
    }

    #[test]
    fn test_contains_text_and_sequence() {
        let ctx = context();
        assert!(evaluate(
            &cond(ConditionKind::Contains, "trigger.title", json!("PowerShell")),
            &ctx
        ));
        assert!(evaluate(&cond(ConditionKind::Contains, "trigger.tags", json!("malware")), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Contains, "trigger.tags", json!("phishing")), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Contains, "trigger.score", json!(8)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Contains, "trigger.title", json!(1)), &ctx));
    }

    #[test]
    fn test_numeric_comparisons_coerce() {
        let ctx = context();
        assert!(evaluate(&cond(ConditionKind::GreaterThan, "trigger.score", json!(80)), &ctx));
        assert!(evaluate(&cond(ConditionKind::GreaterThan, "trigger.score", json!("80")), &ctx));
        assert!(evaluate(&cond(ConditionKind::LessThan, "trigger.riskScore", json!(50)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::LessThan, "trigger.score", json!(87)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::GreaterThan, "trigger.severity", json!(1)), &ctx));
        assert!(!evaluate(&cond(ConditionKind::GreaterThan, "trigger.score", json!("NaN")), &ctx));
    }

    #[test]
    fn test_exists() {
        let ctx = context();
        assert!(evaluate(&cond(ConditionKind::Exists, "trigger.severity", Value::Null), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Exists, "trigger.owner", Value::Null), &ctx));
        assert!(!evaluate(&cond(ConditionKind::Exists, "nothing.here", Value::Null), &ctx));
    }

    #[test]
    fn test_missing_field_is_false_for_every_kind() {
        let ctx = context();
        for kind in [
            ConditionKind::Equals,
            ConditionKind::Contains,
            ConditionKind::GreaterThan,
            ConditionKind::LessThan,
            ConditionKind::Exists,
        ] {
            assert!(!evaluate(&cond(kind, "trigger.absent", json!(1)), &ctx));
        }
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let ctx = context();
        let condition = cond(ConditionKind::GreaterThan, "trigger.score", json!(50));
        let first = evaluate(&condition, &ctx);
        let second = evaluate(&condition, &ctx);
        assert_eq!(first, second);
        assert_eq!(ctx, context());
    }
}
