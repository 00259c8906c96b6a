//! Edge predicates.

use std::{str::FromStr, sync::LazyLock};

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    model::{ConditionClause, EdgeModel, Logic},
    workflow::template::{self, TemplateScope},
};

/// Leading float literal, the way a lenient float parse reads `"12px"` as 12.
static FLOAT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[+-]?(?:inf(?:inity)?|(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)").expect("valid float pattern"));

/// Named predicate of an edge condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ConditionKind {
    IsEmpty,
    IsNotEmpty,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
}

/// Evaluate whether `edge` may be traversed under `scope`.
///
/// Edges without a predicate are unconditional. When `conditions` is present
/// its clauses are folded left to right and the single form is ignored.
pub fn evaluate(
    edge: &EdgeModel,
    scope: &TemplateScope<'_>,
) -> bool {
    let Some((first, rest)) = edge.conditions.split_first() else {
        return evaluate_clause(&edge.clause(), scope);
    };

    let mut result = evaluate_clause(first, scope);
    for clause in rest {
        let next = evaluate_clause(clause, scope);
        result = match clause.logic {
            Logic::Or => result || next,
            Logic::And => result && next,
        };
    }
    result
}

/// Evaluate one `if <condition> value` clause.
pub fn evaluate_clause(
    clause: &ConditionClause,
    scope: &TemplateScope<'_>,
) -> bool {
    let (Some(expr), Some(condition)) = (clause.if_expr.as_deref(), clause.condition.as_deref()) else {
        return true;
    };
    if expr.is_empty() || condition.is_empty() {
        return true;
    }

    let actual = normalize(template::resolve_template(scope, expr));
    let expected = normalize(match &clause.value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => template::resolve_template(scope, s),
        Some(other) => template::resolve_template(scope, &other.to_string()),
    });

    debug!(actual = ?actual, condition, expected = ?expected, "evaluating edge condition");

    let Ok(kind) = ConditionKind::from_str(condition) else {
        warn!(condition, "unknown edge condition");
        return false;
    };
    apply(kind, actual.as_deref(), expected.as_deref())
}

/// The literals `null` and `undefined` stand for an empty value.
fn normalize(s: String) -> Option<String> {
    match s.as_str() {
        "null" | "undefined" => None,
        _ => Some(s),
    }
}

/// Apply a predicate to already-resolved operands.
pub fn apply(
    kind: ConditionKind,
    actual: Option<&str>,
    expected: Option<&str>,
) -> bool {
    match kind {
        ConditionKind::IsEmpty => actual.is_none_or(str::is_empty),
        ConditionKind::IsNotEmpty => actual.is_some_and(|s| !s.is_empty()),
        ConditionKind::Equals => loose_eq(actual, expected),
        ConditionKind::NotEquals => !loose_eq(actual, expected),
        ConditionKind::GreaterThan => numeric(actual, expected, |a, b| a > b),
        ConditionKind::LessThan => numeric(actual, expected, |a, b| a < b),
        ConditionKind::GreaterThanOrEqual => numeric(actual, expected, |a, b| a >= b),
        ConditionKind::LessThanOrEqual => numeric(actual, expected, |a, b| a <= b),
        ConditionKind::Contains => as_text(actual).contains(as_text(expected)),
        ConditionKind::NotContains => !as_text(actual).contains(as_text(expected)),
    }
}

fn as_text(s: Option<&str>) -> &str {
    s.unwrap_or("null")
}

/// Numbers compare by value, everything else by text.
fn loose_eq(
    actual: Option<&str>,
    expected: Option<&str>,
) -> bool {
    match (actual, expected) {
        (None, None) => true,
        (Some(a), Some(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x == y,
            _ => a == b,
        },
        _ => false,
    }
}

fn numeric(
    actual: Option<&str>,
    expected: Option<&str>,
    cmp: impl Fn(f64, f64) -> bool,
) -> bool {
    match (actual.and_then(parse_float), expected.and_then(parse_float)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// Lenient float parse: leading whitespace skipped, trailing garbage ignored.
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let m = FLOAT_PREFIX.find(s)?;
    let text = m.as_str();
    let lowered = text.to_ascii_lowercase();
    if lowered.ends_with("inf") || lowered.ends_with("infinity") {
        return Some(if text.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY });
    }
    text.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn with_scope<R>(f: impl FnOnce(&TemplateScope<'_>) -> R) -> R {
        let trigger = json!({"a": "5", "empty": "", "n": 10, "text": "hello world"});
        let mut outputs = HashMap::new();
        outputs.insert("n1".to_string(), json!({"status": "ok", "count": 3}));
        let mut names = HashMap::new();
        names.insert("check".to_string(), "n1".to_string());
        let scope = TemplateScope {
            trigger: &trigger,
            outputs: &outputs,
            names: &names,
            nested: false,
        };
        f(&scope)
    }

    fn edge(
        expr: &str,
        condition: &str,
        value: Value,
    ) -> EdgeModel {
        let mut e = EdgeModel::new("e", "a", "b");
        e.if_expr = Some(expr.to_string());
        e.condition = Some(condition.to_string());
        e.value = Some(value);
        e
    }

    #[test]
    fn test_unconditional_edge() {
        with_scope(|scope| {
            assert!(evaluate(&EdgeModel::new("e", "a", "b"), scope));
            let mut e = EdgeModel::new("e", "a", "b");
            e.if_expr = Some("{{trigger.a}}".to_string());
            assert!(evaluate(&e, scope));
        });
    }

    #[test]
    fn test_equals_numeric_string() {
        with_scope(|scope| {
            assert!(evaluate(&edge("{{trigger.a}}", "equals", json!("5")), scope));
            assert!(evaluate(&edge("{{trigger.a}}", "equals", json!(5)), scope));
            assert!(evaluate(&edge("{{trigger.n}}", "equals", json!("10.0")), scope));
            assert!(evaluate(&edge("{{check.status}}", "not_equals", json!("failed")), scope));
        });
    }

    #[test]
    fn test_is_empty() {
        with_scope(|scope| {
            assert!(evaluate(&edge("{{trigger.empty}}", "is_empty", Value::Null), scope));
            assert!(evaluate(&edge("{{trigger.missing}}", "is_empty", Value::Null), scope));
            assert!(evaluate(&edge("{{check.status}}", "is_not_empty", Value::Null), scope));
            assert!(!evaluate(&edge("{{ghost.x}}", "is_not_empty", Value::Null), scope));
        });
    }

    #[test]
    fn test_numeric_not_lexical() {
        assert!(apply(ConditionKind::GreaterThan, Some("10"), Some("2")));
        assert!(!apply(ConditionKind::LessThan, Some("10"), Some("2")));
        assert!(apply(ConditionKind::GreaterThanOrEqual, Some("2"), Some("2.0")));
        assert!(apply(ConditionKind::LessThanOrEqual, Some("12px"), Some("12")));
        assert!(!apply(ConditionKind::GreaterThan, Some("abc"), Some("1")));
        assert!(!apply(ConditionKind::GreaterThan, None, Some("1")));
    }

    #[test]
    fn test_contains() {
        with_scope(|scope| {
            assert!(evaluate(&edge("{{trigger.text}}", "contains", json!("world")), scope));
            assert!(evaluate(&edge("{{trigger.text}}", "not_contains", json!("mars")), scope));
        });
        assert!(apply(ConditionKind::Contains, None, Some("nu")));
    }

    #[test]
    fn test_unknown_condition_is_false() {
        with_scope(|scope| {
            assert!(!evaluate(&edge("{{trigger.a}}", "matches_regex", json!("5")), scope));
        });
    }

    #[test]
    fn test_compound_conditions() {
        with_scope(|scope| {
            let mut e = EdgeModel::new("e", "a", "b");
            e.conditions = vec![
                ConditionClause {
                    if_expr: Some("{{check.count}}".to_string()),
                    condition: Some("greater_than".to_string()),
                    value: Some(json!("5")),
                    logic: Logic::And,
                },
                ConditionClause {
                    if_expr: Some("{{check.status}}".to_string()),
                    condition: Some("equals".to_string()),
                    value: Some(json!("ok")),
                    logic: Logic::Or,
                },
            ];
            assert!(evaluate(&e, scope));

            e.conditions[1].logic = Logic::And;
            assert!(!evaluate(&e, scope));
        });
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("  3.5abc"), Some(3.5));
        assert_eq!(parse_float("-2e2"), Some(-200.0));
        assert_eq!(parse_float(".5"), Some(0.5));
        assert_eq!(parse_float("Infinity"), Some(f64::INFINITY));
        assert_eq!(parse_float("x1"), None);
    }
}
