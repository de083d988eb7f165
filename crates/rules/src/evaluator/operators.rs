//! Operator semantics.
//!
//! Absent fields and explicit `null` are treated alike: only `neq`, `notIn`
//! and `notExists` hold for them. `gt`/`lt` coerce both operands to numbers
//! first and fall back to lexicographic comparison only when both are
//! non-numeric strings; any other mix is false.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::Value;
use sluice_core::Operator;

/// Apply `op` to a resolved field value and the condition operand.
pub fn check_condition(op: Operator, field: Option<&Value>, expected: &Value) -> bool {
    let field = field.filter(|v| !v.is_null());

    match op {
        Operator::Exists => field.is_some(),
        Operator::NotExists => field.is_none(),
        Operator::Neq => field.map_or(true, |v| !values_equal(v, expected)),
        Operator::NotIn => field.map_or(true, |v| !is_member(v, expected)),
        Operator::Eq => field.is_some_and(|v| values_equal(v, expected)),
        Operator::Contains => field.is_some_and(|v| contains(v, expected)),
        Operator::StartsWith => field.is_some_and(|v| as_text(v).starts_with(&as_text(expected))),
        Operator::EndsWith => field.is_some_and(|v| as_text(v).ends_with(&as_text(expected))),
        Operator::Gt => field.is_some_and(|v| compare(v, expected) == Some(Ordering::Greater)),
        Operator::Lt => field.is_some_and(|v| compare(v, expected) == Some(Ordering::Less)),
        Operator::Regex => field.is_some_and(|v| regex_matches(v, expected)),
        Operator::In => field.is_some_and(|v| is_member(v, expected)),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Scalar text form: strings verbatim, everything else as JSON.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Numbers compare numerically; a string against a scalar compares text forms.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_number(a) == as_number(b),
        (Value::String(_), Value::Number(_) | Value::Bool(_))
        | (Value::Number(_) | Value::Bool(_), Value::String(_)) => as_text(a) == as_text(b),
        _ => a == b,
    }
}

fn contains(value: &Value, needle: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::Object(map) => needle.as_str().is_some_and(|k| map.contains_key(k)),
        other => as_text(other).contains(&as_text(needle)),
    }
}

fn is_member(value: &Value, set: &Value) -> bool {
    match set {
        Value::Array(items) => items.iter().any(|item| values_equal(value, item)),
        _ => false,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn regex_matches(value: &Value, pattern: &Value) -> bool {
    let Some(pattern) = pattern.as_str() else {
        return false;
    };
    match Regex::new(pattern) {
        Ok(re) => re.is_match(&as_text(value)),
        Err(e) => {
            tracing::debug!(pattern, error = %e, "invalid regex in rule condition");
            false
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
