use serde_json::Value;

use crate::data::{is_blank, RuleKind};

/// Evaluate a single rule. Blank values pass everything except `Required`,
/// so optional fields only fail once something has been typed.
pub(crate) fn passes(kind: &RuleKind, value: &Value) -> bool {
    if is_blank(value) {
        return !matches!(kind, RuleKind::Required);
    }

    match kind {
        RuleKind::Required | RuleKind::Guide => true,
        RuleKind::MinLength { min } => length_of(value).map_or(true, |len| len >= *min),
        RuleKind::MaxLength { max } => length_of(value).map_or(true, |len| len <= *max),
        RuleKind::Range { min, max } => match as_number(value) {
            Some(n) => min.map_or(true, |min| n >= min) && max.map_or(true, |max| n <= max),
            None => false,
        },
        RuleKind::OneOf { values } => values.contains(value),
        RuleKind::Email => value.as_str().is_some_and(is_email),
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

// Number inputs hand over either JSON numbers or their text
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn is_email(candidate: &str) -> bool {
    let Some((local, domain)) = candidate.trim().split_once('@') else {
        return false;
    };

    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}
