//! Cross-type comparison and ordering rules for [`Value`] (spec.md
//! §4.6.4). Connectors hand back heterogeneous types (a CSV cell is
//! always a string or a regex-coerced number; a Postgres column is
//! whatever its declared type is) so `WHERE`/join-key/`ORDER BY`
//! comparisons need a coercion table rather than relying on `PartialEq`.

use std::cmp::Ordering;

use crate::ast::CompareOp;
use crate::row::Value;

/// Evaluate a binary comparison after coercing both sides onto a common
/// representation. A comparison touching `Null` is always `false`
/// (three-valued SQL logic collapsed to boolean, since this engine's
/// `WHERE`/join predicates only ever need to know "does this row match").
pub fn compare(op: CompareOp, a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    match ordering(a, b) {
        Some(ord) => match op {
            CompareOp::Equals => ord == Ordering::Equal,
            CompareOp::NotEquals => ord != Ordering::Equal,
            CompareOp::Less => ord == Ordering::Less,
            CompareOp::LessEquals => ord != Ordering::Greater,
            CompareOp::Greater => ord == Ordering::Greater,
            CompareOp::GreaterEquals => ord != Ordering::Less,
        },
        None => false,
    }
}

/// Order two non-null values for comparison/sorting. Numeric types
/// compare numerically; a string is parsed as a number when the other
/// side is numeric; otherwise (including any `Bool` operand) both sides
/// are stringified and compared lexically, matching the "stringify both
/// sides" behavior this engine preserves for boolean/string/number
/// mixes (see DESIGN.md).
fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => {
            if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
                return x.partial_cmp(&y);
            }
            Some(stringify(a).cmp(&stringify(b)))
        }
    }
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Str(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Str(s) => s.clone(),
    }
}

/// Total ordering used by `ORDER BY`: `Null` sorts last ascending, first
/// descending (spec.md §4.6.4: nil is greater than any non-nil value in
/// both directions), so it never silently disappears from a sorted result.
pub fn sort_key(a: &Value, b: &Value, ascending: bool) -> Ordering {
    let ord = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => ordering(a, b).unwrap_or(Ordering::Equal),
    };
    if ascending { ord } else { ord.reverse() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_string_and_int_coerce_for_comparison() {
        assert!(compare(CompareOp::Equals, &Value::Str("3".into()), &Value::Int(3)));
        assert!(compare(CompareOp::Less, &Value::Int(2), &Value::Float(2.5)));
    }

    #[test]
    fn bool_and_string_fall_back_to_stringify() {
        assert!(compare(CompareOp::Equals, &Value::Bool(true), &Value::Str("true".into())));
        assert!(!compare(CompareOp::Equals, &Value::Bool(false), &Value::Str("true".into())));
    }

    #[test]
    fn null_never_matches() {
        assert!(!compare(CompareOp::Equals, &Value::Null, &Value::Null));
        assert!(!compare(CompareOp::NotEquals, &Value::Null, &Value::Int(1)));
    }

    #[test]
    fn null_sorts_last_ascending_first_descending() {
        assert_eq!(sort_key(&Value::Null, &Value::Int(1), true), Ordering::Greater);
        assert_eq!(sort_key(&Value::Null, &Value::Int(1), false), Ordering::Less);
    }
}
