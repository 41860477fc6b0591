//! `GROUP BY` + aggregate function evaluation (spec.md §4.6.7).
//!
//! Runs only when the plan carries at least one aggregate [`FuncCall`]
//! (enforced by the planner's `validate_group_by` stage). Grouping key
//! equality uses each value's display form rather than [`Value`]
//! equality directly, since `Value` doesn't implement `Hash` (a `Float`
//! key would need a bit-pattern `Hash` impl used nowhere else in the row
//! model, so this avoids adding one for a single call site).

use std::collections::HashMap;

use crate::ast::{AttrRef, FieldExpr, FuncName, FuncParam};
use crate::engine::coerce::sort_key;
use crate::error::{EngineError, EngineResult};
use crate::planner::FunctionPlan;
use crate::row::{ColumnDescriptor, ColumnIndex, Row, Value};

fn group_key_repr(v: &Value) -> String {
    match v {
        Value::Null => "\u{0}null".to_string(),
        Value::Bool(b) => format!("b:{b}"),
        Value::Int(i) => format!("n:{i}"),
        Value::Float(f) => format!("n:{f}"),
        Value::Str(s) => format!("s:{s}"),
    }
}

pub(crate) fn resolve_attr(columns: &ColumnIndex, attr: &AttrRef, select_fields: &[FieldExpr]) -> Option<usize> {
    match attr {
        AttrRef::Field(fr) => columns.find_ignore_alias(&fr.src, &fr.field),
        AttrRef::Alias(alias) => {
            if let Some(idx) = columns.find_by_output_alias(alias) {
                return Some(idx);
            }
            select_fields.iter().find_map(|f| match f {
                FieldExpr::Field { src, field, alias: Some(a) } if a == alias => {
                    columns.find_ignore_alias(src, field)
                }
                _ => None,
            })
        }
    }
}

fn field_index(columns: &ColumnIndex, src: &str, field: &str) -> EngineResult<usize> {
    columns
        .find_ignore_alias(src, field)
        .ok_or_else(|| EngineError::function(format!("unknown field '{src}.{field}' in function argument")))
}

fn numeric(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Str(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn evaluate_aggregate(call: &crate::ast::FuncCall, columns: &ColumnIndex, group: &[&Row]) -> EngineResult<Value> {
    match call.name {
        FuncName::Count => {
            let param = call.params.iter().find(|p| !matches!(p, FuncParam::AtomLiteral(_)));
            let distinct = call.params.iter().any(|p| matches!(p, FuncParam::AtomLiteral(crate::ast::AtomLiteral::Distinct)));

            match param {
                None | Some(FuncParam::Star { .. }) if !distinct => {
                    Ok(Value::Int(group.iter().filter(|row| row.iter().any(|v| !v.is_null())).count() as i64))
                }
                Some(FuncParam::Star { src }) => {
                    // DISTINCT * dedupes on the pre-join source row identity for
                    // `src` when join bookkeeping is present, else the whole row.
                    let dedup_idx = columns.find_by_origin_and_name(&crate::row::ColumnOrigin::Internal, "lhs_index");
                    let mut seen = std::collections::HashSet::new();
                    let _ = src;
                    for row in group {
                        let key = dedup_idx
                            .map(|i| group_key_repr(&row[i]))
                            .unwrap_or_else(|| row.iter().map(group_key_repr).collect::<Vec<_>>().join("|"));
                        seen.insert(key);
                    }
                    Ok(Value::Int(seen.len() as i64))
                }
                Some(FuncParam::Field { src, field }) => {
                    let idx = field_index(columns, src, field)?;
                    if distinct {
                        let mut seen = std::collections::HashSet::new();
                        for row in group {
                            if !row[idx].is_null() {
                                seen.insert(group_key_repr(&row[idx]));
                            }
                        }
                        Ok(Value::Int(seen.len() as i64))
                    } else {
                        Ok(Value::Int(group.iter().filter(|row| !row[idx].is_null()).count() as i64))
                    }
                }
                _ => Err(EngineError::function("COUNT requires a field, *, or DISTINCT argument")),
            }
        }
        FuncName::Min | FuncName::Max => {
            let (src, field) = match call.params.first() {
                Some(FuncParam::Field { src, field }) => (src, field),
                _ => return Err(EngineError::function(format!("{} requires a field argument", call.name.as_str()))),
            };
            let idx = field_index(columns, src, field)?;
            let mut best: Option<&Value> = None;
            for row in group {
                let v = &row[idx];
                if v.is_null() {
                    continue;
                }
                best = Some(match best {
                    None => v,
                    Some(current) => {
                        let ord = sort_key(v, current, true);
                        match (call.name, ord) {
                            (FuncName::Min, std::cmp::Ordering::Less) => v,
                            (FuncName::Max, std::cmp::Ordering::Greater) => v,
                            _ => current,
                        }
                    }
                });
            }
            Ok(best.cloned().unwrap_or(Value::Null))
        }
        FuncName::Sum | FuncName::Avg => {
            let (src, field) = match call.params.first() {
                Some(FuncParam::Field { src, field }) => (src, field),
                _ => return Err(EngineError::function(format!("{} requires a field argument", call.name.as_str()))),
            };
            let idx = field_index(columns, src, field)?;
            let values = group
                .iter()
                .map(|row| &row[idx])
                .filter(|v| !v.is_null())
                .map(|v| numeric(v).ok_or_else(|| EngineError::function("Invalid values for sum/avg")))
                .collect::<EngineResult<Vec<f64>>>()?;
            match call.name {
                FuncName::Sum => Ok(if values.is_empty() {
                    Value::Null
                } else {
                    Value::Float(values.iter().sum())
                }),
                FuncName::Avg => Ok(if values.is_empty() {
                    Value::Null
                } else {
                    Value::Float(values.iter().sum::<f64>() / values.len() as f64)
                }),
                _ => unreachable!(),
            }
        }
        FuncName::Concat | FuncName::ConcatWs | FuncName::Lower | FuncName::Upper => {
            Err(EngineError::function(format!("{} is not an aggregate function", call.name.as_str())))
        }
    }
}

pub fn execute_group_by(
    columns: &ColumnIndex,
    rows: &[Row],
    group_by: Option<&AttrRef>,
    select_fields: &[FieldExpr],
    functions: &[FunctionPlan],
) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let group_idx = group_by.and_then(|attr| resolve_attr(columns, attr, select_fields));

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key = match group_idx {
            Some(idx) => group_key_repr(&row[idx]),
            None => String::new(),
        };
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }
    if rows.is_empty() {
        // A bare aggregate with no GROUP BY still produces one row over
        // the empty set (e.g. `COUNT(*)` => 0).
        order.push(String::new());
        groups.insert(String::new(), Vec::new());
    }

    let mut out_columns = ColumnIndex::default();
    for field in select_fields {
        match field {
            FieldExpr::Field { src, field, alias } => {
                out_columns.push(ColumnDescriptor::source(src.clone(), field.clone(), alias.clone()));
            }
            FieldExpr::Func(call) => {
                out_columns.push(ColumnDescriptor::func(call.ident.clone(), call.alias.clone()));
            }
            FieldExpr::Star { .. } => {
                return Err(EngineError::validation("'*' cannot appear alongside GROUP BY"));
            }
        }
    }

    let mut out_rows = Vec::with_capacity(order.len());
    for key in &order {
        let group = &groups[key];
        let mut out_row = Vec::with_capacity(select_fields.len());
        for field in select_fields {
            match field {
                FieldExpr::Field { src, field, .. } => {
                    let idx = field_index(columns, src, field)?;
                    out_row.push(group.first().map(|r| r[idx].clone()).unwrap_or(Value::Null));
                }
                FieldExpr::Func(call) => {
                    let plan = functions.iter().find(|f| f.call.ident == call.ident);
                    let call = plan.map(|p| &p.call).unwrap_or(call);
                    out_row.push(evaluate_aggregate(call, columns, group)?);
                }
                FieldExpr::Star { .. } => unreachable!("validated above"),
            }
        }
        out_rows.push(out_row);
    }

    Ok((out_columns, out_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{FieldRef, FuncCall, FuncKind};

    fn sample_columns() -> ColumnIndex {
        let mut cols = ColumnIndex::default();
        cols.push(ColumnDescriptor::source("t", "u", None));
        cols.push(ColumnDescriptor::source("t", "msg", None));
        cols
    }

    #[test]
    fn counts_per_group() {
        let columns = sample_columns();
        let rows = vec![
            vec![Value::Str("alice".into()), Value::Str("hi".into())],
            vec![Value::Str("alice".into()), Value::Str("yo".into())],
            vec![Value::Str("bob".into()), Value::Str("hey".into())],
        ];
        let select_fields = vec![
            FieldExpr::Field { src: "t".into(), field: "u".into(), alias: None },
            FieldExpr::Func(FuncCall {
                name: FuncName::Count,
                kind: FuncKind::Aggregate,
                params: vec![FuncParam::Field { src: "t".into(), field: "msg".into() }],
                alias: Some("c".into()),
                ident: "c".into(),
            }),
        ];
        let functions = vec![FunctionPlan { call: match &select_fields[1] { FieldExpr::Func(f) => f.clone(), _ => unreachable!() }, pushdown: None }];
        let group_by = AttrRef::Field(FieldRef { src: "t".into(), field: "u".into() });
        let (out_cols, out_rows) = execute_group_by(&columns, &rows, Some(&group_by), &select_fields, &functions).unwrap();
        assert_eq!(out_cols.len(), 2);
        assert_eq!(out_rows.len(), 2);
        let alice_row = out_rows.iter().find(|r| r[0] == Value::Str("alice".into())).unwrap();
        assert_eq!(alice_row[1], Value::Int(2));
    }

    #[test]
    fn count_distinct_dedupes_values() {
        let columns = sample_columns();
        let rows = vec![
            vec![Value::Str("alice".into()), Value::Str("hi".into())],
            vec![Value::Str("alice".into()), Value::Str("hi".into())],
            vec![Value::Str("alice".into()), Value::Str("yo".into())],
        ];
        let call = FuncCall {
            name: FuncName::Count,
            kind: FuncKind::Aggregate,
            params: vec![FuncParam::AtomLiteral(crate::ast::AtomLiteral::Distinct), FuncParam::Field { src: "t".into(), field: "msg".into() }],
            alias: Some("c".into()),
            ident: "c".into(),
        };
        let group: Vec<&Row> = rows.iter().collect();
        let value = evaluate_aggregate(&call, &columns, &group).unwrap();
        assert_eq!(value, Value::Int(2));
    }

    #[test]
    fn count_star_rejects_all_null_padding_rows() {
        let columns = sample_columns();
        let rows = vec![
            vec![Value::Str("alice".into()), Value::Str("hi".into())],
            vec![Value::Null, Value::Null],
        ];
        let call = FuncCall {
            name: FuncName::Count,
            kind: FuncKind::Aggregate,
            params: vec![FuncParam::Star { src: "t".into() }],
            alias: Some("c".into()),
            ident: "c".into(),
        };
        let group: Vec<&Row> = rows.iter().collect();
        let value = evaluate_aggregate(&call, &columns, &group).unwrap();
        assert_eq!(value, Value::Int(1));
    }

    #[test]
    fn sum_of_empty_group_is_null_and_rejects_non_numeric() {
        let columns = sample_columns();
        let sum_call = FuncCall {
            name: FuncName::Sum,
            kind: FuncKind::Aggregate,
            params: vec![FuncParam::Field { src: "t".into(), field: "msg".into() }],
            alias: Some("s".into()),
            ident: "s".into(),
        };
        let empty: Vec<&Row> = Vec::new();
        assert_eq!(evaluate_aggregate(&sum_call, &columns, &empty).unwrap(), Value::Null);

        let rows = vec![vec![Value::Str("alice".into()), Value::Str("not a number".into())]];
        let group: Vec<&Row> = rows.iter().collect();
        assert!(evaluate_aggregate(&sum_call, &columns, &group).is_err());
    }
}
