//! Execution engine: drives a validated [`Plan`] through fetch, join,
//! filter, platform function evaluation, group-by/aggregate, order-by,
//! limit and projection, in that order (spec.md §4.6). Every stage takes
//! and returns the row model's `(ColumnIndex, Vec<Row>)` pair so stages
//! compose without the engine needing to know which ones actually ran
//! for a given query.

pub mod aggregate;
pub mod coerce;
pub mod join;

use std::sync::Arc;

use tracing::debug;

use crate::ast::{AtomLiteral, FieldExpr, FuncCall, FuncKind, FuncName, FuncParam};
use crate::connectors::{ConnectorFactory, FetchRequest};
use crate::engine::aggregate::resolve_attr;
use crate::engine::join::{execute_join, JoinInput};
use crate::error::{EngineError, EngineResult};
use crate::planner::{MergeAction, Plan};
use crate::row::{ColumnDescriptor, ColumnIndex, ColumnOrigin, Row, Value};

/// Run a plan end to end and return the finalized, projected rows ready
/// for spilling (spec.md §4.6.8).
pub async fn execute(plan: &Plan, factory: &ConnectorFactory) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let (mut columns, mut rows) = fetch(plan, factory).await.map_err(|e| e.with_stage("fetch"))?;

    if let Some(clause) = &plan.where_clause {
        rows = filter(&columns, rows, clause).map_err(|e| e.with_stage("filter"))?;
    }

    let platform_functions: Vec<_> = plan.functions.iter().filter(|f| f.call.kind != FuncKind::Aggregate).collect();
    if !platform_functions.is_empty() {
        let (c, r) = apply_scalar_functions(&columns, rows, &platform_functions).map_err(|e| e.with_stage("functions"))?;
        columns = c;
        rows = r;
    }

    let has_aggregate = plan.functions.iter().any(|f| f.call.kind == FuncKind::Aggregate);
    if has_aggregate {
        let (c, r) = aggregate::execute_group_by(&columns, &rows, plan.group_by.as_ref(), &plan.select_fields, &plan.functions)
            .map_err(|e| e.with_stage("group_by"))?;
        columns = c;
        rows = r;
    }

    if let Some((attr, dir)) = &plan.order_by {
        rows = order_by(&columns, rows, attr, *dir, &plan.select_fields).map_err(|e| e.with_stage("order_by"))?;
    }

    if let Some(n) = plan.limit {
        rows.truncate(n as usize);
    }

    let (columns, rows) = if has_aggregate {
        // Aggregate output is already laid out in select order.
        (columns, rows)
    } else {
        finalize(&columns, rows, &plan.select_fields).map_err(|e| e.with_stage("finalize"))?
    };

    Ok((columns, rows))
}

async fn fetch(plan: &Plan, factory: &ConnectorFactory) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let base = plan.segments.first().ok_or_else(|| EngineError::internal("plan has no base segment"))?;
    debug!(resource = %base.planned_resource.resource.alias, "fetching base resource");

    let connector = factory.build(&base.planned_resource.connector).await?;
    let request = FetchRequest {
        resource: &base.planned_resource.resource,
        wanted_fields: &base.wanted_fields,
        has_star: base.has_star,
        pushed_down: &[],
        properties: &base.planned_resource.connector.properties,
    };
    let base_result = connector.fetch(request).await?;
    let mut columns = base_result.columns;
    let mut rows = base_result.rows;

    for segment in plan.segments.iter().skip(1) {
        let MergeAction::Join(join_type) = segment.merge_action else {
            continue;
        };
        let join_spec = segment.join.as_ref().ok_or_else(|| EngineError::internal("join segment missing clause"))?;

        let connector = factory.build(&segment.planned_resource.connector).await?;
        let request = FetchRequest {
            resource: &segment.planned_resource.resource,
            wanted_fields: &segment.wanted_fields,
            has_star: segment.has_star,
            pushed_down: &[],
            properties: &segment.planned_resource.connector.properties,
        };
        let joined = connector.fetch(request).await?;

        let (merged_columns, merged_rows) = execute_join(
            join_type,
            JoinInput { columns, rows },
            JoinInput { columns: joined.columns, rows: joined.rows },
            &join_spec.clause,
        )?;
        columns = merged_columns;
        rows = merged_rows;
    }

    Ok((columns, rows))
}

fn filter(columns: &ColumnIndex, rows: Vec<Row>, clause: &crate::ast::BinaryClause) -> EngineResult<Vec<Row>> {
    let resolve_operand = |op: &crate::ast::Operand, row: &Row| -> EngineResult<Value> {
        match op {
            crate::ast::Operand::Field(fr) => {
                let idx = columns
                    .find_ignore_alias(&fr.src, &fr.field)
                    .ok_or_else(|| EngineError::validation(format!("unknown field '{}.{}' in WHERE", fr.src, fr.field)))?;
                Ok(row[idx].clone())
            }
            crate::ast::Operand::QuotedString(s) => Ok(Value::Str(s.clone())),
            crate::ast::Operand::Number(n) => Ok(match n {
                crate::ast::NumberLit::Int(i) => Value::Int(*i),
                crate::ast::NumberLit::Float(f) => Value::Float(f.0),
            }),
        }
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let lhs = resolve_operand(&clause.p1, &row)?;
        let rhs = resolve_operand(&clause.p2, &row)?;
        if coerce::compare(clause.op, &lhs, &rhs) {
            out.push(row);
        }
    }
    Ok(out)
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

fn resolve_param_value(param: &FuncParam, columns: &ColumnIndex, row: &Row) -> EngineResult<Option<String>> {
    match param {
        FuncParam::Field { src, field } => {
            let idx = columns
                .find_ignore_alias(src, field)
                .ok_or_else(|| EngineError::function(format!("unknown field '{src}.{field}' in function argument")))?;
            Ok(Some(stringify(&row[idx])))
        }
        FuncParam::QuotedString { unquoted, .. } => Ok(Some(unquoted.clone())),
        FuncParam::AtomLiteral(AtomLiteral::Distinct) | FuncParam::Star { .. } | FuncParam::AliasRef(_) => Ok(None),
    }
}

fn evaluate_scalar(call: &FuncCall, columns: &ColumnIndex, row: &Row) -> EngineResult<Value> {
    match call.name {
        FuncName::Lower | FuncName::Upper => {
            let param = call.params.first().ok_or_else(|| EngineError::function("missing argument"))?;
            let value = resolve_param_value(param, columns, row)?
                .ok_or_else(|| EngineError::function(format!("{} requires a field or string argument", call.name.as_str())))?;
            Ok(Value::Str(if call.name == FuncName::Lower { value.to_lowercase() } else { value.to_uppercase() }))
        }
        FuncName::Concat => {
            let mut out = String::new();
            for param in &call.params {
                if let Some(v) = resolve_param_value(param, columns, row)? {
                    out.push_str(&v);
                }
            }
            Ok(Value::Str(out))
        }
        FuncName::ConcatWs => {
            let separator = match call.params.first() {
                Some(FuncParam::QuotedString { unquoted, .. }) => unquoted.clone(),
                _ => return Err(EngineError::function("CONCAT_WS requires a separator as its first argument")),
            };
            let mut parts = Vec::new();
            for param in &call.params[1..] {
                if let Some(v) = resolve_param_value(param, columns, row)? {
                    parts.push(v);
                }
            }
            Ok(Value::Str(parts.join(&separator)))
        }
        FuncName::Count | FuncName::Min | FuncName::Max | FuncName::Sum | FuncName::Avg => {
            Err(EngineError::function(format!("{} is an aggregate function", call.name.as_str())))
        }
    }
}

fn apply_scalar_functions(
    columns: &ColumnIndex,
    rows: Vec<Row>,
    functions: &[&crate::planner::FunctionPlan],
) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let mut out_columns = columns.clone();
    for f in functions {
        out_columns.push(ColumnDescriptor::func(f.call.ident.clone(), f.call.alias.clone()));
    }

    let mut out_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let mut extended = row.clone();
        for f in functions {
            extended.push(evaluate_scalar(&f.call, columns, &row)?);
        }
        out_rows.push(extended);
    }

    Ok((out_columns, out_rows))
}

fn order_by(
    columns: &ColumnIndex,
    mut rows: Vec<Row>,
    attr: &crate::ast::AttrRef,
    dir: crate::ast::Direction,
    select_fields: &[FieldExpr],
) -> EngineResult<Vec<Row>> {
    let idx = resolve_attr(columns, attr, select_fields)
        .ok_or_else(|| EngineError::validation("ORDER BY references an unknown field or alias"))?;
    let ascending = dir == crate::ast::Direction::Asc;
    rows.sort_by(|a, b| coerce::sort_key(&a[idx], &b[idx], ascending));
    Ok(rows)
}

/// Project rows down to the `SELECT` list's declared order, expanding
/// `Star` to every surviving column of its source alias and dropping any
/// internal/fetch-only columns.
fn finalize(columns: &ColumnIndex, rows: Vec<Row>, select_fields: &[FieldExpr]) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let mut projection: Vec<usize> = Vec::new();
    let mut out_columns = ColumnIndex::default();

    for field in select_fields {
        match field {
            FieldExpr::Star { src } => {
                for idx in columns.indices_for_source_alias(src) {
                    if let Some(descriptor) = columns.get(idx) {
                        if !descriptor.drop {
                            projection.push(idx);
                            out_columns.push(descriptor.clone());
                        }
                    }
                }
            }
            FieldExpr::Field { src, field, alias } => {
                let idx = columns
                    .find_ignore_alias(src, field)
                    .ok_or_else(|| EngineError::validation(format!("unknown field '{src}.{field}' in SELECT")))?;
                projection.push(idx);
                out_columns.push(ColumnDescriptor::source(src.clone(), field.clone(), alias.clone()));
            }
            FieldExpr::Func(call) => {
                let idx = columns
                    .find_by_origin_and_name(&ColumnOrigin::Func, &call.ident)
                    .ok_or_else(|| EngineError::validation(format!("function output '{}' not found", call.ident)))?;
                projection.push(idx);
                out_columns.push(ColumnDescriptor::func(call.ident.clone(), call.alias.clone()));
            }
        }
    }

    let out_rows = rows
        .into_iter()
        .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
        .collect();

    Ok((out_columns, out_rows))
}

/// Write a materialized result set to its spill file as
/// `{"data":{"columns":[...],"rows":[...]}}` (spec.md §3.3, §6.2).
pub async fn spill_to_file(path: &std::path::Path, columns: &ColumnIndex, rows: &[Row]) -> EngineResult<()> {
    let headers: Vec<&str> = columns.columns().iter().map(|c| c.output_name()).collect();
    let row_values: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| serde_json::Value::Array(row.iter().map(Value::to_json).collect()))
        .collect();

    let document = serde_json::json!({
        "data": {
            "columns": headers,
            "rows": row_values,
        }
    });

    let contents = serde_json::to_vec(&document)?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

/// Used by connector construction paths that need a shared factory handle.
pub type SharedConnectorFactory = Arc<ConnectorFactory>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::ColumnDescriptor;

    #[test]
    fn finalize_expands_star_and_skips_dropped_columns() {
        let mut columns = ColumnIndex::default();
        columns.push(ColumnDescriptor::source("a", "id", None));
        columns.push(ColumnDescriptor::source("a", "secret", None).dropped());
        let rows = vec![vec![Value::Int(1), Value::Str("shh".into())]];
        let select_fields = vec![FieldExpr::Star { src: "a".into() }];
        let (out_columns, out_rows) = finalize(&columns, rows, &select_fields).unwrap();
        assert_eq!(out_columns.len(), 1);
        assert_eq!(out_rows[0], vec![Value::Int(1)]);
    }

    #[test]
    fn scalar_lower_uppercases_a_string_field() {
        let mut columns = ColumnIndex::default();
        columns.push(ColumnDescriptor::source("a", "name", None));
        let rows = vec![vec![Value::Str("HELLO".into())]];
        let call = FuncCall {
            name: FuncName::Lower,
            kind: FuncKind::Scalar,
            params: vec![FuncParam::Field { src: "a".into(), field: "name".into() }],
            alias: None,
            ident: "lower_0".into(),
        };
        let plan = crate::planner::FunctionPlan { call, pushdown: None };
        let (out_columns, out_rows) = apply_scalar_functions(&columns, rows, &[&plan]).unwrap();
        assert_eq!(out_columns.len(), 2);
        assert_eq!(out_rows[0][1], Value::Str("hello".into()));
    }

    #[test]
    fn order_by_sorts_ascending_with_nulls_last() {
        let mut columns = ColumnIndex::default();
        columns.push(ColumnDescriptor::source("a", "n", None));
        let rows = vec![vec![Value::Int(3)], vec![Value::Null], vec![Value::Int(1)]];
        let attr = crate::ast::AttrRef::Field(crate::ast::FieldRef { src: "a".into(), field: "n".into() });
        let sorted = order_by(&columns, rows, &attr, crate::ast::Direction::Asc, &[]).unwrap();
        assert_eq!(sorted[0][0], Value::Int(1));
        assert_eq!(sorted[1][0], Value::Int(3));
        assert_eq!(sorted[2][0], Value::Null);
    }
}
