//! Join execution (spec.md §4.6.3). Output columns are always `lhs`
//! columns followed by `rhs` columns regardless of join type or which
//! side drives the iteration, so downstream stages (filter, group-by,
//! projection) don't need to know which join variant produced a row.
//!
//! Two internal, always-dropped bookkeeping columns are appended to the
//! merged index: the originating row ordinal on each side (`Null` when
//! that side didn't match). The aggregate stage uses them to dedupe
//! `COUNT(DISTINCT ...)` against the pre-join source row rather than the
//! possibly-fanned-out joined row, so a one-to-many join doesn't inflate
//! a distinct count taken on the "one" side.

use crate::ast::{BinaryClause, FieldRef, JoinType, Operand};
use crate::engine::coerce::compare;
use crate::error::{EngineError, EngineResult};
use crate::row::{ColumnDescriptor, ColumnIndex, Row, Value};

pub struct JoinInput {
    pub columns: ColumnIndex,
    pub rows: Vec<Row>,
}

fn locate(columns: &ColumnIndex, field_ref: &FieldRef) -> Option<usize> {
    columns.find_ignore_alias(&field_ref.src, &field_ref.field)
}

/// Resolve a join clause to `(lhs_key_idx, op, rhs_key_idx)`, inverting
/// the operator if the clause's operands were written rhs-first.
fn resolve_keys(clause: &BinaryClause, lhs: &ColumnIndex, rhs: &ColumnIndex) -> EngineResult<(usize, crate::ast::CompareOp, usize)> {
    let (p1, p2) = match (&clause.p1, &clause.p2) {
        (Operand::Field(a), Operand::Field(b)) => (a, b),
        _ => return Err(EngineError::validation("join clause must compare two source fields")),
    };

    if let (Some(l), Some(r)) = (locate(lhs, p1), locate(rhs, p2)) {
        return Ok((l, clause.op, r));
    }
    if let (Some(l), Some(r)) = (locate(lhs, p2), locate(rhs, p1)) {
        return Ok((l, clause.op.inverted(), r));
    }
    Err(EngineError::validation("join clause does not reference both joined resources"))
}

pub fn execute_join(join_type: JoinType, lhs: JoinInput, rhs: JoinInput, clause: &BinaryClause) -> EngineResult<(ColumnIndex, Vec<Row>)> {
    let (lhs_key, op, rhs_key) = resolve_keys(clause, &lhs.columns, &rhs.columns)?;

    let mut merged_columns = ColumnIndex::default();
    for c in lhs.columns.columns() {
        merged_columns.push(c.clone());
    }
    for c in rhs.columns.columns() {
        merged_columns.push(c.clone());
    }
    merged_columns.push(ColumnDescriptor::internal("lhs_index"));
    merged_columns.push(ColumnDescriptor::internal("rhs_index"));

    let lhs_width = lhs.columns.len();
    let rhs_width = rhs.columns.len();

    let merge = |lhs_row: Option<(usize, &Row)>, rhs_row: Option<(usize, &Row)>| -> Row {
        let mut out = Vec::with_capacity(lhs_width + rhs_width + 2);
        match lhs_row {
            Some((_, row)) => out.extend(row.iter().cloned()),
            None => out.extend(std::iter::repeat(Value::Null).take(lhs_width)),
        }
        match rhs_row {
            Some((_, row)) => out.extend(row.iter().cloned()),
            None => out.extend(std::iter::repeat(Value::Null).take(rhs_width)),
        }
        out.push(lhs_row.map(|(i, _)| Value::Int(i as i64)).unwrap_or(Value::Null));
        out.push(rhs_row.map(|(i, _)| Value::Int(i as i64)).unwrap_or(Value::Null));
        out
    };

    let rows = match join_type {
        JoinType::Inner | JoinType::Left => {
            let mut out = Vec::new();
            for (li, lrow) in lhs.rows.iter().enumerate() {
                let mut matched = false;
                for (ri, rrow) in rhs.rows.iter().enumerate() {
                    if compare(op, &lrow[lhs_key], &rrow[rhs_key]) {
                        matched = true;
                        out.push(merge(Some((li, lrow)), Some((ri, rrow))));
                    }
                }
                if !matched && join_type == JoinType::Left {
                    out.push(merge(Some((li, lrow)), None));
                }
            }
            out
        }
        JoinType::Right => {
            let mut out = Vec::new();
            for (ri, rrow) in rhs.rows.iter().enumerate() {
                let mut matched = false;
                for (li, lrow) in lhs.rows.iter().enumerate() {
                    if compare(op, &lrow[lhs_key], &rrow[rhs_key]) {
                        matched = true;
                        out.push(merge(Some((li, lrow)), Some((ri, rrow))));
                    }
                }
                if !matched {
                    out.push(merge(None, Some((ri, rrow))));
                }
            }
            out
        }
    };

    Ok((merged_columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CompareOp;
    use crate::row::ColumnDescriptor;

    fn clause() -> BinaryClause {
        BinaryClause {
            p1: Operand::Field(FieldRef { src: "csv".into(), field: "id".into() }),
            op: CompareOp::Equals,
            p2: Operand::Field(FieldRef { src: "json".into(), field: "id".into() }),
        }
    }

    fn sample() -> (JoinInput, JoinInput) {
        let mut lhs_cols = ColumnIndex::default();
        lhs_cols.push(ColumnDescriptor::source("csv", "id", None));
        lhs_cols.push(ColumnDescriptor::source("csv", "name", None));
        let lhs = JoinInput {
            columns: lhs_cols,
            rows: vec![
                vec![Value::Int(1), Value::Str("a".into())],
                vec![Value::Int(2), Value::Str("b".into())],
            ],
        };
        let mut rhs_cols = ColumnIndex::default();
        rhs_cols.push(ColumnDescriptor::source("json", "id", None));
        rhs_cols.push(ColumnDescriptor::source("json", "category", None));
        let rhs = JoinInput {
            columns: rhs_cols,
            rows: vec![vec![Value::Int(1), Value::Str("x".into())]],
        };
        (lhs, rhs)
    }

    #[test]
    fn left_join_preserves_unmatched_lhs_rows_with_nulls() {
        let (lhs, rhs) = sample();
        let (cols, rows) = execute_join(JoinType::Left, lhs, rhs, &clause()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][2], Value::Null);
        assert_eq!(cols.len(), 6);
    }

    #[test]
    fn inner_join_drops_unmatched_rows() {
        let (lhs, rhs) = sample();
        let (_, rows) = execute_join(JoinType::Inner, lhs, rhs, &clause()).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn right_join_drives_from_rhs() {
        let (lhs, rhs) = sample();
        let (_, rows) = execute_join(JoinType::Right, lhs, rhs, &clause()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::Int(1));
    }
}
