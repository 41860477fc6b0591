//! The row model shared by every connector and by the execution engine
//! (spec.md §3.2).
//!
//! A row is a plain vector of [`Value`] cells; provenance (which source
//! alias and field a cell came from, and whether it should survive
//! projection) lives in a parallel [`ColumnIndex`] rather than being
//! carried on the cell itself. Join bookkeeping columns (`lhs_index` /
//! `rhs_index`) are ordinary columns with [`ColumnOrigin::Internal`] and
//! are stripped before projection like any other dropped column.

use std::collections::HashMap;

/// A single cell value. `Null` is the universal sentinel used for SQL
/// NULL, missing JSON keys, and absent object fields alike.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Coerce a scalar JSON value into the row model's value type.
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            other => Value::Str(other.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

pub type Row = Vec<Value>;

/// Where a column's value originates, matching the spec's triple
/// convention: plain source fields, function outputs (`:func`), and
/// join-internal bookkeeping columns (`nil`/`nil`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnOrigin {
    Source(String),
    Func,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub origin: ColumnOrigin,
    pub name: String,
    pub alias: Option<String>,
    /// True when this column was fetched only to support a join/filter/
    /// group/function and must not appear in the final projection.
    pub drop: bool,
}

impl ColumnDescriptor {
    pub fn source(alias: impl Into<String>, field: impl Into<String>, user_alias: Option<String>) -> Self {
        Self {
            origin: ColumnOrigin::Source(alias.into()),
            name: field.into(),
            alias: user_alias,
            drop: false,
        }
    }

    pub fn func(name: impl Into<String>, user_alias: Option<String>) -> Self {
        Self { origin: ColumnOrigin::Func, name: name.into(), alias: user_alias, drop: false }
    }

    pub fn internal(name: impl Into<String>) -> Self {
        Self { origin: ColumnOrigin::Internal, name: name.into(), alias: None, drop: true }
    }

    pub fn dropped(mut self) -> Self {
        self.drop = true;
        self
    }

    /// The output header name: user alias if present, else the
    /// source-side field name (or the function's `ident`).
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn matches_source_field(&self, src: &str, field: &str) -> bool {
        matches!(&self.origin, ColumnOrigin::Source(a) if a == src) && self.name == field
    }
}

/// Maps column descriptors to their ordinal position in a row.
#[derive(Debug, Clone, Default)]
pub struct ColumnIndex {
    columns: Vec<ColumnDescriptor>,
}

impl ColumnIndex {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn push(&mut self, descriptor: ColumnDescriptor) -> usize {
        self.columns.push(descriptor);
        self.columns.len() - 1
    }

    /// Resolve `(alias, field)` to an ordinal, ignoring any user alias on
    /// the candidate columns (used for join-key and filter resolution,
    /// which always address the source-side name).
    pub fn find_ignore_alias(&self, src: &str, field: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.matches_source_field(src, field))
    }

    /// Resolve a user-facing alias (from `SELECT ... AS x` or a bare
    /// function ident) to its ordinal.
    pub fn find_by_output_alias(&self, alias: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.alias.as_deref() == Some(alias))
    }

    pub fn find_by_origin_and_name(&self, origin: &ColumnOrigin, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| &c.origin == origin && c.name == name)
    }

    /// All ordinals whose source alias matches (used to expand `Star`).
    pub fn indices_for_source_alias(&self, src: &str) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(&c.origin, ColumnOrigin::Source(a) if a == src))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn get(&self, idx: usize) -> Option<&ColumnDescriptor> {
        self.columns.get(idx)
    }

    /// Build the output index map used by finalize/project: kept column
    /// ordinal -> desired output ordinal, in declaration order.
    pub fn output_order(&self) -> HashMap<usize, usize> {
        let mut next = 0usize;
        let mut map = HashMap::new();
        for (i, c) in self.columns.iter().enumerate() {
            if !c.drop {
                map.insert(i, next);
                next += 1;
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_ignore_alias_matches_source_field_regardless_of_user_alias() {
        let mut idx = ColumnIndex::default();
        idx.push(ColumnDescriptor::source("csv", "id", Some("my_id".into())));
        assert_eq!(idx.find_ignore_alias("csv", "id"), Some(0));
        assert_eq!(idx.find_ignore_alias("csv", "name"), None);
    }

    #[test]
    fn output_order_skips_dropped_columns() {
        let mut idx = ColumnIndex::default();
        idx.push(ColumnDescriptor::source("csv", "id", None).dropped());
        idx.push(ColumnDescriptor::source("csv", "name", None));
        let order = idx.output_order();
        assert_eq!(order.get(&0), None);
        assert_eq!(order.get(&1), Some(&0));
    }
}
