//! Planner: turns parsed [`Segments`] into a validated, connector-aware
//! execution plan (spec.md §4.5). Runs as seven ordered, independently
//! fallible stages; each stage's error is tagged with its own name via
//! [`crate::error::EngineError::with_stage`] before propagating, matching
//! the stage-tagged short-circuit behavior of spec.md §7.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::{EngineError, EngineResult};
use crate::functions::{FunctionCapability, Supports};
use crate::parser::UNQUALIFIED_STAR;
use crate::registry::{ConnectorSpec, SourceRegistry};

/// One resource in the plan: its AST node plus the connector spec it
/// resolved to.
#[derive(Debug, Clone)]
pub struct PlannedResource {
    pub resource: Resource,
    pub connector: ConnectorSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    /// This is the base (first) resource; nothing merges into it.
    Base,
    Join(JoinType),
}

#[derive(Debug, Clone)]
pub struct JoinSpec {
    pub join_type: JoinType,
    pub clause: BinaryClause,
}

#[derive(Debug, Clone)]
pub struct PlannedSegment {
    pub planned_resource: PlannedResource,
    pub merge_action: MergeAction,
    pub join: Option<JoinSpec>,
    /// Source-side field names this resource must fetch: output columns,
    /// join keys and filter operands that touch it.
    pub wanted_fields: Vec<String>,
    /// This resource's alias appears behind a `Star` in the SELECT list,
    /// so it must fetch every column, not just `wanted_fields`.
    pub has_star: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionPlan {
    pub call: FuncCall,
    pub pushdown: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub segments: Vec<PlannedSegment>,
    pub select_fields: Vec<FieldExpr>,
    pub functions: Vec<FunctionPlan>,
    pub where_clause: Option<BinaryClause>,
    pub group_by: Option<AttrRef>,
    pub order_by: Option<(AttrRef, Direction)>,
    pub limit: Option<u64>,
}

/// Build and validate a plan. Returns a [`EngineError::Stage`]-tagged
/// error identifying which of the seven stages rejected the query.
pub fn plan(segments: &Segments, registry: &SourceRegistry) -> EngineResult<Plan> {
    let select = pre_validate(segments).map_err(|e| e.with_stage("pre_validate"))?;

    let base_alias = select.resource.alias.clone();
    let select_fields =
        resolve_unqualified_stars(&select.fields, &base_alias).map_err(|e| e.with_stage("select_fields"))?;

    let joins = extract_joins(segments).map_err(|e| e.with_stage("extract_joins"))?;
    if joins.len() > 1 {
        return Err(EngineError::validation("at most one JOIN segment is supported").with_stage("extract_joins"));
    }

    let where_clause = extract_where(segments).map_err(|e| e.with_stage("where"))?;
    let group_by = extract_group_by(segments).map_err(|e| e.with_stage("group_by"))?;
    let order_by = extract_order_by(segments).map_err(|e| e.with_stage("order_by"))?;
    let limit = extract_limit(segments);

    let functions = classify_functions(&select_fields).map_err(|e| e.with_stage("classify_functions"))?;
    validate_group_by(&group_by, &select_fields, &functions).map_err(|e| e.with_stage("validate_group_by"))?;

    let planned_segments = prepare_segments(
        &select.resource,
        &joins,
        &select_fields,
        &where_clause,
        &functions,
        &group_by,
        &order_by,
        registry,
    )
    .map_err(|e| e.with_stage("prepare_segments"))?;

    Ok(Plan {
        segments: planned_segments,
        select_fields,
        functions,
        where_clause,
        group_by,
        order_by,
        limit,
    })
}

struct SelectInfo {
    fields: Vec<FieldExpr>,
    resource: Resource,
}

fn pre_validate(segments: &Segments) -> EngineResult<SelectInfo> {
    match segments.first() {
        Some(Segment::Select { fields, resource }) => {
            if fields.is_empty() {
                return Err(EngineError::validation("SELECT list must not be empty"));
            }
            Ok(SelectInfo { fields: fields.clone(), resource: resource.clone() })
        }
        _ => Err(EngineError::validation("query must begin with a SELECT segment")),
    }
}

/// Resolves the `Star{src: ""}` sentinel the parser emits for a bare `*`
/// to the base `SELECT` resource's alias, now that it's known.
fn resolve_unqualified_stars(fields: &[FieldExpr], base_alias: &str) -> EngineResult<Vec<FieldExpr>> {
    Ok(fields
        .iter()
        .cloned()
        .map(|f| match f {
            FieldExpr::Star { src } if src == UNQUALIFIED_STAR => FieldExpr::Star { src: base_alias.to_string() },
            other => other,
        })
        .collect())
}

fn extract_joins(segments: &Segments) -> EngineResult<Vec<(JoinType, Resource, BinaryClause)>> {
    Ok(segments
        .iter()
        .filter_map(|s| match s {
            Segment::Join { join_type, resource, clause } => Some((*join_type, resource.clone(), clause.clone())),
            _ => None,
        })
        .collect())
}

fn extract_where(segments: &Segments) -> EngineResult<Option<BinaryClause>> {
    let wheres: Vec<_> = segments.iter().filter_map(|s| match s {
        Segment::Where { clause } => Some(clause.clone()),
        _ => None,
    }).collect();
    match wheres.len() {
        0 => Ok(None),
        1 => Ok(Some(wheres.into_iter().next().unwrap())),
        _ => Err(EngineError::validation("at most one WHERE segment is supported")),
    }
}

fn extract_group_by(segments: &Segments) -> EngineResult<Option<AttrRef>> {
    let groups: Vec<_> = segments.iter().filter_map(|s| match s {
        Segment::GroupBy { attr } => Some(attr.clone()),
        _ => None,
    }).collect();
    match groups.len() {
        0 => Ok(None),
        1 => Ok(Some(groups.into_iter().next().unwrap())),
        _ => Err(EngineError::validation("at most one GROUP BY segment is supported")),
    }
}

fn extract_order_by(segments: &Segments) -> EngineResult<Option<(AttrRef, Direction)>> {
    let orders: Vec<_> = segments.iter().filter_map(|s| match s {
        Segment::OrderBy { attr, dir } => Some((attr.clone(), *dir)),
        _ => None,
    }).collect();
    match orders.len() {
        0 => Ok(None),
        1 => Ok(Some(orders.into_iter().next().unwrap())),
        _ => Err(EngineError::validation("at most one ORDER BY segment is supported")),
    }
}

fn extract_limit(segments: &Segments) -> Option<u64> {
    segments.iter().find_map(|s| match s {
        Segment::Limit { n } => Some(*n),
        _ => None,
    })
}

/// Classify every `SELECT`-list function call as pushdown-eligible or
/// platform-evaluated, per the owning resource's connector capability.
/// This stage runs ahead of `prepare_segments` purely for validation
/// (rejecting unsupported function/param combinations); the definitive
/// per-connector capability check happens again once the connector spec
/// is resolved, because capability depends on which connector a call's
/// field operands belong to.
fn classify_functions(fields: &[FieldExpr]) -> EngineResult<Vec<FunctionPlan>> {
    let mut functions = Vec::new();
    for field in fields {
        if let FieldExpr::Func(call) = field {
            validate_func_call(call)?;
            functions.push(FunctionPlan { call: call.clone(), pushdown: None });
        }
    }
    Ok(functions)
}

fn validate_func_call(call: &FuncCall) -> EngineResult<()> {
    match call.kind {
        FuncKind::Scalar => {
            if call.params.len() != 1 {
                return Err(EngineError::function(format!("{} takes exactly one argument", call.name.as_str())));
            }
        }
        FuncKind::Aggregate => {
            if call.params.is_empty() {
                return Err(EngineError::function(format!("{} requires at least one argument", call.name.as_str())));
            }
        }
        FuncKind::ScalarVarargs => {
            if call.params.is_empty() {
                return Err(EngineError::function(format!("{} requires at least one argument", call.name.as_str())));
            }
        }
    }
    Ok(())
}

/// GROUP BY validation per spec.md §4.5:
/// 1. every non-aggregate SELECT field must be covered by the GROUP BY attribute;
/// 2. an `AttrRef::Alias` wins over a same-named `AttrRef::Field` when both could match;
/// 3. GROUP BY is only meaningful when at least one aggregate function is present.
fn validate_group_by(group_by: &Option<AttrRef>, fields: &[FieldExpr], functions: &[FunctionPlan]) -> EngineResult<()> {
    let has_aggregate = functions.iter().any(|f| f.call.kind == FuncKind::Aggregate);

    let Some(attr) = group_by else {
        if has_aggregate && fields.iter().any(|f| matches!(f, FieldExpr::Field { .. } | FieldExpr::Star { .. })) {
            return Err(EngineError::validation(
                "aggregate function mixed with non-aggregate fields requires GROUP BY",
            ));
        }
        return Ok(());
    };

    if !has_aggregate {
        return Err(EngineError::validation("GROUP BY requires at least one aggregate function in SELECT"));
    }

    for field in fields {
        if let FieldExpr::Field { src, field: name, alias } = field {
            let covered = match attr {
                AttrRef::Alias(a) => alias.as_deref() == Some(a.as_str()),
                AttrRef::Field(fr) => &fr.src == src && &fr.field == name,
            };
            if !covered {
                return Err(EngineError::validation(format!(
                    "non-aggregate field '{src}.{name}' is not covered by GROUP BY"
                )));
            }
        }
    }
    Ok(())
}

fn collect_field_refs_from_clause(clause: &BinaryClause, out: &mut Vec<FieldRef>) {
    for operand in [&clause.p1, &clause.p2] {
        if let Operand::Field(f) = operand {
            out.push(f.clone());
        }
    }
}

fn collect_field_refs_from_func(call: &FuncCall, out: &mut Vec<FieldRef>) {
    for param in &call.params {
        if let FuncParam::Field { src, field } = param {
            out.push(FieldRef { src: src.clone(), field: field.clone() });
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn prepare_segments(
    base_resource: &Resource,
    joins: &[(JoinType, Resource, BinaryClause)],
    select_fields: &[FieldExpr],
    where_clause: &Option<BinaryClause>,
    functions: &[FunctionPlan],
    group_by: &Option<AttrRef>,
    order_by: &Option<(AttrRef, Direction)>,
    registry: &SourceRegistry,
) -> EngineResult<Vec<PlannedSegment>> {
    let mut wanted: HashMap<String, Vec<String>> = HashMap::new();
    let mut has_star: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut mark = |src: &str, field: &str| {
        let entry = wanted.entry(src.to_string()).or_default();
        if !entry.iter().any(|f| f == field) {
            entry.push(field.to_string());
        }
    };
    let mut mark_attr = |attr: &AttrRef| {
        if let AttrRef::Field(FieldRef { src, field }) = attr {
            mark(src, field);
        }
    };

    for field in select_fields {
        match field {
            FieldExpr::Field { src, field, .. } => mark(src, field),
            FieldExpr::Star { src } => {
                wanted.entry(src.clone()).or_default();
                has_star.insert(src.clone());
            }
            FieldExpr::Func(_) => {}
        }
    }
    for plan in functions {
        let mut refs = Vec::new();
        collect_field_refs_from_func(&plan.call, &mut refs);
        for r in refs {
            mark(&r.src, &r.field);
        }
    }
    if let Some(clause) = where_clause {
        let mut refs = Vec::new();
        collect_field_refs_from_clause(clause, &mut refs);
        for r in refs {
            mark(&r.src, &r.field);
        }
    }
    for (_, _, clause) in joins {
        let mut refs = Vec::new();
        collect_field_refs_from_clause(clause, &mut refs);
        for r in refs {
            mark(&r.src, &r.field);
        }
    }
    if let Some(attr) = group_by {
        mark_attr(attr);
    }
    if let Some((attr, _)) = order_by {
        mark_attr(attr);
    }

    let resolve_wanted = |alias: &str| -> Vec<String> {
        match wanted.get(alias) {
            Some(fields) if fields.is_empty() => Vec::new(),
            Some(fields) => fields.clone(),
            None => Vec::new(),
        }
    };

    let resolve_connector = |resource: &Resource| -> EngineResult<ConnectorSpec> {
        let version = None; // model-pinned versions are resolved by the metadata layer before planning.
        registry.resolve(&resource.data_source, version).cloned()
    };

    let mut planned = vec![PlannedSegment {
        planned_resource: PlannedResource { resource: base_resource.clone(), connector: resolve_connector(base_resource)? },
        merge_action: MergeAction::Base,
        join: None,
        wanted_fields: resolve_wanted(&base_resource.alias),
        has_star: has_star.contains(&base_resource.alias),
    }];

    for (join_type, resource, clause) in joins {
        planned.push(PlannedSegment {
            planned_resource: PlannedResource { resource: resource.clone(), connector: resolve_connector(&resource)? },
            merge_action: MergeAction::Join(*join_type),
            join: Some(JoinSpec { join_type: *join_type, clause: clause.clone() }),
            wanted_fields: resolve_wanted(&resource.alias),
            has_star: has_star.contains(&resource.alias),
        });
    }

    Ok(planned)
}

/// Determine which function calls a connector's [`FunctionCapability`]
/// accepts, rendering pushdown fragments where possible.
pub fn classify_pushdown(functions: &[FunctionPlan], capability: &dyn FunctionCapability) -> Vec<FunctionPlan> {
    functions
        .iter()
        .cloned()
        .map(|mut plan| {
            if let Supports::Pushdown { rendered } = capability.supports(&plan.call) {
                plan.pushdown = Some(rendered);
            }
            plan
        })
        .collect()
}
