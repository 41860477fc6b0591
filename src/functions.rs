//! Scalar/aggregate function-pushdown capability model (spec.md §4.5).
//!
//! Each registered data source type advertises which [`FuncCall`]s it can
//! execute itself via a [`FunctionCapability`] implementation; anything a
//! type doesn't claim falls back to being evaluated in the engine
//! ("platform" evaluation). The default relational capability mirrors a
//! small pushdown allowlist; [`ForceAll`] is used by connector classes
//! that never push functions down (file, web-api), forcing everything to
//! platform evaluation.

use crate::ast::{FuncCall, FuncName, FuncParam};

/// The outcome of asking a capability whether it can run a given call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Supports {
    /// The call can be pushed down; `rendered` is the backend-native
    /// fragment the connector should splice into its generated query.
    Pushdown { rendered: String },
    /// The call must be evaluated by the engine after fetch.
    Platform,
}

pub trait FunctionCapability: Send + Sync {
    fn supports(&self, call: &FuncCall) -> Supports;
}

/// No pushdown: every function call is evaluated by the engine. Used by
/// the file and web-api connector classes, which have no query language
/// of their own to push functions into.
pub struct ForceAll;

impl FunctionCapability for ForceAll {
    fn supports(&self, _call: &FuncCall) -> Supports {
        Supports::Platform
    }
}

/// The relational connector's pushdown allowlist: case-folding functions
/// translate directly to SQL; everything else (aggregates, CONCAT) stays
/// on the platform side so the engine's post-fetch semantics (e.g.
/// COUNT DISTINCT dedup bookkeeping) stay in one place.
pub struct RelationalCapability;

impl FunctionCapability for RelationalCapability {
    fn supports(&self, call: &FuncCall) -> Supports {
        match call.name {
            FuncName::Lower | FuncName::Upper => match call.params.first() {
                Some(FuncParam::Field { src, field }) => Supports::Pushdown {
                    rendered: format!("{}({}.{})", call.name.as_str(), src, field),
                },
                _ => Supports::Platform,
            },
            _ => Supports::Platform,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::FuncKind;

    #[test]
    fn force_all_never_pushes_down() {
        let call = FuncCall {
            name: FuncName::Lower,
            kind: FuncKind::Scalar,
            params: vec![FuncParam::Field { src: "a".into(), field: "name".into() }],
            alias: None,
            ident: "lower_0".into(),
        };
        assert_eq!(ForceAll.supports(&call), Supports::Platform);
    }

    #[test]
    fn relational_pushes_down_lower_on_a_field() {
        let call = FuncCall {
            name: FuncName::Lower,
            kind: FuncKind::Scalar,
            params: vec![FuncParam::Field { src: "a".into(), field: "name".into() }],
            alias: None,
            ident: "lower_0".into(),
        };
        match RelationalCapability.supports(&call) {
            Supports::Pushdown { rendered } => assert_eq!(rendered, "LOWER(a.name)"),
            Supports::Platform => panic!("expected pushdown"),
        }
    }

    #[test]
    fn relational_leaves_aggregates_to_platform() {
        let call = FuncCall {
            name: FuncName::Count,
            kind: FuncKind::Aggregate,
            params: vec![FuncParam::Star { src: "a".into() }],
            alias: None,
            ident: "count_0".into(),
        };
        assert_eq!(RelationalCapability.supports(&call), Supports::Platform);
    }
}
