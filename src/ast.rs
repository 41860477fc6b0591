//! The typed AST the parser produces (spec.md §3.1). A query is an
//! ordered sequence of [`Segment`]s; the tagged-enum shape here replaces
//! the loose map-based nodes of the system this engine generalizes —
//! each variant carries exactly the fields it needs, and plan-only
//! bookkeeping (`_index`, `_drop`) lives in the planner's side tables,
//! not in the AST itself.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub data_source: String,
    pub src: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Left,
    Right,
    Inner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    LessEquals,
    GreaterEquals,
    Less,
    Greater,
}

impl CompareOp {
    /// The operator that makes `b OP_INV a` equivalent to `a OP b`;
    /// used when a RIGHT join is driven as a swapped LEFT join
    /// (spec.md §4.6.3).
    pub fn inverted(self) -> Self {
        match self {
            CompareOp::Equals => CompareOp::Equals,
            CompareOp::NotEquals => CompareOp::NotEquals,
            CompareOp::LessEquals => CompareOp::GreaterEquals,
            CompareOp::GreaterEquals => CompareOp::LessEquals,
            CompareOp::Less => CompareOp::Greater,
            CompareOp::Greater => CompareOp::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberLit {
    Int(i64),
    // Comparing floats for AST equality is acceptable here: literals are
    // never the product of arithmetic, only of parsing decimal text.
    Float(OrderedFloat),
}

/// Thin newtype so `NumberLit` (and thus the AST) can derive `Eq`: parsed
/// float literals are always finite decimal text, never NaN.
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedFloat {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub src: String,
    pub field: String,
}

/// The attribute a `GROUP BY` / `ORDER BY` clause names: either a source
/// field or a reference to a `SELECT`-list alias (spec.md §3.1, §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrRef {
    Field(FieldRef),
    Alias(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Field(FieldRef),
    QuotedString(String),
    Number(NumberLit),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryClause {
    pub p1: Operand,
    pub op: CompareOp,
    pub p2: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomLiteral {
    Distinct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncKind {
    Scalar,
    ScalarVarargs,
    Aggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncName {
    Count,
    Min,
    Max,
    Avg,
    Sum,
    Concat,
    ConcatWs,
    Lower,
    Upper,
}

impl FuncName {
    pub fn kind(self) -> FuncKind {
        match self {
            FuncName::Count | FuncName::Min | FuncName::Max | FuncName::Avg | FuncName::Sum => {
                FuncKind::Aggregate
            }
            FuncName::Concat | FuncName::ConcatWs => FuncKind::ScalarVarargs,
            FuncName::Lower | FuncName::Upper => FuncKind::Scalar,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FuncName::Count => "COUNT",
            FuncName::Min => "MIN",
            FuncName::Max => "MAX",
            FuncName::Avg => "AVG",
            FuncName::Sum => "SUM",
            FuncName::Concat => "CONCAT",
            FuncName::ConcatWs => "CONCAT_WS",
            FuncName::Lower => "LOWER",
            FuncName::Upper => "UPPER",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "COUNT" => Some(FuncName::Count),
            "MIN" => Some(FuncName::Min),
            "MAX" => Some(FuncName::Max),
            "AVG" => Some(FuncName::Avg),
            "SUM" => Some(FuncName::Sum),
            "CONCAT" => Some(FuncName::Concat),
            "CONCAT_WS" => Some(FuncName::ConcatWs),
            "LOWER" => Some(FuncName::Lower),
            "UPPER" => Some(FuncName::Upper),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuncParam {
    Field { src: String, field: String },
    Star { src: String },
    QuotedString { raw: String, unquoted: String },
    AtomLiteral(AtomLiteral),
    AliasRef(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncCall {
    pub name: FuncName,
    pub kind: FuncKind,
    pub params: Vec<FuncParam>,
    pub alias: Option<String>,
    /// `"{function_name_lowercased}_{zero_based_index_in_select}"` unless
    /// an explicit alias is given, per spec.md §4.1.
    pub ident: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldExpr {
    Star { src: String },
    Field { src: String, field: String, alias: Option<String> },
    Func(FuncCall),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Select { fields: Vec<FieldExpr>, resource: Resource },
    Join { join_type: JoinType, resource: Resource, clause: BinaryClause },
    Where { clause: BinaryClause },
    GroupBy { attr: AttrRef },
    OrderBy { attr: AttrRef, dir: Direction },
    Limit { n: u64 },
}

pub type Segments = Vec<Segment>;
