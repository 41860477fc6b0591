//! Hand-written recursive-descent parser for the restricted SQL dialect
//! of spec.md §3.1. No external grammar crate is used, in keeping with
//! this codebase's preference for small hand-rolled parsers over a
//! parser-combinator dependency (see `config::DatabaseConfig::from_url`
//! for the same style applied to URLs).
//!
//! The parser is a pure function: no I/O, no state beyond its input. It
//! never panics on malformed input — every failure path returns
//! [`EngineError::Parse`] carrying the unconsumed tail and its byte
//! offset, satisfying the parser-totality property (spec.md §8).

use crate::ast::*;
use crate::error::EngineError;

type PResult<'a, T> = Result<(T, usize), EngineError>;

/// Parse a full SQL string into its ordered segments.
pub fn parse(sql: &str) -> Result<Segments, EngineError> {
    let mut pos = skip_ws(sql, 0);
    let (fields, new_pos) = parse_field_list(sql, pos)?;
    pos = new_pos;
    pos = expect_keyword(sql, pos, "FROM")?;
    let (resource, new_pos) = parse_resource(sql, pos)?;
    pos = new_pos;

    let mut segments = vec![Segment::Select { fields, resource }];
    let mut seen_where = false;
    let mut seen_group_by = false;
    let mut seen_order_by = false;
    let mut seen_limit = false;

    loop {
        pos = skip_ws(sql, pos);
        if pos >= sql.len() {
            break;
        }
        if peek_keyword(sql, pos, "LEFT") || peek_keyword(sql, pos, "RIGHT") || peek_keyword(sql, pos, "INNER") {
            let (join_type, p) = parse_join_type(sql, pos)?;
            pos = expect_keyword(sql, p, "JOIN")?;
            let (resource, p) = parse_resource(sql, pos)?;
            pos = expect_keyword(sql, p, "ON")?;
            let (clause, p) = parse_parenthesized_or_bare_clause(sql, pos)?;
            pos = p;
            segments.push(Segment::Join { join_type, resource, clause });
        } else if peek_keyword(sql, pos, "WHERE") {
            if seen_where {
                return Err(err_here(sql, pos, "duplicate WHERE segment"));
            }
            seen_where = true;
            pos = expect_keyword(sql, pos, "WHERE")?;
            let (clause, p) = parse_parenthesized_or_bare_clause(sql, pos)?;
            pos = p;
            segments.push(Segment::Where { clause });
        } else if peek_keyword(sql, pos, "GROUP") {
            if seen_group_by {
                return Err(err_here(sql, pos, "duplicate GROUP BY segment"));
            }
            seen_group_by = true;
            pos = expect_keyword(sql, pos, "GROUP")?;
            pos = expect_keyword(sql, pos, "BY")?;
            let (attr, p) = parse_attr_ref(sql, pos)?;
            pos = p;
            segments.push(Segment::GroupBy { attr });
        } else if peek_keyword(sql, pos, "ORDER") {
            if seen_order_by {
                return Err(err_here(sql, pos, "duplicate ORDER BY segment"));
            }
            seen_order_by = true;
            pos = expect_keyword(sql, pos, "ORDER")?;
            pos = expect_keyword(sql, pos, "BY")?;
            let (attr, p) = parse_attr_ref(sql, pos)?;
            pos = p;
            let (dir, p) = parse_direction(sql, pos)?;
            pos = p;
            segments.push(Segment::OrderBy { attr, dir });
        } else if peek_keyword(sql, pos, "LIMIT") {
            if seen_limit {
                return Err(err_here(sql, pos, "duplicate LIMIT segment"));
            }
            seen_limit = true;
            pos = expect_keyword(sql, pos, "LIMIT")?;
            let (n, p) = parse_unsigned(sql, pos)?;
            if n == 0 {
                return Err(err_here(sql, pos, "LIMIT must be a positive integer"));
            }
            pos = p;
            segments.push(Segment::Limit { n });
        } else {
            return Err(err_here(sql, pos, "unrecognized segment"));
        }
    }

    Ok(segments)
}

fn err_here(sql: &str, pos: usize, message: &str) -> EngineError {
    EngineError::parse(message, sql[pos..].to_string(), pos)
}

// --- lexical helpers --------------------------------------------------

fn skip_ws(s: &str, pos: usize) -> usize {
    let bytes = s.as_bytes();
    let mut p = pos;
    while p < bytes.len() && (bytes[p] as char).is_whitespace() {
        p += 1;
    }
    p
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Case-sensitive keyword match at a word boundary (spec.md §3.1: keyword
/// casing is significant).
fn peek_keyword(s: &str, pos: usize, kw: &str) -> bool {
    let rest = &s[pos..];
    if !rest.starts_with(kw) {
        return false;
    }
    match rest[kw.len()..].chars().next() {
        Some(c) if is_ident_continue(c) => false,
        _ => true,
    }
}

fn expect_keyword(s: &str, pos: usize, kw: &str) -> Result<usize, EngineError> {
    let pos = skip_ws(s, pos);
    if peek_keyword(s, pos, kw) {
        Ok(pos + kw.len())
    } else {
        Err(err_here(s, pos, &format!("expected keyword '{kw}'")))
    }
}

fn parse_identifier(s: &str, pos: usize) -> PResult<String> {
    let pos = skip_ws(s, pos);
    let rest = &s[pos..];
    let mut chars = rest.char_indices();
    match chars.next() {
        Some((_, c)) if is_ident_start(c) => {}
        _ => return Err(err_here(s, pos, "expected identifier")),
    }
    let mut end = rest.len();
    for (i, c) in rest.char_indices().skip(1) {
        if !is_ident_continue(c) {
            end = i;
            break;
        }
    }
    Ok((rest[..end].to_string(), pos + end))
}

/// Parses a single-quoted string. `''` escapes an embedded quote.
fn parse_quoted_string(s: &str, pos: usize) -> PResult<(String, String)> {
    let pos = skip_ws(s, pos);
    let bytes = s.as_bytes();
    if pos >= bytes.len() || bytes[pos] != b'\'' {
        return Err(err_here(s, pos, "expected quoted string"));
    }
    let start = pos + 1;
    let mut i = start;
    let mut unquoted = String::new();
    loop {
        if i >= bytes.len() {
            return Err(err_here(s, pos, "unterminated quoted string"));
        }
        if bytes[i] == b'\'' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
                unquoted.push('\'');
                i += 2;
                continue;
            }
            let raw = s[start..i].to_string();
            return Ok(((raw, unquoted), i + 1));
        }
        let c = s[i..].chars().next().unwrap();
        unquoted.push(c);
        i += c.len_utf8();
    }
}

fn parse_number(s: &str, pos: usize) -> PResult<NumberLit> {
    let pos = skip_ws(s, pos);
    let bytes = s.as_bytes();
    let mut i = pos;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let digits_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == digits_start {
        return Err(err_here(s, pos, "expected number"));
    }
    let mut is_float = false;
    if i < bytes.len() && bytes[i] == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    let text = &s[pos..i];
    if is_float {
        let v: f64 = text.parse().map_err(|_| err_here(s, pos, "invalid float literal"))?;
        Ok((NumberLit::Float(OrderedFloat(v)), i))
    } else {
        let v: i64 = text.parse().map_err(|_| err_here(s, pos, "invalid integer literal"))?;
        Ok((NumberLit::Int(v), i))
    }
}

fn parse_unsigned(s: &str, pos: usize) -> PResult<u64> {
    let pos = skip_ws(s, pos);
    let bytes = s.as_bytes();
    let start = pos;
    let mut i = pos;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == start {
        return Err(err_here(s, pos, "expected unsigned integer"));
    }
    let v: u64 = s[start..i].parse().map_err(|_| err_here(s, pos, "invalid integer"))?;
    Ok((v, i))
}

// --- grammar productions ----------------------------------------------

fn parse_resource(s: &str, pos: usize) -> PResult<Resource> {
    let (data_source, pos) = parse_identifier(s, pos)?;
    let pos = expect_char(s, pos, '.')?;
    let (src, pos) = parse_src_name(s, pos)?;
    let (alias, pos) = parse_identifier(s, pos)?;
    Ok((Resource { data_source, src, alias }, pos))
}

fn expect_char(s: &str, pos: usize, ch: char) -> Result<usize, EngineError> {
    let pos = skip_ws(s, pos);
    match s[pos..].chars().next() {
        Some(c) if c == ch => Ok(pos + c.len_utf8()),
        _ => Err(err_here(s, pos, &format!("expected '{ch}'"))),
    }
}

/// The `src` side of a resource: a bare identifier, or a single-quoted
/// literal to permit filenames/URIs containing punctuation.
fn parse_src_name(s: &str, pos: usize) -> PResult<String> {
    let pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) == Some(&b'\'') {
        let ((_, unquoted), p) = parse_quoted_string(s, pos)?;
        Ok((unquoted, p))
    } else {
        parse_identifier(s, pos)
    }
}

/// Sentinel used for an unqualified `*` in the `SELECT` list; the planner
/// resolves it to the base `SELECT` resource's alias once that alias is
/// known (fields are parsed before `FROM` in this grammar).
pub const UNQUALIFIED_STAR: &str = "";

fn parse_field_list(s: &str, pos: usize) -> PResult<Vec<FieldExpr>> {
    let mut fields = Vec::new();
    let (field, mut pos) = parse_field_expr(s, pos, fields.len())?;
    fields.push(field);
    loop {
        let after_ws = skip_ws(s, pos);
        if s.as_bytes().get(after_ws) == Some(&b',') {
            pos = after_ws + 1;
            let (field, p) = parse_field_expr(s, pos, fields.len())?;
            fields.push(field);
            pos = p;
        } else {
            break;
        }
    }
    Ok((fields, pos))
}

fn parse_field_expr(s: &str, pos: usize, index: usize) -> PResult<FieldExpr> {
    let pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) == Some(&b'*') {
        return Ok((FieldExpr::Star { src: UNQUALIFIED_STAR.to_string() }, pos + 1));
    }

    if let Some((name, after_name)) = try_peek_func_name(s, pos) {
        let after_paren = skip_ws(s, after_name);
        if s.as_bytes().get(after_paren) == Some(&b'(') {
            return parse_func_call(s, pos, name, index);
        }
    }

    let (src, pos) = parse_identifier(s, pos)?;
    let pos = expect_char(s, pos, '.')?;
    let pos2 = skip_ws(s, pos);
    if s.as_bytes().get(pos2) == Some(&b'*') {
        return Ok((FieldExpr::Star { src }, pos2 + 1));
    }
    let (field, pos) = parse_identifier(s, pos2)?;
    let (alias, pos) = parse_optional_as_alias(s, pos)?;
    Ok((FieldExpr::Field { src, field, alias }, pos))
}

fn try_peek_func_name(s: &str, pos: usize) -> Option<(FuncName, usize)> {
    let (ident, end) = parse_identifier(s, pos).ok()?;
    FuncName::from_keyword(&ident).map(|n| (n, end))
}

fn parse_func_call(s: &str, pos: usize, name: FuncName, index: usize) -> PResult<FieldExpr> {
    let (_, pos) = parse_identifier(s, pos)?;
    let pos = expect_char(s, pos, '(')?;
    let mut params = Vec::new();
    let mut pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) != Some(&b')') {
        loop {
            let (param, p) = parse_func_param(s, pos)?;
            params.push(param);
            pos = skip_ws(s, p);
            if s.as_bytes().get(pos) == Some(&b',') {
                pos += 1;
                continue;
            }
            break;
        }
    }
    let pos = expect_char(s, pos, ')')?;
    let (alias, pos) = parse_optional_as_alias(s, pos)?;
    let ident = alias.clone().unwrap_or_else(|| format!("{}_{}", name.as_str().to_lowercase(), index));
    Ok((
        FieldExpr::Func(FuncCall { name, kind: name.kind(), params, alias, ident }),
        pos,
    ))
}

fn parse_func_param(s: &str, pos: usize) -> PResult<FuncParam> {
    let pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) == Some(&b'\'') {
        let ((raw, unquoted), p) = parse_quoted_string(s, pos)?;
        return Ok((FuncParam::QuotedString { raw, unquoted }, p));
    }
    if peek_keyword(s, pos, "DISTINCT") {
        return Ok((FuncParam::AtomLiteral(AtomLiteral::Distinct), pos + "DISTINCT".len()));
    }
    if s.as_bytes().get(pos) == Some(&b'*') {
        return Ok((FuncParam::Star { src: UNQUALIFIED_STAR.to_string() }, pos + 1));
    }
    let (ident, after_ident) = parse_identifier(s, pos)?;
    let after_ws = skip_ws(s, after_ident);
    if s.as_bytes().get(after_ws) == Some(&b'.') {
        let field_start = after_ws + 1;
        let field_ws = skip_ws(s, field_start);
        if s.as_bytes().get(field_ws) == Some(&b'*') {
            return Ok((FuncParam::Star { src: ident }, field_ws + 1));
        }
        let (field, p) = parse_identifier(s, field_ws)?;
        return Ok((FuncParam::Field { src: ident, field }, p));
    }
    Ok((FuncParam::AliasRef(ident), after_ident))
}

fn parse_optional_as_alias(s: &str, pos: usize) -> PResult<Option<String>> {
    let after_ws = skip_ws(s, pos);
    if peek_keyword(s, after_ws, "AS") {
        let p = after_ws + "AS".len();
        let (alias, p) = parse_identifier(s, p)?;
        Ok((Some(alias), p))
    } else {
        Ok((None, pos))
    }
}

fn parse_join_type(s: &str, pos: usize) -> PResult<JoinType> {
    if peek_keyword(s, pos, "LEFT") {
        Ok((JoinType::Left, pos + "LEFT".len()))
    } else if peek_keyword(s, pos, "RIGHT") {
        Ok((JoinType::Right, pos + "RIGHT".len()))
    } else if peek_keyword(s, pos, "INNER") {
        Ok((JoinType::Inner, pos + "INNER".len()))
    } else {
        Err(err_here(s, pos, "expected LEFT, RIGHT or INNER"))
    }
}

fn parse_field_ref(s: &str, pos: usize) -> PResult<FieldRef> {
    let (src, pos) = parse_identifier(s, pos)?;
    let pos = expect_char(s, pos, '.')?;
    let (field, pos) = parse_identifier(s, pos)?;
    Ok((FieldRef { src, field }, pos))
}

fn parse_attr_ref(s: &str, pos: usize) -> PResult<AttrRef> {
    let pos = skip_ws(s, pos);
    // Disambiguate FieldRef (`alias.field`) from a bare AliasRef by
    // checking whether a `.` follows the leading identifier.
    let (ident, after_ident) = parse_identifier(s, pos)?;
    let after_ws = skip_ws(s, after_ident);
    if s.as_bytes().get(after_ws) == Some(&b'.') {
        let (field, p) = parse_identifier(s, after_ws + 1)?;
        Ok((AttrRef::Field(FieldRef { src: ident, field }), p))
    } else {
        Ok((AttrRef::Alias(ident), after_ident))
    }
}

fn parse_direction(s: &str, pos: usize) -> PResult<Direction> {
    let after_ws = skip_ws(s, pos);
    if peek_keyword(s, after_ws, "ASC") {
        Ok((Direction::Asc, after_ws + "ASC".len()))
    } else if peek_keyword(s, after_ws, "DESC") {
        Ok((Direction::Desc, after_ws + "DESC".len()))
    } else {
        Ok((Direction::Asc, pos))
    }
}

fn parse_operand(s: &str, pos: usize) -> PResult<Operand> {
    let pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) == Some(&b'\'') {
        let ((_, unquoted), p) = parse_quoted_string(s, pos)?;
        return Ok((Operand::QuotedString(unquoted), p));
    }
    let looks_numeric = {
        let bytes = s.as_bytes();
        let mut i = pos;
        if bytes.get(i) == Some(&b'+') || bytes.get(i) == Some(&b'-') {
            i += 1;
        }
        bytes.get(i).map(|b| b.is_ascii_digit()).unwrap_or(false)
    };
    if looks_numeric {
        let (n, p) = parse_number(s, pos)?;
        return Ok((Operand::Number(n), p));
    }
    let (field_ref, p) = parse_field_ref(s, pos)?;
    Ok((Operand::Field(field_ref), p))
}

fn parse_compare_op(s: &str, pos: usize) -> PResult<CompareOp> {
    let pos = skip_ws(s, pos);
    let rest = &s[pos..];
    if rest.starts_with("<>") {
        Ok((CompareOp::NotEquals, pos + 2))
    } else if rest.starts_with("<=") {
        Ok((CompareOp::LessEquals, pos + 2))
    } else if rest.starts_with(">=") {
        Ok((CompareOp::GreaterEquals, pos + 2))
    } else if rest.starts_with('=') {
        Ok((CompareOp::Equals, pos + 1))
    } else if rest.starts_with('<') {
        Ok((CompareOp::Less, pos + 1))
    } else if rest.starts_with('>') {
        Ok((CompareOp::Greater, pos + 1))
    } else {
        Err(err_here(s, pos, "expected comparison operator"))
    }
}

fn parse_clause(s: &str, pos: usize) -> PResult<BinaryClause> {
    let (p1, pos) = parse_operand(s, pos)?;
    let (op, pos) = parse_compare_op(s, pos)?;
    let (p2, pos) = parse_operand(s, pos)?;
    Ok((BinaryClause { p1, op, p2 }, pos))
}

fn parse_parenthesized_or_bare_clause(s: &str, pos: usize) -> PResult<BinaryClause> {
    let pos = skip_ws(s, pos);
    if s.as_bytes().get(pos) == Some(&b'(') {
        let (clause, p) = parse_clause(s, pos + 1)?;
        let p = expect_char(s, p, ')')?;
        Ok((clause, p))
    } else {
        parse_clause(s, pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_left_join_with_order_by() {
        let sql = "SELECT csv.name AS name,json.category AS category FROM csv.'one.csv' csv LEFT JOIN json.'two.json' json ON (csv.id = json.id) ORDER BY csv.id ASC";
        let segments = parse(sql).expect("should parse");
        assert_eq!(segments.len(), 3);
        match &segments[0] {
            Segment::Select { fields, resource } => {
                assert_eq!(fields.len(), 2);
                assert_eq!(resource.src, "one.csv");
                assert_eq!(resource.alias, "csv");
            }
            _ => panic!("expected SELECT first"),
        }
        match &segments[1] {
            Segment::Join { join_type, resource, .. } => {
                assert_eq!(*join_type, JoinType::Left);
                assert_eq!(resource.src, "two.json");
            }
            _ => panic!("expected JOIN second"),
        }
        assert!(matches!(segments[2], Segment::OrderBy { dir: Direction::Asc, .. }));
    }

    #[test]
    fn parses_aggregate_with_group_by() {
        let sql = "SELECT s.u,COUNT(s.msg) AS c FROM ds.t s GROUP BY s.u ORDER BY c DESC";
        let segments = parse(sql).unwrap();
        assert_eq!(segments.len(), 4);
        match &segments[0] {
            Segment::Select { fields, .. } => match &fields[1] {
                FieldExpr::Func(f) => {
                    assert_eq!(f.name, FuncName::Count);
                    assert_eq!(f.ident, "c");
                }
                _ => panic!("expected func"),
            },
            _ => panic!(),
        }
        assert!(matches!(segments[3], Segment::OrderBy { dir: Direction::Desc, .. }));
    }

    #[test]
    fn synthesizes_ident_for_unaliased_function() {
        let sql = "SELECT LOWER(s.name) FROM ds.t s";
        let segments = parse(sql).unwrap();
        match &segments[0] {
            Segment::Select { fields, .. } => match &fields[0] {
                FieldExpr::Func(f) => assert_eq!(f.ident, "lower_0"),
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn count_distinct_star() {
        let sql = "SELECT COUNT(DISTINCT *) AS c FROM ds.t s";
        let segments = parse(sql).unwrap();
        match &segments[0] {
            Segment::Select { fields, .. } => match &fields[0] {
                FieldExpr::Func(f) => {
                    assert_eq!(f.params.len(), 2);
                    assert!(matches!(f.params[0], FuncParam::AtomLiteral(AtomLiteral::Distinct)));
                }
                _ => panic!(),
            },
            _ => panic!(),
        }
    }

    #[test]
    fn unknown_data_source_still_parses_fine() {
        let sql = "SELECT a.* FROM absent.t a";
        assert!(parse(sql).is_ok());
    }

    #[test]
    fn rejects_having_and_reports_remaining_tail() {
        let sql = "SELECT * FROM ds.t HAVING x=1";
        let err = parse(sql).unwrap_err();
        match err {
            EngineError::Parse { remaining, position, .. } => {
                assert!(remaining.starts_with("HAVING"));
                assert_eq!(position, sql.find("HAVING").unwrap());
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn not_equals_operator_maps_from_angle_brackets() {
        let sql = "SELECT s.a FROM ds.t s WHERE s.a <> 1";
        let segments = parse(sql).unwrap();
        match &segments[1] {
            Segment::Where { clause } => assert_eq!(clause.op, CompareOp::NotEquals),
            _ => panic!(),
        }
    }

    #[test]
    fn totality_on_garbage_input() {
        let result = parse("not a query at all");
        assert!(result.is_err());
        if let Err(EngineError::Parse { position, remaining, .. }) = result {
            assert!(position <= "not a query at all".len());
            assert!(!remaining.is_empty() || position == "not a query at all".len());
        }
    }

    #[test]
    fn determinism_two_parses_equal() {
        let sql = "SELECT s.a, s.b AS bb FROM ds.t s WHERE s.a = 1 LIMIT 5";
        assert_eq!(parse(sql).unwrap(), parse(sql).unwrap());
    }
}
