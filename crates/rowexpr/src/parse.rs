//! Parser for row expressions
//!
//! Precedence, tightest first: `??`, `**`, unary `-`, `* / // %`, `+ -`,
//! comparisons, `not`, `and`, `or`. `??` and `**` associate to the right.

use thiserror::Error;
use winnow::ascii::{digit1, multispace1, till_line_ending};
use winnow::combinator::{
    alt, cut_err, delimited, eof, not, opt, peek, preceded, repeat, separated, terminated,
};
use winnow::error::{StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::stream::LocatingSlice;
use winnow::token::{any, none_of, one_of, take_while};

use crate::ast::{Arg, Ast, AstKind, BinOp, Call, ColumnId, Constant, Span, UnaryOp};

type Input<'a> = LocatingSlice<&'a str>;
type PResult<T> = winnow::ModalResult<T>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl ParseError {
    /// Location for editor markers: from the offending offset to the end of its line.
    pub fn span(&self, source: &str) -> Span {
        let start = self.offset.min(source.len());
        let line_end = source[start..]
            .find('\n')
            .map_or(source.len(), |idx| start + idx);
        Span::between(start, line_end)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {}, offset {})",
            self.message, self.line, self.column, self.offset
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Error)]
#[error("unknown identifier '{0}'")]
struct UnknownIdentifier(String);

/// Parse a row expression from source text.
pub fn parse(source: &str) -> Result<Ast, ParseError> {
    full_expr
        .parse(LocatingSlice::new(source))
        .map_err(|e| {
            let context = e.inner().to_string();
            let message = if context.trim().is_empty() {
                "unexpected input".to_string()
            } else {
                context.replace('\n', "; ")
            };
            build_parse_error(message, source, e.offset())
        })
}

fn build_parse_error(message: String, input: &str, offset: usize) -> ParseError {
    let (line, column) = offset_to_line_column(input, offset);
    ParseError {
        message,
        offset,
        line,
        column,
    }
}

fn offset_to_line_column(input: &str, offset: usize) -> (usize, usize) {
    let bounded = offset.min(input.len());
    let mut line = 1usize;
    let mut column = 1usize;

    for ch in input[..bounded].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    (line, column)
}

fn full_expr(input: &mut Input<'_>) -> PResult<Ast> {
    terminated(
        expr,
        (
            ws,
            eof.context(StrContext::Expected(StrContextValue::Description(
                "end of expression",
            ))),
        ),
    )
    .parse_next(input)
}

// ============ Top-level expression (handles precedence) ============

fn expr(input: &mut Input<'_>) -> PResult<Ast> {
    or_expr.parse_next(input)
}

fn binary_node(left: Ast, op: BinOp, right: Ast) -> Ast {
    let span = Span::between(left.span.offset, right.span.end());
    Ast::binary(left, op, right).with_span(span)
}

fn unary_node(op: UnaryOp, start: usize, arg: Ast) -> Ast {
    let span = Span::between(start, arg.span.end());
    Ast::unary(op, arg).with_span(span)
}

fn fold_binary(first: Ast, rest: Vec<(BinOp, Ast)>) -> Ast {
    rest.into_iter()
        .fold(first, |l, (op, r)| binary_node(l, op, r))
}

fn or_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let first = and_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Ast)> = repeat(
        0..,
        preceded((ws, keyword("or")), cut_err(and_expr)).map(|r| (BinOp::Or, r)),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn and_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let first = not_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Ast)> = repeat(
        0..,
        preceded((ws, keyword("and")), cut_err(not_expr)).map(|r| (BinOp::And, r)),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn not_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let prefix = opt(preceded(ws, keyword("not").span())).parse_next(input)?;
    match prefix {
        Some(range) => {
            let arg = cut_err(not_expr).parse_next(input)?;
            Ok(unary_node(UnaryOp::Not, range.start, arg))
        }
        None => cmp_expr.parse_next(input),
    }
}

fn cmp_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let left = add_expr.parse_next(input)?;
    let rest = opt((preceded(ws, cmp_op), cut_err(add_expr))).parse_next(input)?;
    match rest {
        Some((op, right)) => Ok(binary_node(left, op, right)),
        None => Ok(left),
    }
}

fn cmp_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt((
        "==".value(BinOp::Equal),
        "!=".value(BinOp::NotEqual),
        "<>".value(BinOp::NotEqual),
        "<=".value(BinOp::LessThanEqual),
        ">=".value(BinOp::GreaterThanEqual),
        "<".value(BinOp::LessThan),
        ">".value(BinOp::GreaterThan),
        "=".value(BinOp::Equal),
    ))
    .parse_next(input)
}

fn add_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let first = mul_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Ast)> =
        repeat(0.., (preceded(ws, add_op), cut_err(mul_expr))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn add_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt(('+'.value(BinOp::Plus), '-'.value(BinOp::Minus))).parse_next(input)
}

fn mul_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let first = unary_expr.parse_next(input)?;
    let rest: Vec<(BinOp, Ast)> =
        repeat(0.., (preceded(ws, mul_op), cut_err(unary_expr))).parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn mul_op(input: &mut Input<'_>) -> PResult<BinOp> {
    alt((
        "//".value(BinOp::FloorDivide),
        '/'.value(BinOp::Divide),
        terminated('*', not('*')).value(BinOp::Multiply),
        '%'.value(BinOp::Remainder),
    ))
    .parse_next(input)
}

fn unary_expr(input: &mut Input<'_>) -> PResult<Ast> {
    alt((negation, power_expr)).parse_next(input)
}

/// `-x`; the operand may itself contain `**` and `??`.
fn negation(input: &mut Input<'_>) -> PResult<Ast> {
    let range = preceded(ws, '-'.span()).parse_next(input)?;
    let arg = cut_err(unary_expr).parse_next(input)?;
    Ok(unary_node(UnaryOp::Minus, range.start, arg))
}

fn power_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let base = fallback_expr.parse_next(input)?;
    let exponent = opt(preceded((ws, "**"), cut_err(unary_expr))).parse_next(input)?;
    match exponent {
        Some(exponent) => Ok(binary_node(base, BinOp::Exponent, exponent)),
        None => Ok(base),
    }
}

fn fallback_expr(input: &mut Input<'_>) -> PResult<Ast> {
    let left = primary.parse_next(input)?;
    let right = opt(preceded(
        (ws, "??"),
        cut_err(alt((negation, fallback_expr))),
    ))
    .parse_next(input)?;
    match right {
        Some(right) => Ok(binary_node(left, BinOp::MissingFallback, right)),
        None => Ok(left),
    }
}

// ============ Primary expressions ============

fn primary(input: &mut Input<'_>) -> PResult<Ast> {
    preceded(
        ws,
        alt((
            paren_expr,
            atom.with_span().map(|(kind, range)| {
                Ast::new(kind).with_span(Span::between(range.start, range.end))
            }),
        )),
    )
    .context(StrContext::Expected(StrContextValue::Description(
        "an expression",
    )))
    .parse_next(input)
}

fn paren_expr(input: &mut Input<'_>) -> PResult<Ast> {
    delimited('(', cut_err(expr), cut_err((ws, ')'))).parse_next(input)
}

fn atom(input: &mut Input<'_>) -> PResult<AstKind> {
    alt((
        if_block,
        call,
        flow_var_access,
        column_access,
        float_lit.map(|x| AstKind::Constant(Constant::Float(x))),
        int_lit.map(|n| AstKind::Constant(Constant::Integer(n))),
        string_lit.map(|s| AstKind::Constant(Constant::String(s))),
        named_constant.map(AstKind::Constant),
    ))
    .parse_next(input)
}

/// `if (cond) { then } else { otherwise }`
fn if_block(input: &mut Input<'_>) -> PResult<AstKind> {
    let condition = delimited(
        (keyword("if"), ws, '('),
        expr,
        (ws, ')', ws, '{'),
    )
    .parse_next(input)?;
    let (then, otherwise) = cut_err((
        terminated(expr, (ws, '}', ws, keyword("else"), ws, '{')),
        terminated(expr, (ws, '}')),
    ))
    .parse_next(input)?;
    Ok(AstKind::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

/// `name(args)`; all-uppercase names are column aggregations.
fn call(input: &mut Input<'_>) -> PResult<AstKind> {
    let name = terminated(ident, (ws, '(')).parse_next(input)?;
    let args = cut_err(terminated(call_args, (ws, ')'))).parse_next(input)?;
    let call = Call::new(name.as_str(), args);
    if is_aggregation_name(&name) {
        Ok(AstKind::AggregationCall(call))
    } else {
        Ok(AstKind::FunctionCall(call))
    }
}

fn is_aggregation_name(name: &str) -> bool {
    name.chars().any(|c| c.is_ascii_uppercase())
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn call_args(input: &mut Input<'_>) -> PResult<Vec<Arg<Ast>>> {
    terminated(
        separated(0.., call_arg, (ws, ',')),
        opt((ws, ',')), // trailing comma
    )
    .parse_next(input)
}

fn call_arg(input: &mut Input<'_>) -> PResult<Arg<Ast>> {
    alt((
        // named arg: name=expr
        (preceded(ws, ident), ws, terminated('=', not('=')), cut_err(expr))
            .map(|(name, _, _, e)| Arg::Named(name, e)),
        expr.map(Arg::Positional),
    ))
    .parse_next(input)
}

/// `$$name` or `$$["name"]`
fn flow_var_access(input: &mut Input<'_>) -> PResult<AstKind> {
    preceded(
        "$$",
        cut_err(alt((
            ident,
            delimited(('[', ws), string_lit, (ws, ']')),
        ))),
    )
    .map(AstKind::FlowVarAccess)
    .parse_next(input)
}

/// `$name`, `$["name"]`, `$["name", offset]` or `$[ROW_ID]` and friends.
fn column_access(input: &mut Input<'_>) -> PResult<AstKind> {
    preceded(
        '$',
        cut_err(alt((
            ident.map(ColumnId::named),
            delimited(('[', ws), column_selector, (ws, ']')),
        ))),
    )
    .map(AstKind::ColumnAccess)
    .parse_next(input)
}

fn column_selector(input: &mut Input<'_>) -> PResult<ColumnId> {
    alt((
        keyword("ROW_ID").value(ColumnId::RowId),
        keyword("ROW_INDEX").value(ColumnId::RowIndex),
        keyword("ROW_NUMBER").value(ColumnId::RowNumber),
        (
            string_lit,
            opt(preceded((ws, ',', ws), cut_err(signed_int))),
        )
            .map(|(name, offset)| ColumnId::Named {
                name,
                offset: offset.unwrap_or(0),
            }),
    ))
    .parse_next(input)
}

fn signed_int(input: &mut Input<'_>) -> PResult<i64> {
    (opt(one_of(['+', '-'])), digit1)
        .take()
        .try_map(|s: &str| s.parse::<i64>())
        .parse_next(input)
}

// ============ Identifiers ============

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ident(input: &mut Input<'_>) -> PResult<String> {
    (one_of(is_ident_start), take_while(0.., is_ident_char))
        .take()
        .map(str::to_string)
        .parse_next(input)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&mut Input<'a>) -> PResult<&'a str> {
    move |input: &mut Input<'a>| terminated(kw, not(one_of(is_ident_char))).parse_next(input)
}

/// Bare identifiers name constants; anything else is a syntax error.
fn named_constant(input: &mut Input<'_>) -> PResult<Constant> {
    preceded(
        peek(ident),
        cut_err(ident.try_map(|name| {
            constant_by_name(&name).ok_or(UnknownIdentifier(name))
        })),
    )
    .parse_next(input)
}

pub(crate) fn constant_by_name(name: &str) -> Option<Constant> {
    let c = match name {
        "TRUE" => Constant::Boolean(true),
        "FALSE" => Constant::Boolean(false),
        "MISSING" => Constant::Missing,
        "PI" => Constant::Float(std::f64::consts::PI),
        "E" => Constant::Float(std::f64::consts::E),
        "INFINITY" => Constant::Float(f64::INFINITY),
        "NaN" => Constant::Float(f64::NAN),
        "MIN_INTEGER" => Constant::Integer(i64::MIN),
        "MAX_INTEGER" => Constant::Integer(i64::MAX),
        "MIN_FLOAT" => Constant::Float(f64::MIN),
        "MAX_FLOAT" => Constant::Float(f64::MAX),
        "TINY_FLOAT" => Constant::Float(f64::MIN_POSITIVE),
        _ => return None,
    };
    Some(c)
}

// ============ Literals ============

fn int_lit(input: &mut Input<'_>) -> PResult<i64> {
    preceded(
        peek(one_of(|c: char| c.is_ascii_digit())),
        cut_err(
            take_while(1.., |c: char| c.is_ascii_digit() || c == '_')
                .try_map(|s: &str| s.replace('_', "").parse::<i64>())
                .context(StrContext::Label("integer literal")),
        ),
    )
    .parse_next(input)
}

fn float_lit(input: &mut Input<'_>) -> PResult<f64> {
    alt((
        (digit1, '.', opt(digit1), opt(exponent)).take(),
        ('.', digit1, opt(exponent)).take(),
        (digit1, exponent).take(),
    ))
    .try_map(|s: &str| s.parse::<f64>())
    .parse_next(input)
}

fn exponent<'a>(input: &mut Input<'a>) -> PResult<&'a str> {
    (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1)
        .take()
        .parse_next(input)
}

fn string_lit(input: &mut Input<'_>) -> PResult<String> {
    alt((quoted('"'), quoted('\''))).parse_next(input)
}

fn quoted<'a>(quote: char) -> impl FnMut(&mut Input<'a>) -> PResult<String> {
    move |input: &mut Input<'a>| {
        delimited(
            quote,
            repeat(0.., string_char(quote)).fold(String::new, |mut s, c| {
                s.push(c);
                s
            }),
            cut_err(quote).context(StrContext::Expected(StrContextValue::CharLiteral(quote))),
        )
        .parse_next(input)
    }
}

fn string_char<'a>(quote: char) -> impl FnMut(&mut Input<'a>) -> PResult<char> {
    move |input: &mut Input<'a>| {
        alt((
            none_of(['\\', quote]),
            preceded('\\', cut_err(any)).map(|escaped: char| match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                _ => escaped, // Unknown escapes pass through
            }),
        ))
        .parse_next(input)
    }
}

// ============ Whitespace ============

/// Whitespace and `#` comments.
fn ws(input: &mut Input<'_>) -> PResult<()> {
    repeat(
        0..,
        alt((multispace1.void(), ('#', till_line_ending).void())),
    )
    .parse_next(input)
}

// ============ Sanity Tests ============
// Most testing is done via integration tests in tests/integration.rs

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(source: &str) -> AstKind {
        parse(source).unwrap().kind
    }

    #[test]
    fn parse_literals() {
        assert!(matches!(kind("123"), AstKind::Constant(Constant::Integer(123))));
        assert!(matches!(kind("1_000"), AstKind::Constant(Constant::Integer(1000))));
        assert!(matches!(kind("3.14"), AstKind::Constant(Constant::Float(_))));
        assert!(matches!(kind("1e3"), AstKind::Constant(Constant::Float(x)) if x == 1000.0));
        assert!(matches!(kind("TRUE"), AstKind::Constant(Constant::Boolean(true))));
        assert!(matches!(kind("MISSING"), AstKind::Constant(Constant::Missing)));
        assert!(matches!(
            kind("'it\\'s'"),
            AstKind::Constant(Constant::String(ref s)) if s == "it's"
        ));
    }

    #[test]
    fn parse_operator_precedence() {
        // a * b + c should parse as (a * b) + c
        let AstKind::Binary(left, BinOp::Plus, _) = kind("$a * $b + $c") else {
            panic!("Expected Plus at top level");
        };
        assert!(matches!(left.kind, AstKind::Binary(_, BinOp::Multiply, _)));

        // a and b or c should parse as (a and b) or c
        assert!(matches!(
            kind("$a and $b or $c"),
            AstKind::Binary(_, BinOp::Or, _)
        ));

        // unary minus applies to the whole power: -(2 ** 2)
        let AstKind::Unary(UnaryOp::Minus, arg) = kind("-2 ** 2") else {
            panic!("Expected negation at top level");
        };
        assert!(matches!(arg.kind, AstKind::Binary(_, BinOp::Exponent, _)));

        // not binds looser than comparisons
        let AstKind::Unary(UnaryOp::Not, arg) = kind("not $a < 3") else {
            panic!("Expected not at top level");
        };
        assert!(matches!(arg.kind, AstKind::Binary(_, BinOp::LessThan, _)));
    }

    #[test]
    fn parse_right_associative_operators() {
        let AstKind::Binary(_, BinOp::Exponent, right) = kind("2 ** 3 ** 2") else {
            panic!("Expected exponent");
        };
        assert!(matches!(right.kind, AstKind::Binary(_, BinOp::Exponent, _)));

        // ?? binds tighter than **
        let AstKind::Binary(left, BinOp::Exponent, _) = kind("$a ?? 2 ** 3") else {
            panic!("Expected exponent");
        };
        assert!(matches!(left.kind, AstKind::Binary(_, BinOp::MissingFallback, _)));
    }

    #[test]
    fn parse_column_access_forms() {
        assert_eq!(kind("$col"), AstKind::ColumnAccess(ColumnId::named("col")));
        assert_eq!(
            kind("$[\"my col\", -1]"),
            AstKind::ColumnAccess(ColumnId::Named {
                name: "my col".into(),
                offset: -1
            })
        );
        assert_eq!(kind("$[ROW_NUMBER]"), AstKind::ColumnAccess(ColumnId::RowNumber));
        assert_eq!(kind("$$var"), AstKind::FlowVarAccess("var".into()));
        assert_eq!(kind("$$['my var']"), AstKind::FlowVarAccess("my var".into()));
    }

    #[test]
    fn parse_calls() {
        let AstKind::FunctionCall(call) = kind("round($x, precision=2)") else {
            panic!("Expected function call");
        };
        assert_eq!(call.name, "round");
        assert!(matches!(&call.args[0], Arg::Positional(_)));
        assert!(matches!(&call.args[1], Arg::Named(name, _) if name == "precision"));

        assert!(matches!(kind("COLUMN_MAX(\"x\")"), AstKind::AggregationCall(_)));
        assert!(matches!(kind("if($a, 1, 2)"), AstKind::FunctionCall(ref c) if c.name == "if"));
        assert!(matches!(kind("f($a == 1)"), AstKind::FunctionCall(ref c) if c.args.len() == 1));
        assert!(matches!(kind("now()"), AstKind::FunctionCall(ref c) if c.args.is_empty()));
    }

    #[test]
    fn parse_if_block() {
        assert!(matches!(
            kind("if ($a > 1) { \"big\" } else { \"small\" }"),
            AstKind::Conditional { .. }
        ));
    }

    #[test]
    fn parse_comments_and_spans() {
        let ast = parse("  # leading comment\n  $a + 1 # trailing").unwrap();
        assert_eq!(ast.span, Span::new(22, 6));
    }

    #[test]
    fn parse_errors_carry_offsets() {
        let err = parse("1 + ").unwrap_err();
        assert_eq!(err.offset, 4);

        let err = parse("foo + 1").unwrap_err();
        assert!(err.message.contains("foo"), "{}", err.message);

        let err = parse("1 2").unwrap_err();
        assert_eq!(err.offset, 2);
        assert_eq!((err.line, err.column), (1, 3));
    }
}
