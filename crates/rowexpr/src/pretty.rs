//! Pretty printing for expression trees
//!
//! `Display` renders an `Ast` back to source text that parses to the same
//! tree. Compound operands are parenthesised so the output never depends on
//! precedence.

use std::fmt::{self, Display};

use crate::ast::{Arg, Ast, AstKind, BinOp, ColumnId, Constant, UnaryOp};

// ============ Display (single-line) ============

impl Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Missing => write!(f, "MISSING"),
            Constant::Boolean(true) => write!(f, "TRUE"),
            Constant::Boolean(false) => write!(f, "FALSE"),
            Constant::Integer(i64::MIN) => write!(f, "MIN_INTEGER"),
            Constant::Integer(n) => write!(f, "{n}"),
            Constant::Float(x) => {
                if x.is_nan() {
                    write!(f, "NaN")
                } else if x.is_infinite() {
                    write!(f, "{}INFINITY", if *x < 0.0 { "-" } else { "" })
                } else if x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{x:.1}")
                } else {
                    write!(f, "{x:?}")
                }
            }
            Constant::String(s) => write!(f, "\"{}\"", escape_string(s)),
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnId::Named { name, offset: 0 } if is_plain_identifier(name) => {
                write!(f, "${name}")
            }
            ColumnId::Named { name, offset: 0 } => write!(f, "$[\"{}\"]", escape_string(name)),
            ColumnId::Named { name, offset } => {
                write!(f, "$[\"{}\", {offset}]", escape_string(name))
            }
            ColumnId::RowId => write!(f, "$[ROW_ID]"),
            ColumnId::RowIndex => write!(f, "$[ROW_INDEX]"),
            ColumnId::RowNumber => write!(f, "$[ROW_NUMBER]"),
        }
    }
}

impl Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            AstKind::Constant(c) => write!(f, "{c}"),
            AstKind::ColumnAccess(id) => write!(f, "{id}"),
            AstKind::FlowVarAccess(name) if is_plain_identifier(name) => write!(f, "$${name}"),
            AstKind::FlowVarAccess(name) => write!(f, "$$[\"{}\"]", escape_string(name)),
            AstKind::Unary(UnaryOp::Minus, arg) => write!(f, "-{}", Operand(arg)),
            AstKind::Unary(UnaryOp::Not, arg) => write!(f, "not {}", Operand(arg)),
            AstKind::Binary(l, op, r) => write!(f, "{} {op} {}", Operand(l), Operand(r)),
            AstKind::Conditional {
                condition,
                then,
                otherwise,
            } => write!(f, "if ({condition}) {{ {then} }} else {{ {otherwise} }}"),
            AstKind::FunctionCall(call) | AstKind::AggregationCall(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match arg {
                        Arg::Positional(e) => write!(f, "{e}")?,
                        Arg::Named(name, e) => write!(f, "{name}={e}")?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// Wraps operators and negative literals in parentheses.
struct Operand<'a>(&'a Ast);

impl Display for Operand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let needs_parens = match &self.0.kind {
            AstKind::Unary(..) | AstKind::Binary(..) | AstKind::Conditional { .. } => true,
            AstKind::Constant(Constant::Integer(n)) => *n < 0 && *n != i64::MIN,
            AstKind::Constant(Constant::Float(x)) => x.is_sign_negative() && !x.is_nan(),
            _ => false,
        };
        if needs_parens {
            write!(f, "({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn roundtrip(source: &str) -> String {
        let ast = parse(source).unwrap();
        let printed = ast.to_string();
        assert_eq!(parse(&printed).unwrap(), ast, "{printed}");
        printed
    }

    #[test]
    fn prints_operators_with_parens() {
        assert_eq!(roundtrip("1 + 2 * 3"), "1 + (2 * 3)");
        assert_eq!(roundtrip("-2 ** 2"), "-(2 ** 2)");
        assert_eq!(roundtrip("not $a and $b"), "(not $a) and $b");
    }

    #[test]
    fn prints_access_forms() {
        assert_eq!(roundtrip("$[\"my col\", 2]"), "$[\"my col\", 2]");
        assert_eq!(roundtrip("$$['a b']"), "$$[\"a b\"]");
        assert_eq!(roundtrip("$[ROW_INDEX]"), "$[ROW_INDEX]");
    }

    #[test]
    fn prints_calls_and_blocks() {
        assert_eq!(
            roundtrip("round( $x ,precision = 2 )"),
            "round($x, precision=2)"
        );
        assert_eq!(
            roundtrip("if ($a) {1} else {2.5}"),
            "if ($a) { 1 } else { 2.5 }"
        );
    }

    #[test]
    fn prints_special_floats() {
        assert_eq!(roundtrip("INFINITY"), "INFINITY");
        assert_eq!(roundtrip("3.0"), "3.0");
        assert_eq!(Ast::string("a\"b").to_string(), "\"a\\\"b\"");
    }
}
