//! Expression syntax tree
//!
//! Nodes own their children exclusively. Type inference annotates each node
//! exactly once (`Ast::ty`) and records which overload a call resolved to;
//! both annotations are immutable afterwards.

use std::cell::OnceCell;
use std::sync::Arc;

use serde::Serialize;

use crate::aggregations::Aggregation;
use crate::functions::Function;
use crate::signature::{ArgRef, Arguments};
use crate::value::Value;
use crate::value_type::ValueType;

/// Byte range of a node in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub offset: usize,
    pub length: usize,
}

impl Span {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    pub fn between(start: usize, end: usize) -> Self {
        Self {
            offset: start,
            length: end.saturating_sub(start),
        }
    }

    pub fn end(self) -> usize {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Missing,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Constant {
    pub fn value_type(&self) -> ValueType {
        match self {
            Constant::Missing => ValueType::MISSING,
            Constant::Boolean(_) => ValueType::BOOLEAN,
            Constant::Integer(_) => ValueType::INTEGER,
            Constant::Float(_) => ValueType::FLOAT,
            Constant::String(_) => ValueType::STRING,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Constant::Missing => Value::Missing,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(n) => Value::Integer(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::String(s) => Value::String(s.clone()),
        }
    }
}

/// What a column access reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnId {
    /// A named column, `offset` rows away from the current one.
    Named { name: String, offset: i64 },
    RowId,
    /// 0-based position of the row.
    RowIndex,
    /// 1-based position of the row.
    RowNumber,
}

impl ColumnId {
    pub fn named(name: impl Into<String>) -> Self {
        ColumnId::Named {
            name: name.into(),
            offset: 0,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            ColumnId::Named { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    // Arithmetic
    Plus,
    Minus,
    Multiply,
    Divide,
    FloorDivide,
    Remainder,
    Exponent,

    // Ordering
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,

    // Equality
    Equal,
    NotEqual,

    // Logical
    And,
    Or,

    MissingFallback,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::FloorDivide => "//",
            BinOp::Remainder => "%",
            BinOp::Exponent => "**",
            BinOp::LessThan => "<",
            BinOp::LessThanEqual => "<=",
            BinOp::GreaterThan => ">",
            BinOp::GreaterThanEqual => ">=",
            BinOp::Equal => "==",
            BinOp::NotEqual => "!=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::MissingFallback => "??",
        }
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Plus
                | BinOp::Minus
                | BinOp::Multiply
                | BinOp::Divide
                | BinOp::FloorDivide
                | BinOp::Remainder
                | BinOp::Exponent
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            BinOp::LessThan | BinOp::LessThanEqual | BinOp::GreaterThan | BinOp::GreaterThanEqual
        )
    }

    pub fn is_equality(self) -> bool {
        matches!(self, BinOp::Equal | BinOp::NotEqual)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Minus => "-",
            UnaryOp::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Arg<E> {
    Positional(E),
    Named(String, E),
}

impl<E> Arg<E> {
    pub fn pos(expr: E) -> Self {
        Arg::Positional(expr)
    }

    pub fn named(name: impl Into<String>, expr: E) -> Self {
        Arg::Named(name.into(), expr)
    }

    pub fn value(&self) -> &E {
        match self {
            Arg::Positional(e) | Arg::Named(_, e) => e,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Arg::Positional(_) => None,
            Arg::Named(name, _) => Some(name),
        }
    }
}

/// The overload a function call was bound to during type inference.
#[derive(Debug, Clone)]
pub struct ResolvedFunction {
    pub function: Arc<Function>,
    pub overload: usize,
    pub arguments: Arguments<ArgRef>,
}

/// An aggregation call bound to its literal arguments.
#[derive(Debug, Clone)]
pub struct ResolvedAggregation {
    pub aggregation: Arc<Aggregation>,
    pub arguments: Arguments<Value>,
    pub column_type: ValueType,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Function(ResolvedFunction),
    Aggregation(ResolvedAggregation),
}

impl Resolution {
    fn same_target(&self, other: &Resolution) -> bool {
        match (self, other) {
            (Resolution::Function(a), Resolution::Function(b)) => {
                Arc::ptr_eq(&a.function, &b.function) && a.overload == b.overload
            }
            (Resolution::Aggregation(a), Resolution::Aggregation(b)) => {
                Arc::ptr_eq(&a.aggregation, &b.aggregation) && a.column_type == b.column_type
            }
            _ => false,
        }
    }
}

/// A function or aggregation call with its arguments in source order.
#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg<Ast>>,
    resolution: OnceCell<Resolution>,
}

impl Call {
    pub fn new(name: impl Into<String>, args: Vec<Arg<Ast>>) -> Self {
        Self {
            name: name.into(),
            args,
            resolution: OnceCell::new(),
        }
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.get()
    }

    /// Binds the call. Returns false if it is already bound to another target.
    pub(crate) fn resolve(&self, resolution: Resolution) -> bool {
        match self.resolution.get() {
            Some(bound) => bound.same_target(&resolution),
            None => self.resolution.set(resolution).is_ok(),
        }
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.args == other.args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    Constant(Constant),
    ColumnAccess(ColumnId),
    FlowVarAccess(String),
    Unary(UnaryOp, Box<Ast>),
    Binary(Box<Ast>, BinOp, Box<Ast>),
    /// `if (cond) { then } else { otherwise }`
    Conditional {
        condition: Box<Ast>,
        then: Box<Ast>,
        otherwise: Box<Ast>,
    },
    FunctionCall(Call),
    AggregationCall(Call),
}

#[derive(Debug, Clone)]
pub struct Ast {
    pub kind: AstKind,
    pub span: Span,
    ty: OnceCell<ValueType>,
}

/// Structural equality; spans and type annotations are ignored.
impl PartialEq for Ast {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Ast {
    pub fn new(kind: AstKind) -> Self {
        Self {
            kind,
            span: Span::default(),
            ty: OnceCell::new(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The inferred type, once type inference has run.
    pub fn ty(&self) -> Option<ValueType> {
        self.ty.get().copied()
    }

    /// Annotates the node. A node is typed once: a different type is
    /// rejected and the existing annotation returned.
    pub(crate) fn set_type(&self, ty: ValueType) -> Result<(), ValueType> {
        let stored = *self.ty.get_or_init(|| ty);
        if stored == ty { Ok(()) } else { Err(stored) }
    }

    // ============ Constructors ============

    pub fn constant(c: Constant) -> Self {
        Self::new(AstKind::Constant(c))
    }

    pub fn missing() -> Self {
        Self::constant(Constant::Missing)
    }

    pub fn boolean(b: bool) -> Self {
        Self::constant(Constant::Boolean(b))
    }

    pub fn integer(n: i64) -> Self {
        Self::constant(Constant::Integer(n))
    }

    pub fn float(x: f64) -> Self {
        Self::constant(Constant::Float(x))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self::constant(Constant::String(s.into()))
    }

    pub fn column(name: impl Into<String>) -> Self {
        Self::new(AstKind::ColumnAccess(ColumnId::named(name)))
    }

    pub fn column_offset(name: impl Into<String>, offset: i64) -> Self {
        Self::new(AstKind::ColumnAccess(ColumnId::Named {
            name: name.into(),
            offset,
        }))
    }

    pub fn column_id(id: ColumnId) -> Self {
        Self::new(AstKind::ColumnAccess(id))
    }

    pub fn flow_var(name: impl Into<String>) -> Self {
        Self::new(AstKind::FlowVarAccess(name.into()))
    }

    pub fn unary(op: UnaryOp, arg: Ast) -> Self {
        Self::new(AstKind::Unary(op, Box::new(arg)))
    }

    pub fn binary(left: Ast, op: BinOp, right: Ast) -> Self {
        Self::new(AstKind::Binary(Box::new(left), op, Box::new(right)))
    }

    pub fn conditional(condition: Ast, then: Ast, otherwise: Ast) -> Self {
        Self::new(AstKind::Conditional {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    pub fn function(name: impl Into<String>, args: Vec<Arg<Ast>>) -> Self {
        Self::new(AstKind::FunctionCall(Call::new(name, args)))
    }

    pub fn aggregation(name: impl Into<String>, args: Vec<Arg<Ast>>) -> Self {
        Self::new(AstKind::AggregationCall(Call::new(name, args)))
    }

    // ============ Traversal ============

    pub fn children(&self) -> Vec<&Ast> {
        match &self.kind {
            AstKind::Constant(_) | AstKind::ColumnAccess(_) | AstKind::FlowVarAccess(_) => vec![],
            AstKind::Unary(_, arg) => vec![arg],
            AstKind::Binary(l, _, r) => vec![l, r],
            AstKind::Conditional {
                condition,
                then,
                otherwise,
            } => vec![condition, then, otherwise],
            AstKind::FunctionCall(call) | AstKind::AggregationCall(call) => {
                call.args.iter().map(Arg::value).collect()
            }
        }
    }

    /// Pre-order walk over this node and all descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Ast)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Named columns referenced anywhere in the tree, including the literal
    /// column arguments of aggregation calls.
    pub fn column_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |node| match &node.kind {
            AstKind::ColumnAccess(ColumnId::Named { name, .. }) => names.push(name.as_str()),
            AstKind::AggregationCall(call) => {
                if let Some(AstKind::Constant(Constant::String(column))) =
                    call.args.first().map(|a| &a.value().kind)
                {
                    names.push(column.as_str());
                }
            }
            _ => {}
        });
        names
    }

    pub fn flow_variable_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |node| {
            if let AstKind::FlowVarAccess(name) = &node.kind {
                names.push(name.as_str());
            }
        });
        names
    }

    pub fn accesses_columns(&self) -> bool {
        let mut found = false;
        self.walk(&mut |node| {
            if matches!(
                node.kind,
                AstKind::ColumnAccess(_) | AstKind::AggregationCall(_)
            ) {
                found = true;
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_annotation_is_set_once() {
        let ast = Ast::integer(1);
        assert_eq!(ast.ty(), None);
        ast.set_type(ValueType::INTEGER);
        ast.set_type(ValueType::FLOAT);
        assert_eq!(ast.ty(), Some(ValueType::INTEGER));
    }

    #[test]
    fn equality_ignores_spans() {
        let a = Ast::column("x").with_span(Span::new(0, 2));
        let b = Ast::column("x").with_span(Span::new(4, 2));
        assert_eq!(a, b);
    }

    #[test]
    fn collects_referenced_names() {
        let ast = Ast::binary(
            Ast::column("a"),
            BinOp::Plus,
            Ast::aggregation(
                "COLUMN_MAX",
                vec![Arg::pos(Ast::string("b")), Arg::named("ignore_nan", Ast::boolean(true))],
            ),
        );
        assert_eq!(ast.column_names(), vec!["a", "b"]);
        assert!(ast.accesses_columns());

        let flow = Ast::binary(Ast::flow_var("v"), BinOp::Minus, Ast::integer(1));
        assert_eq!(flow.flow_variable_names(), vec!["v"]);
        assert!(!flow.accesses_columns());
    }
}
