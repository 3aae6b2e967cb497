//! rowexpr - a statically typed row expression language
//!
//! Expressions compute one value per table row from column values, flow
//! variables, built-in functions and whole-column aggregations. Every
//! expression is type checked before it runs; evaluation is lazy and
//! MISSING-aware.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rowexpr::{compile, evaluate, EvalContext, TypingContext, ValueType};
//!
//! let ctx = TypingContext::new().with_columns(|id| match id.name() {
//!     Some("price") => Ok(ValueType::FLOAT),
//!     _ => Err("No such column."),
//! });
//! let ast = compile("if ($price > 10) { \"high\" } else { \"low\" }", &ctx)?;
//! assert_eq!(ast.ty(), Some(ValueType::STRING));
//!
//! let computer = evaluate(&ast, |_| Some(price_source()), |_| None, |_| None)?;
//! let value = computer.value(&EvalContext::new())?;
//! ```
//!
//! ## Tables
//!
//! For running several expressions over in-memory columns:
//!
//! ```ignore
//! use rowexpr::{ExpressionRunner, FlowVariables, Table};
//!
//! let output = ExpressionRunner::new()
//!     .append("total", "$price * $quantity")
//!     .append("expensive", "$total > COLUMN_AVERAGE(\"total\")")
//!     .run(&table, &FlowVariables::new())?;
//! ```
//!
//! ## Syntax
//!
//! - `$name`, `$["name"]`, `$["name", -1]` → column access, optionally offset by rows
//! - `$[ROW_ID]`, `$[ROW_INDEX]`, `$[ROW_NUMBER]` → row metadata
//! - `$$name` → flow variable
//! - `a ?? b` → `b` wherever `a` is MISSING
//! - `if (c) { a } else { b }` or `if(c, a, b, ...)` → conditionals
//! - `COLUMN_MAX("price")` → whole-column aggregation

pub mod aggregations;
pub mod ast;
pub mod computer;
pub mod diagnostics;
pub mod engine;
pub mod eval;
pub mod functions;
pub mod parse;
mod pretty;
pub mod signature;
pub mod table;
pub mod typing;
pub mod value;
pub mod value_type;

use thiserror::Error;

// ============ Primary Public API ============

pub use ast::{Ast, AstKind, ColumnId, Span};
pub use computer::Computer;
pub use diagnostics::{
    Diagnostic, MapperDiagnostics, Severity, flow_variable_diagnostics, row_filter_diagnostics,
    row_mapper_diagnostics,
};
pub use engine::{ExpressionRunner, InsertionMode, filter_rows};
pub use eval::{EvalContext, EvaluationContext, evaluate};
pub use parse::parse;
pub use table::{FlowVariables, Table};
pub use typing::{CompileError, CompileErrorKind, CompileErrors, TypingContext, infer};
pub use value::{Period, Value};
pub use value_type::{BaseType, ValueType};

/// Parses and type checks `source`. Syntax errors come back as a single
/// [`CompileErrorKind::Syntax`] error.
pub fn compile(source: &str, ctx: &TypingContext<'_>) -> Result<Ast, CompileErrors> {
    let ast = parse(source).map_err(|err| CompileError::syntax(&err, source))?;
    infer(&ast, ctx)?;
    Ok(ast)
}

// ============ Errors ============

#[derive(Error, Debug)]
pub enum RowExprError {
    #[error("Parse error: {0}")]
    Parse(#[from] parse::ParseError),
    #[error("Compile error: {0}")]
    Compile(#[from] CompileErrors),
    #[error("Eval error: {0}")]
    Eval(#[from] eval::EvalError),
    #[error(transparent)]
    Engine(#[from] engine::EngineError),
    #[error("Table error: {0}")]
    Table(#[from] table::TableError),
}

pub use engine::EngineError;
pub use eval::EvalError;
pub use parse::ParseError;
pub use table::TableError;
