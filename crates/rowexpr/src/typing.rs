//! Type inference
//!
//! [`infer`] walks an expression bottom-up, annotates every node with its
//! [`ValueType`] and binds each call to an overload. Errors are collected
//! per offending node; a node whose children failed adds nothing of its own,
//! so one mistake is reported once.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::aggregations::{Aggregation, BUILT_IN_AGGREGATIONS};
use crate::ast::{
    Arg, Ast, AstKind, BinOp, Call, ColumnId, Resolution, ResolvedAggregation, ResolvedFunction,
    Span, UnaryOp,
};
use crate::functions::{BUILT_IN_FUNCTIONS, Function, Registry};
use crate::parse::ParseError;
use crate::signature::{ArgRef, match_signature};
use crate::value_type::{BaseType, ValueType};

// ============ Errors ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompileErrorKind {
    Syntax,
    MissingColumn,
    MissingFlowVariable,
    UnsupportedType,
    TypeMismatch,
    UnknownFunction,
    UnknownAggregation,
    ArgumentMismatch,
    LiteralRequired,
    /// The tree was typed before with resolvers that disagree.
    AlreadyTyped,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub span: Span,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    /// A syntax error located in `source`.
    pub fn syntax(err: &ParseError, source: &str) -> Self {
        Self::new(CompileErrorKind::Syntax, err.message.clone(), err.span(source))
    }
}

/// All errors found in one expression. Never empty.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct CompileErrors(Vec<CompileError>);

impl CompileErrors {
    pub fn new(errors: Vec<CompileError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self(errors)
    }

    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }

    pub fn into_errors(self) -> Vec<CompileError> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{single}"),
            errors => {
                write!(f, "{} errors:", errors.len())?;
                for error in errors {
                    write!(f, "\n  {error}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<CompileError> for CompileErrors {
    fn from(error: CompileError) -> Self {
        Self(vec![error])
    }
}

impl IntoIterator for CompileErrors {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Why a resolver could not type a column or flow variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// Nothing with that name exists.
    Missing(String),
    /// It exists, but its host type has no counterpart in the language.
    UnsupportedType(String),
}

impl From<String> for Unresolved {
    fn from(message: String) -> Self {
        Unresolved::Missing(message)
    }
}

impl From<&str> for Unresolved {
    fn from(message: &str) -> Self {
        Unresolved::Missing(message.to_string())
    }
}

// ============ Context ============

/// What names mean while typing: columns, flow variables, functions and
/// aggregations.
pub struct TypingContext<'a> {
    columns: Box<dyn Fn(&ColumnId) -> Result<ValueType, Unresolved> + 'a>,
    flow_variables: Box<dyn Fn(&str) -> Result<ValueType, Unresolved> + 'a>,
    functions: &'a Registry<Function>,
    aggregations: &'a Registry<Aggregation>,
}

impl Default for TypingContext<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Types of `ROW_ID`, `ROW_INDEX` and `ROW_NUMBER` for hosts that have rows.
pub fn row_column_type(id: &ColumnId) -> Option<ValueType> {
    match id {
        ColumnId::RowId => Some(ValueType::STRING),
        ColumnId::RowIndex | ColumnId::RowNumber => Some(ValueType::INTEGER),
        ColumnId::Named { .. } => None,
    }
}

impl<'a> TypingContext<'a> {
    /// Rows without named columns, no flow variables, and the built-in
    /// functions and aggregations.
    pub fn new() -> Self {
        Self {
            columns: Box::new(|id: &ColumnId| {
                row_column_type(id).ok_or_else(|| {
                    Unresolved::Missing(format!(
                        "No column with the name '{}' is available.",
                        id.name().unwrap_or_default()
                    ))
                })
            }),
            flow_variables: Box::new(|name: &str| {
                Err(Unresolved::Missing(format!(
                    "No flow variable with the name '{name}' is available."
                )))
            }),
            functions: &BUILT_IN_FUNCTIONS,
            aggregations: &BUILT_IN_AGGREGATIONS,
        }
    }

    /// Types column accesses, including `ROW_ID`, `ROW_INDEX` and
    /// `ROW_NUMBER` (see [`row_column_type`]).
    pub fn with_columns<E: Into<Unresolved> + 'a>(
        mut self,
        resolver: impl Fn(&ColumnId) -> Result<ValueType, E> + 'a,
    ) -> Self {
        self.columns = Box::new(move |id: &ColumnId| resolver(id).map_err(Into::into));
        self
    }

    pub fn with_flow_variables<E: Into<Unresolved> + 'a>(
        mut self,
        resolver: impl Fn(&str) -> Result<ValueType, E> + 'a,
    ) -> Self {
        self.flow_variables = Box::new(move |name: &str| resolver(name).map_err(Into::into));
        self
    }

    pub fn with_functions(mut self, functions: &'a Registry<Function>) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_aggregations(mut self, aggregations: &'a Registry<Aggregation>) -> Self {
        self.aggregations = aggregations;
        self
    }

    fn column_type(&self, id: &ColumnId) -> Result<ValueType, Unresolved> {
        (self.columns)(id)
    }
}

// ============ Entry point ============

/// Infers the type of `ast`, annotating every node and resolving calls.
pub fn infer(ast: &Ast, ctx: &TypingContext<'_>) -> Result<ValueType, CompileErrors> {
    Typer { ctx }.infer(ast).map_err(|errors| {
        log::debug!("typing `{ast}` failed with {} error(s)", errors.len());
        CompileErrors::new(errors)
    })
}

type Inferred = Result<ValueType, Vec<CompileError>>;

struct Typer<'c, 'a> {
    ctx: &'c TypingContext<'a>,
}

fn error(kind: CompileErrorKind, message: impl Into<String>, ast: &Ast) -> Vec<CompileError> {
    vec![CompileError::new(kind, message, ast.span)]
}

fn already_typed(what: String, ast: &Ast) -> Vec<CompileError> {
    error(
        CompileErrorKind::AlreadyTyped,
        format!("{what}. Parse the expression again to type it in another context."),
        ast,
    )
}

fn mismatch(message: impl Into<String>, ast: &Ast) -> Vec<CompileError> {
    error(CompileErrorKind::TypeMismatch, message, ast)
}

fn unresolved(missing: CompileErrorKind, reason: Unresolved, ast: &Ast) -> Vec<CompileError> {
    match reason {
        Unresolved::Missing(message) => error(missing, message, ast),
        Unresolved::UnsupportedType(message) => {
            error(CompileErrorKind::UnsupportedType, message, ast)
        }
    }
}

/// Types every child; all of them, so sibling errors are reported together.
fn all_or_errors(results: Vec<Inferred>) -> Result<Vec<ValueType>, Vec<CompileError>> {
    let mut types = Vec::with_capacity(results.len());
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(ty) => types.push(ty),
            Err(e) => errors.extend(e),
        }
    }
    if errors.is_empty() { Ok(types) } else { Err(errors) }
}

impl Typer<'_, '_> {
    fn infer(&self, ast: &Ast) -> Inferred {
        let ty = self.infer_node(ast)?;
        ast.set_type(ty).map_err(|typed| {
            already_typed(
                format!("The expression is already typed as {typed}, not {ty}"),
                ast,
            )
        })?;
        Ok(ty)
    }

    fn infer_node(&self, ast: &Ast) -> Inferred {
        match &ast.kind {
            AstKind::Constant(c) => Ok(c.value_type()),
            AstKind::ColumnAccess(id) => self
                .ctx
                .column_type(id)
                .map_err(|reason| unresolved(CompileErrorKind::MissingColumn, reason, ast)),
            AstKind::FlowVarAccess(name) => (self.ctx.flow_variables)(name)
                .map_err(|reason| unresolved(CompileErrorKind::MissingFlowVariable, reason, ast)),
            AstKind::Unary(op, arg) => {
                let ty = self.infer(arg)?;
                unary_type(*op, ty).map_err(|message| mismatch(message, ast))
            }
            AstKind::Binary(l, op, r) => {
                let types = all_or_errors(vec![self.infer(l), self.infer(r)])?;
                binary_type(*op, types[0], types[1]).map_err(|message| mismatch(message, ast))
            }
            AstKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let types = all_or_errors(vec![
                    self.infer(condition),
                    self.infer(then),
                    self.infer(otherwise),
                ])?;
                conditional_type(types[0], types[1], types[2])
                    .map_err(|message| mismatch(message, ast))
            }
            AstKind::FunctionCall(call) => self.function(ast, call),
            AstKind::AggregationCall(call) => self.aggregation(ast, call),
        }
    }

    /// Unknown-name error with suggestions drawn from every callable name.
    fn unknown(
        &self,
        kind: CompileErrorKind,
        what: &str,
        call: &Call,
        ast: &Ast,
    ) -> Vec<CompileError> {
        let mut suggestions = self.ctx.functions.suggest(&call.name);
        suggestions.extend(self.ctx.aggregations.suggest(&call.name));
        let mut message = format!("Unknown {what} '{}'.", call.name);
        if !suggestions.is_empty() {
            let quoted: Vec<String> = suggestions.iter().map(|s| format!("'{s}'")).collect();
            message.push_str(&format!(" Did you mean {}?", quoted.join(" or ")));
        }
        error(kind, message, ast)
    }

    fn function(&self, ast: &Ast, call: &Call) -> Inferred {
        let arg_types = all_or_errors(call.args.iter().map(|a| self.infer(a.value())).collect());
        let Some(function) = self.ctx.functions.get(&call.name) else {
            let mut errors = arg_types.err().unwrap_or_default();
            errors.extend(self.unknown(CompileErrorKind::UnknownFunction, "function", call, ast));
            return Err(errors);
        };
        let arg_types = arg_types?;
        let args: Vec<(Option<&str>, ValueType)> = call
            .args
            .iter()
            .zip(&arg_types)
            .map(|(arg, ty)| (arg.name(), *ty))
            .collect();

        let mut reasons = Vec::new();
        for (idx, overload) in function.overloads.iter().enumerate() {
            let bound = match match_signature(&overload.params, &args) {
                Ok(bound) => bound,
                Err(reason) => {
                    reasons.push(reason);
                    continue;
                }
            };
            let types = bound.map(|arg| match arg {
                ArgRef::Arg(i) => arg_types[*i],
                ArgRef::Default(value) => value.value_type(),
            });
            match (overload.return_type)(&types) {
                Ok(ty) => {
                    let resolved = call.resolve(Resolution::Function(ResolvedFunction {
                        function: function.clone(),
                        overload: idx,
                        arguments: bound,
                    }));
                    if !resolved {
                        return Err(rebound(call, ast));
                    }
                    return Ok(ty);
                }
                Err(reason) => reasons.push(reason),
            }
        }

        let message = match reasons.as_slice() {
            [reason] => format!("In function '{}': {reason}", call.name),
            _ => {
                let got: Vec<String> = arg_types.iter().map(|t| t.name()).collect();
                format!(
                    "In function '{}': No signature accepts the arguments ({}). Expected {}.",
                    call.name,
                    got.join(", "),
                    function.signatures().join(" or ")
                )
            }
        };
        Err(error(CompileErrorKind::ArgumentMismatch, message, ast))
    }

    fn aggregation(&self, ast: &Ast, call: &Call) -> Inferred {
        let Some(aggregation) = self.ctx.aggregations.get(&call.name) else {
            return Err(self.unknown(
                CompileErrorKind::UnknownAggregation,
                "aggregation",
                call,
                ast,
            ));
        };
        let fail = |kind, message: String| {
            error(kind, format!("In aggregation '{}': {message}", call.name), ast)
        };

        let mut literals = Vec::with_capacity(call.args.len());
        let mut errors = Vec::new();
        for (position, arg) in call.args.iter().enumerate() {
            match &arg.value().kind {
                AstKind::Constant(c) => {
                    // A literal always has the same type.
                    let _ = arg.value().set_type(c.value_type());
                    literals.push(c.to_value());
                }
                _ => errors.push(CompileError::new(
                    CompileErrorKind::LiteralRequired,
                    format!(
                        "In aggregation '{}': {} must be a literal value.",
                        call.name,
                        describe_arg(arg, position)
                    ),
                    arg.value().span,
                )),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let args: Vec<(Option<&str>, ValueType)> = call
            .args
            .iter()
            .zip(&literals)
            .map(|(arg, value)| (arg.name(), value.value_type()))
            .collect();
        let bound = match_signature(&aggregation.params, &args)
            .map_err(|reason| fail(CompileErrorKind::ArgumentMismatch, reason))?;
        let arguments = bound.map(|arg| match arg {
            ArgRef::Arg(i) => literals[*i].clone(),
            ArgRef::Default(value) => value.clone(),
        });

        let column = aggregation
            .column_name(&arguments)
            .map(str::to_string)
            .ok_or_else(|| fail(CompileErrorKind::ArgumentMismatch, "No column given.".into()))?;
        let column_type = self
            .ctx
            .column_type(&ColumnId::named(column))
            .map_err(|reason| match reason {
                Unresolved::Missing(m) => fail(CompileErrorKind::MissingColumn, m),
                Unresolved::UnsupportedType(m) => fail(CompileErrorKind::UnsupportedType, m),
            })?;
        let ty = aggregation
            .return_type(column_type)
            .map_err(|reason| fail(CompileErrorKind::ArgumentMismatch, reason))?;

        let resolved = call.resolve(Resolution::Aggregation(ResolvedAggregation {
            aggregation,
            arguments,
            column_type,
        }));
        if !resolved {
            return Err(rebound(call, ast));
        }
        Ok(ty)
    }
}

fn rebound(call: &Call, ast: &Ast) -> Vec<CompileError> {
    already_typed(
        format!("The call to '{}' is already bound to another signature", call.name),
        ast,
    )
}

fn describe_arg(arg: &Arg<Ast>, position: usize) -> String {
    match arg.name() {
        Some(name) => format!("Argument '{name}'"),
        None => format!("Argument {}", position + 1),
    }
}

// ============ Operator rules ============

fn not_applicable(op: &str, a: ValueType, b: ValueType) -> String {
    format!("Operator '{op}' is not applicable for {a} and {b}.")
}

fn unary_type(op: UnaryOp, ty: ValueType) -> Result<ValueType, String> {
    let applies = match op {
        UnaryOp::Minus => ty.is_numeric() || ty.is_duration(),
        UnaryOp::Not => ty.base() == BaseType::Boolean,
    };
    if applies {
        Ok(ty)
    } else {
        Err(format!("Operator '{}' is not applicable for {ty}.", op.symbol()))
    }
}

pub(crate) fn binary_type(op: BinOp, a: ValueType, b: ValueType) -> Result<ValueType, String> {
    let optional = a.is_optional() || b.is_optional();
    let symbol = op.symbol();

    if op == BinOp::Plus && (a.base() == BaseType::String || b.base() == BaseType::String) {
        return Ok(ValueType::STRING);
    }
    if op.is_arithmetic() && a.is_numeric() && b.is_numeric() {
        return arithmetic_type(op, a, b, optional);
    }
    if op.is_ordering() {
        return if a.is_mutually_orderable(b) {
            Ok(ValueType::BOOLEAN)
        } else {
            Err(not_applicable(symbol, a, b))
        };
    }
    if op.is_equality() {
        if a.base() == BaseType::ZonedDateTime && b.base() == BaseType::ZonedDateTime {
            return Err("Equality comparison is not supported for ZONED_DATE_TIME.".into());
        }
        return if a.is_equatable(b) {
            Ok(ValueType::BOOLEAN)
        } else {
            Err(not_applicable(symbol, a, b))
        };
    }
    if op.is_logical() {
        return if a.base() == BaseType::Boolean && b.base() == BaseType::Boolean {
            Ok(ValueType::of(BaseType::Boolean, optional))
        } else {
            Err(not_applicable(symbol, a, b))
        };
    }
    if op == BinOp::MissingFallback {
        return fallback_type(a, b);
    }
    temporal_type(op, a, b, optional)
}

fn arithmetic_type(
    op: BinOp,
    a: ValueType,
    b: ValueType,
    optional: bool,
) -> Result<ValueType, String> {
    let integers = a.base() == BaseType::Integer && b.base() == BaseType::Integer;
    let base = match op {
        BinOp::Divide => BaseType::Float,
        BinOp::FloorDivide if !integers => return Err(not_applicable(op.symbol(), a, b)),
        _ if integers => BaseType::Integer,
        _ => BaseType::Float,
    };
    Ok(ValueType::of(base, optional))
}

/// `a ?? b` is only optional if both sides are.
fn fallback_type(a: ValueType, b: ValueType) -> Result<ValueType, String> {
    let fails = || {
        format!(
            "Operator '??' is not applicable for {a} and {b}. \
             Types must be compatible, and at most one can be MISSING."
        )
    };
    if a.is_missing() && b.is_missing() {
        return Err(fails());
    }
    if a.is_missing() {
        return Ok(b);
    }
    if b.is_missing() {
        return Ok(a);
    }
    let optional = a.is_optional() && b.is_optional();
    a.join(b)
        .map(|joined| joined.with_optional(optional))
        .ok_or_else(fails)
}

fn temporal_type(
    op: BinOp,
    a: ValueType,
    b: ValueType,
    optional: bool,
) -> Result<ValueType, String> {
    use BaseType::{DateDuration, Integer, LocalDate, TimeDuration};

    let (x, y) = (a.base(), b.base());
    let result = match op {
        BinOp::Minus | BinOp::Plus => {
            let adding = op == BinOp::Plus;
            match (x, y) {
                (LocalDate, LocalDate) if !adding => Some(DateDuration),
                (DateDuration, DateDuration) => Some(DateDuration),
                (TimeDuration, TimeDuration) => Some(TimeDuration),
                _ if a.has_date_part() && y == DateDuration => Some(x),
                _ if a.has_time_part() && y == TimeDuration => Some(x),
                _ if !adding && x == y && a.has_time_part() => Some(TimeDuration),
                _ if (x == DateDuration && b.has_date_part())
                    || (x == TimeDuration && b.has_time_part()) =>
                {
                    return Err(if adding {
                        "When adding a duration and date-time, the date-time must be first.".into()
                    } else {
                        "When subtracting a duration and date-time, the date-time must be first"
                            .into()
                    });
                }
                _ if a.is_duration() && b.is_duration() => {
                    return Err(if adding {
                        "Cannot add two different types of duration.".into()
                    } else {
                        "Cannot subtract a duration from a different type of duration.".into()
                    });
                }
                _ => None,
            }
        }
        BinOp::Multiply => match (x, y) {
            (TimeDuration, Integer) | (Integer, TimeDuration) => Some(TimeDuration),
            (DateDuration, Integer) | (Integer, DateDuration) => Some(DateDuration),
            _ => None,
        },
        _ => None,
    };
    result
        .map(|base| ValueType::of(base, optional))
        .ok_or_else(|| not_applicable(op.symbol(), a, b))
}

/// `if (c) {a} else {b}` yields the join of both branches.
fn conditional_type(
    condition: ValueType,
    then: ValueType,
    otherwise: ValueType,
) -> Result<ValueType, String> {
    if condition.base() != BaseType::Boolean {
        return Err(format!("The condition must be BOOLEAN, but got {condition}."));
    }
    let joined = then.join(otherwise).ok_or_else(|| {
        format!("Both branches must have a common type, but got {then} and {otherwise}.")
    })?;
    Ok(joined.with_optional(joined.is_optional() || condition.is_optional()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;
    use crate::signature::{arg, is_anything};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    fn columns(id: &ColumnId) -> Result<ValueType, Unresolved> {
        if let Some(ty) = row_column_type(id) {
            return Ok(ty);
        }
        let ty = match id.name() {
            Some("i") => ValueType::INTEGER,
            Some("oi") => ValueType::OPT_INTEGER,
            Some("f") => ValueType::FLOAT,
            Some("s") => ValueType::STRING,
            Some("b") => ValueType::BOOLEAN,
            Some("ob") => ValueType::OPT_BOOLEAN,
            Some("d") => ValueType::LOCAL_DATE,
            Some("t") => ValueType::LOCAL_TIME,
            Some("z") => ValueType::ZONED_DATE_TIME,
            Some("dd") => ValueType::DATE_DURATION,
            Some("td") => ValueType::TIME_DURATION,
            Some("img") => {
                return Err(Unresolved::UnsupportedType(
                    "Column 'img' has an unsupported type.".into(),
                ));
            }
            name => {
                return Err(Unresolved::Missing(format!(
                    "No column with the name '{}' is available.",
                    name.unwrap_or_default()
                )));
            }
        };
        Ok(ty)
    }

    fn context() -> TypingContext<'static> {
        TypingContext::new()
            .with_columns(columns)
            .with_flow_variables(|name: &str| match name {
                "limit" => Ok(ValueType::INTEGER),
                _ => Err(format!("No flow variable with the name '{name}' is available.")),
            })
    }

    fn type_of(source: &str) -> Result<ValueType, CompileErrors> {
        infer(&parse(source).unwrap(), &context())
    }

    fn ok(source: &str) -> ValueType {
        type_of(source).unwrap()
    }

    fn first_error(source: &str) -> CompileError {
        type_of(source).unwrap_err().errors()[0].clone()
    }

    #[test]
    fn literals_and_accesses() {
        assert_eq!(ok("1"), ValueType::INTEGER);
        assert_eq!(ok("MISSING"), ValueType::MISSING);
        assert_eq!(ok("$oi"), ValueType::OPT_INTEGER);
        assert_eq!(ok("$[ROW_ID]"), ValueType::STRING);
        assert_eq!(ok("$[ROW_NUMBER]"), ValueType::INTEGER);
        assert_eq!(ok("$$limit"), ValueType::INTEGER);

        let err = first_error("$nope");
        assert_eq!(err.kind, CompileErrorKind::MissingColumn);
        assert!(err.message.contains("nope"));
        assert!(matches!(first_error("$$nope").kind, CompileErrorKind::MissingFlowVariable));
        assert!(matches!(first_error("$img").kind, CompileErrorKind::UnsupportedType));
    }

    #[test]
    fn arithmetic() {
        assert_eq!(ok("$i + 1"), ValueType::INTEGER);
        assert_eq!(ok("$oi * 2"), ValueType::OPT_INTEGER);
        assert_eq!(ok("$i / 2"), ValueType::FLOAT);
        assert_eq!(ok("$i % 2.0"), ValueType::FLOAT);
        assert_eq!(ok("$i ** 2"), ValueType::INTEGER);
        assert_eq!(ok("-$oi"), ValueType::OPT_INTEGER);
        assert!(type_of("$f // 2").is_err());
        assert!(type_of("1 + MISSING").is_err());
        assert!(type_of("TRUE + 1").is_err());
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(ok("$s + 1"), ValueType::STRING);
        assert_eq!(ok("1 + $s"), ValueType::STRING);
        assert_eq!(ok("\"a\" + MISSING"), ValueType::STRING);
        assert_eq!(ok("$s + $oi"), ValueType::STRING);
        assert!(type_of("$s - 1").is_err());
    }

    #[test]
    fn comparisons() {
        assert_eq!(ok("$oi < 2.5"), ValueType::BOOLEAN);
        assert_eq!(ok("$d >= $d"), ValueType::BOOLEAN);
        assert_eq!(ok("MISSING == 1"), ValueType::BOOLEAN);
        assert_eq!(ok("$oi = $f"), ValueType::BOOLEAN);
        assert!(type_of("$s < $s").is_err());
        assert!(type_of("$dd < $dd").is_err());
        assert!(type_of("$s == 1").is_err());
        assert_eq!(
            first_error("$z == $z").message,
            "Equality comparison is not supported for ZONED_DATE_TIME."
        );
    }

    #[test]
    fn logic() {
        assert_eq!(ok("$b and $ob"), ValueType::OPT_BOOLEAN);
        assert_eq!(ok("not $b"), ValueType::BOOLEAN);
        assert_eq!(
            first_error("not 1").message,
            "Operator 'not' is not applicable for INTEGER."
        );
    }

    #[test]
    fn missing_fallback() {
        assert_eq!(ok("$oi ?? 1"), ValueType::INTEGER);
        assert_eq!(ok("$oi ?? $oi"), ValueType::OPT_INTEGER);
        assert_eq!(ok("$oi ?? 2.5"), ValueType::FLOAT);
        assert_eq!(ok("MISSING ?? $s"), ValueType::STRING);
        assert!(first_error("MISSING ?? MISSING").message.contains("at most one can be MISSING"));
        assert!(type_of("$s ?? 1").is_err());
    }

    #[test]
    fn temporal_operators() {
        assert_eq!(ok("$d - $d"), ValueType::DATE_DURATION);
        assert_eq!(ok("$d + $dd"), ValueType::LOCAL_DATE);
        assert_eq!(ok("$t - $t"), ValueType::TIME_DURATION);
        assert_eq!(ok("$z + $td"), ValueType::ZONED_DATE_TIME);
        assert_eq!(ok("$td * 3"), ValueType::TIME_DURATION);
        assert_eq!(ok("2 * $dd"), ValueType::DATE_DURATION);
        assert_eq!(ok("-$td"), ValueType::TIME_DURATION);
        assert!(first_error("$dd + $d").message.contains("date-time must be first"));
        assert_eq!(
            first_error("$dd - $td").message,
            "Cannot subtract a duration from a different type of duration."
        );
        assert!(type_of("$t + $dd").is_err());
        assert!(first_error("$td - $z").message.contains("date-time must be first"));
        assert_eq!(
            first_error("$dd + $t").message,
            "Operator '+' is not applicable for DATE_DURATION and LOCAL_TIME."
        );
        assert_eq!(
            first_error("$td - $d").message,
            "Operator '-' is not applicable for TIME_DURATION and LOCAL_DATE."
        );
    }

    #[test]
    fn conditionals() {
        assert_eq!(ok("if ($b) { 1 } else { 2.0 }"), ValueType::FLOAT);
        assert_eq!(ok("if ($ob) { 1 } else { 2 }"), ValueType::OPT_INTEGER);
        assert_eq!(ok("if ($b) { MISSING } else { \"x\" }"), ValueType::OPT_STRING);
        assert!(type_of("if ($i) { 1 } else { 2 }").is_err());
        assert!(type_of("if ($b) { 1 } else { \"x\" }").is_err());
    }

    #[test]
    fn errors_accumulate_without_cascading() {
        let errors = type_of("($a + 1) * ($c + 2)").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.errors().iter().all(|e| e.kind == CompileErrorKind::MissingColumn));
        assert!(errors.errors()[0].message.contains("'a'"));
        assert!(errors.errors()[1].message.contains("'c'"));
    }

    #[test]
    fn every_node_is_annotated() {
        let ast = parse("abs($i - 2) + 1.5").unwrap();
        infer(&ast, &context()).unwrap();
        let mut untyped = 0;
        ast.walk(&mut |node| {
            if node.ty().is_none() {
                untyped += 1;
            }
        });
        assert_eq!(untyped, 0);
        assert_eq!(ast.ty(), Some(ValueType::FLOAT));
    }

    #[test]
    fn function_calls() {
        assert_eq!(ok("abs($oi)"), ValueType::OPT_INTEGER);
        let ast = parse("round(1.5)").unwrap();
        infer(&ast, &context()).unwrap();
        let AstKind::FunctionCall(call) = &ast.kind else { panic!() };
        assert!(matches!(call.resolution(), Some(Resolution::Function(_))));

        let err = first_error("abs(\"x\")");
        assert_eq!(err.kind, CompileErrorKind::ArgumentMismatch);
        assert!(err.message.starts_with("In function 'abs'"));
    }

    #[test]
    fn unknown_names_suggest_alternatives() {
        let err = first_error("lower_cas($s)");
        assert_eq!(err.kind, CompileErrorKind::UnknownFunction);
        assert!(err.message.contains("'lower_case'"));

        let err = first_error("COLUMN_MAXX(\"i\")");
        assert_eq!(err.kind, CompileErrorKind::UnknownAggregation);
        assert!(err.message.contains("'COLUMN_MAX'"));
    }

    #[test]
    fn custom_function_registry() {
        let functions = Registry::new([Function::new(
            "FN_WITH_NO_ARGS",
            crate::functions::Category::Control,
            "Always 1.",
        )
        .overload(
            vec![],
            |_| Ok(ValueType::INTEGER),
            |_, _| Ok(crate::computer::Computer::constant(Value::Integer(1))),
        )
        .overload(
            vec![arg("x", is_anything())],
            |_| Ok(ValueType::INTEGER),
            |_, _| Ok(crate::computer::Computer::constant(Value::Integer(1))),
        )]);
        let ctx = TypingContext::new().with_functions(&functions);

        let ast = Ast::function("FN_WITH_NO_ARGS", vec![]);
        assert_eq!(infer(&ast, &ctx).unwrap(), ValueType::INTEGER);

        let ast = Ast::function("FN_WITH_NO_ARGZ", vec![]);
        let errors = infer(&ast, &ctx).unwrap_err();
        assert!(errors.errors()[0].message.contains("FN_WITH_NO_ARGS"));

        let ast = Ast::function(
            "FN_WITH_NO_ARGS",
            vec![Arg::pos(Ast::integer(1)), Arg::pos(Ast::integer(2))],
        );
        let errors = infer(&ast, &ctx).unwrap_err();
        assert!(
            errors.errors()[0]
                .message
                .contains("No signature accepts the arguments (INTEGER, INTEGER)")
        );
    }

    #[test]
    fn aggregations() {
        assert_eq!(ok("COLUMN_MAX(\"i\")"), ValueType::OPT_INTEGER);
        assert_eq!(ok("COLUMN_AVERAGE(\"i\", ignore_nan=TRUE)"), ValueType::OPT_FLOAT);
        assert_eq!(ok("COLUMN_COUNT(\"s\")"), ValueType::INTEGER);

        let err = first_error("COLUMN_MAX($s)");
        assert_eq!(err.kind, CompileErrorKind::LiteralRequired);

        let err = first_error("COLUMN_SUM(\"nope\")");
        assert_eq!(err.kind, CompileErrorKind::MissingColumn);
        assert!(err.message.contains("No column with the name 'nope'"));

        assert!(matches!(
            first_error("COLUMN_SUM(\"s\")").kind,
            CompileErrorKind::ArgumentMismatch
        ));
    }

    #[test]
    fn display_lists_every_error() {
        let errors = type_of("$nope + $$gone").unwrap_err();
        let text = errors.to_string();
        assert!(text.starts_with("2 errors:"));
        assert!(text.contains("'nope'") && text.contains("'gone'"));
    }

    #[test]
    fn a_tree_is_typed_once() {
        let all = |ty: ValueType| {
            TypingContext::new().with_columns(move |_: &ColumnId| Ok::<_, String>(ty))
        };
        let (integer, float) = (all(ValueType::INTEGER), all(ValueType::FLOAT));

        let ast = parse("abs($x) + 1").unwrap();
        assert_eq!(infer(&ast, &integer).unwrap(), ValueType::INTEGER);
        assert_eq!(infer(&ast, &integer).unwrap(), ValueType::INTEGER);

        let errors = infer(&ast, &float).unwrap_err();
        assert_eq!(errors.errors()[0].kind, CompileErrorKind::AlreadyTyped);
        assert!(errors.errors()[0].message.contains("already typed as INTEGER, not FLOAT"));
        assert_eq!(ast.ty(), Some(ValueType::INTEGER));
    }
}
