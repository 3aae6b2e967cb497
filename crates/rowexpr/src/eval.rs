//! Evaluator: turns a typed `Ast` into a [`Computer`] tree
//!
//! Construction reads no rows. The host supplies computers for column,
//! flow-variable and aggregation accesses; those close over the host's
//! current row, so the tree built here can be re-evaluated row after row.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use thiserror::Error;

use crate::ast::{Ast, AstKind, BinOp, ColumnId, Resolution, UnaryOp};
use crate::computer::{Computer, Typed};
use crate::functions::render_float;
use crate::signature::ArgRef;
use crate::value::{Period, Value};
use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A per-row failure documented by an operator or function.
    #[error("{0}")]
    Evaluation(String),

    #[error("No computer is available for column {0}.")]
    UnresolvedColumn(String),

    #[error("No computer is available for flow variable '{0}'.")]
    UnresolvedFlowVariable(String),

    #[error("The aggregation '{0}' is not implemented.")]
    UnresolvedAggregation(String),

    #[error("{0} (this is an implementation error)")]
    Implementation(String),
}

pub type Result<T> = std::result::Result<T, EvalError>;

pub(crate) fn out_of_range(kind: BaseType) -> EvalError {
    EvalError::Evaluation(format!(
        "Result was outside the range of values representable by `{}`",
        kind.name()
    ))
}

// ============ Evaluation context ============

/// Per-evaluation services available to computers.
pub trait EvaluationContext {
    /// Records a non-fatal issue; never interrupts evaluation.
    fn add_warning(&self, message: String);

    /// The moment the evaluation started; `now()` and `today()` read this.
    fn execution_start_time(&self) -> DateTime<FixedOffset>;
}

/// Default context: collects distinct warnings up to a limit.
#[derive(Debug)]
pub struct EvalContext {
    execution_start: DateTime<FixedOffset>,
    warning_limit: usize,
    warnings: RefCell<Vec<String>>,
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalContext {
    pub const DEFAULT_WARNING_LIMIT: usize = 100;

    pub fn new() -> Self {
        Self {
            execution_start: Local::now().fixed_offset(),
            warning_limit: Self::DEFAULT_WARNING_LIMIT,
            warnings: RefCell::new(Vec::new()),
        }
    }

    pub fn with_execution_start(mut self, start: DateTime<FixedOffset>) -> Self {
        self.execution_start = start;
        self
    }

    pub fn with_warning_limit(mut self, limit: usize) -> Self {
        self.warning_limit = limit;
        self
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.borrow().clone()
    }

    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }
}

impl EvaluationContext for EvalContext {
    fn add_warning(&self, message: String) {
        let mut warnings = self.warnings.borrow_mut();
        if warnings.len() < self.warning_limit && !warnings.contains(&message) {
            log::debug!("evaluation warning: {message}");
            warnings.push(message);
        }
    }

    fn execution_start_time(&self) -> DateTime<FixedOffset> {
        self.execution_start
    }
}

// ============ Entry point ============

/// Builds the computer tree for a typed expression.
///
/// Fails fast: the first access a resolver cannot serve aborts construction.
pub fn evaluate(
    ast: &Ast,
    columns: impl Fn(&ColumnId) -> Option<Computer>,
    flow_variables: impl Fn(&str) -> Option<Computer>,
    aggregations: impl Fn(&Ast) -> Option<Computer>,
) -> Result<Computer> {
    let evaluator = Evaluator {
        columns: &columns,
        flow_variables: &flow_variables,
        aggregations: &aggregations,
    };
    let computer = evaluator.build(ast)?;
    log::trace!("built {} computer for `{ast}`", computer.base().name());
    Ok(computer)
}

struct Evaluator<'r> {
    columns: &'r dyn Fn(&ColumnId) -> Option<Computer>,
    flow_variables: &'r dyn Fn(&str) -> Option<Computer>,
    aggregations: &'r dyn Fn(&Ast) -> Option<Computer>,
}

fn type_of(ast: &Ast) -> Result<ValueType> {
    ast.ty().ok_or_else(|| {
        EvalError::Implementation(format!("expression `{ast}` was evaluated before typing"))
    })
}

impl Evaluator<'_> {
    fn build(&self, ast: &Ast) -> Result<Computer> {
        match &ast.kind {
            AstKind::Constant(c) => Ok(Computer::constant(c.to_value())),
            AstKind::ColumnAccess(id) => {
                (self.columns)(id).ok_or_else(|| EvalError::UnresolvedColumn(id.to_string()))
            }
            AstKind::FlowVarAccess(name) => (self.flow_variables)(name)
                .ok_or_else(|| EvalError::UnresolvedFlowVariable(name.clone())),
            AstKind::Unary(op, arg) => unary(*op, self.build(arg)?),
            AstKind::Binary(l, op, r) => {
                let out = type_of(ast)?;
                binary(*op, out.base(), self.build(l)?, self.build(r)?)
            }
            AstKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                let out = type_of(ast)?.base();
                let condition = self.build(condition)?.boolean()?;
                let then = self.build(then)?.coerce(out)?;
                let otherwise = self.build(otherwise)?.coerce(out)?;
                zip_kinds!(then, otherwise, |a, b| select(condition.clone(), a, b))
            }
            AstKind::FunctionCall(call) => {
                let Some(Resolution::Function(resolved)) = call.resolution() else {
                    return Err(EvalError::Implementation(format!(
                        "function '{}' was not resolved",
                        call.name
                    )));
                };
                let arguments = resolved.arguments.try_map(|arg| match arg {
                    ArgRef::Arg(idx) => match call.args.get(*idx) {
                        Some(arg) => self.build(arg.value()),
                        None => Err(EvalError::Implementation(format!(
                            "argument {idx} of '{}' does not exist",
                            call.name
                        ))),
                    },
                    ArgRef::Default(value) => Ok(Computer::constant(value.clone())),
                })?;
                let overload = resolved
                    .function
                    .overloads
                    .get(resolved.overload)
                    .ok_or_else(|| {
                        EvalError::Implementation(format!(
                            "overload {} of '{}' does not exist",
                            resolved.overload, call.name
                        ))
                    })?;
                (overload.implementation)(&arguments, type_of(ast)?)
            }
            AstKind::AggregationCall(call) => (self.aggregations)(ast)
                .ok_or_else(|| EvalError::UnresolvedAggregation(call.name.clone())),
        }
    }
}

// ============ Shared combinators ============

/// Pairs two computers of the same kind and rebuilds that kind from `$body`.
macro_rules! zip_kinds {
    ($a:expr, $b:expr, |$x:ident, $y:ident| $body:expr) => {{
        use $crate::computer::Computer as C;
        match ($a, $b) {
            (C::Missing, C::Missing) => Ok(C::Missing),
            (C::Boolean($x), C::Boolean($y)) => Ok(C::Boolean($body)),
            (C::Integer($x), C::Integer($y)) => Ok(C::Integer($body)),
            (C::Float($x), C::Float($y)) => Ok(C::Float($body)),
            (C::String($x), C::String($y)) => Ok(C::String($body)),
            (C::LocalDate($x), C::LocalDate($y)) => Ok(C::LocalDate($body)),
            (C::LocalTime($x), C::LocalTime($y)) => Ok(C::LocalTime($body)),
            (C::LocalDateTime($x), C::LocalDateTime($y)) => Ok(C::LocalDateTime($body)),
            (C::ZonedDateTime($x), C::ZonedDateTime($y)) => Ok(C::ZonedDateTime($body)),
            (C::DateDuration($x), C::DateDuration($y)) => Ok(C::DateDuration($body)),
            (C::TimeDuration($x), C::TimeDuration($y)) => Ok(C::TimeDuration($body)),
            (a, b) => Err($crate::eval::EvalError::Implementation(format!(
                "mismatched computer kinds {} and {}",
                a.base().name(),
                b.base().name()
            ))),
        }
    }};
}
pub(crate) use zip_kinds;

/// Present and true; a missing condition counts as false.
pub(crate) fn is_true(condition: &Typed<bool>, ctx: &dyn EvaluationContext) -> Result<bool> {
    Ok(!condition.is_missing(ctx)? && condition.compute(ctx)?)
}

/// `then` where `condition` holds, otherwise `otherwise`.
pub(crate) fn select<T: 'static>(
    condition: Typed<bool>,
    then: Typed<T>,
    otherwise: Typed<T>,
) -> Typed<T> {
    let (c, t, o) = (condition.clone(), then.clone(), otherwise.clone());
    Typed::new(
        move |ctx| {
            if is_true(&condition, ctx)? {
                then.compute(ctx)
            } else {
                otherwise.compute(ctx)
            }
        },
        move |ctx| {
            if is_true(&c, ctx)? {
                t.is_missing(ctx)
            } else {
                o.is_missing(ctx)
            }
        },
    )
}

/// `first` unless it is missing, then `second`.
pub(crate) fn fallback<T: 'static>(first: Typed<T>, second: Typed<T>) -> Typed<T> {
    let (f, s) = (first.clone(), second.clone());
    Typed::new(
        move |ctx| {
            if first.is_missing(ctx)? {
                second.compute(ctx)
            } else {
                first.compute(ctx)
            }
        },
        move |ctx| Ok(f.is_missing(ctx)? && s.is_missing(ctx)?),
    )
}

/// Combines two sources; missing if either is.
pub(crate) fn combine<A: 'static, B: 'static, T: 'static>(
    a: Typed<A>,
    b: Typed<B>,
    f: impl Fn(A, B, &dyn EvaluationContext) -> Result<T> + Send + Sync + 'static,
) -> Typed<T> {
    let (ma, mb) = (a.clone(), b.clone());
    Typed::new(
        move |ctx| f(a.compute(ctx)?, b.compute(ctx)?, ctx),
        move |ctx| Ok(ma.is_missing(ctx)? || mb.is_missing(ctx)?),
    )
}

// ============ Unary operators ============

fn unary(op: UnaryOp, arg: Computer) -> Result<Computer> {
    match (op, arg) {
        (UnaryOp::Not, Computer::Boolean(a)) => Ok(Computer::Boolean(a.map(|b| !b))),
        (UnaryOp::Minus, Computer::Integer(a)) => Ok(Computer::Integer(a.map(i64::wrapping_neg))),
        (UnaryOp::Minus, Computer::Float(a)) => Ok(Computer::Float(a.map(|x| -x))),
        (UnaryOp::Minus, Computer::TimeDuration(a)) => {
            Ok(Computer::TimeDuration(a.try_map(|d, _| {
                TimeDelta::zero()
                    .checked_sub(&d)
                    .ok_or_else(|| out_of_range(BaseType::TimeDuration))
            })))
        }
        (UnaryOp::Minus, Computer::DateDuration(a)) => {
            Ok(Computer::DateDuration(a.try_map(|p, _| {
                p.checked_neg()
                    .ok_or_else(|| out_of_range(BaseType::DateDuration))
            })))
        }
        (op, arg) => Err(EvalError::Implementation(format!(
            "operator '{}' cannot be applied to a {} computer",
            op.symbol(),
            arg.base().name()
        ))),
    }
}

// ============ Binary operators ============

fn binary(op: BinOp, out: BaseType, l: Computer, r: Computer) -> Result<Computer> {
    if op == BinOp::MissingFallback {
        let (l, r) = (l.coerce(out)?, r.coerce(out)?);
        return zip_kinds!(l, r, |a, b| fallback(a, b));
    }
    match out {
        BaseType::Boolean if op.is_ordering() => Ok(Computer::Boolean(ordering(op, l, r)?)),
        BaseType::Boolean if op.is_equality() => Ok(Computer::Boolean(equality(op, l, r))),
        BaseType::Boolean if op.is_logical() => {
            Ok(Computer::Boolean(logical(op, l.boolean()?, r.boolean()?)))
        }
        BaseType::Integer => Ok(Computer::Integer(integer_arithmetic(
            op,
            l.integer()?,
            r.integer()?,
        )?)),
        BaseType::Float => Ok(Computer::Float(float_arithmetic(op, l.float()?, r.float()?)?)),
        BaseType::String if op == BinOp::Plus => {
            let (a, b) = (l.to_string_computer(), r.to_string_computer());
            Ok(Computer::String(combine(a, b, |a, b, _| Ok(a + &b))))
        }
        _ if op.is_arithmetic() => temporal_arithmetic(op, out, l, r),
        _ => Err(unsupported_output(op, out)),
    }
}

fn unsupported_output(op: BinOp, out: BaseType) -> EvalError {
    EvalError::Implementation(format!(
        "output of operator '{}' cannot be {}",
        op.symbol(),
        out.name()
    ))
}

fn integer_arithmetic(op: BinOp, a: Typed<i64>, b: Typed<i64>) -> Result<Typed<i64>> {
    Ok(match op {
        BinOp::Plus => combine(a, b, |x, y, _| Ok(x.wrapping_add(y))),
        BinOp::Minus => combine(a, b, |x, y, _| Ok(x.wrapping_sub(y))),
        BinOp::Multiply => combine(a, b, |x, y, _| Ok(x.wrapping_mul(y))),
        BinOp::FloorDivide => combine(a, b, |x, y, ctx| {
            if y == 0 {
                ctx.add_warning("INTEGER division returned 0 because divisor was 0.".into());
                return Ok(0);
            }
            Ok(x.wrapping_div(y))
        }),
        BinOp::Remainder => combine(a, b, |x, y, ctx| {
            if y == 0 {
                ctx.add_warning("INTEGER modulo returned 0 because divisor was 0.".into());
                return Ok(0);
            }
            Ok(x.wrapping_rem(y))
        }),
        // Saturating cast, NaN becomes 0.
        BinOp::Exponent => combine(a, b, |x, y, _| Ok((x as f64).powf(y as f64) as i64)),
        _ => return Err(unsupported_output(op, BaseType::Integer)),
    })
}

fn float_division_warning(ctx: &dyn EvaluationContext, what: &str, result: f64) {
    ctx.add_warning(format!(
        "FLOAT {what} returned {} because divisor was 0.",
        render_float(result)
    ));
}

fn float_arithmetic(op: BinOp, a: Typed<f64>, b: Typed<f64>) -> Result<Typed<f64>> {
    Ok(match op {
        BinOp::Plus => combine(a, b, |x, y, _| Ok(x + y)),
        BinOp::Minus => combine(a, b, |x, y, _| Ok(x - y)),
        BinOp::Multiply => combine(a, b, |x, y, _| Ok(x * y)),
        BinOp::Divide => combine(a, b, |x, y, ctx| {
            let result = x / y;
            if y == 0.0 {
                float_division_warning(ctx, "division", result);
            }
            Ok(result)
        }),
        BinOp::Remainder => combine(a, b, |x, y, ctx| {
            let result = x % y;
            if y == 0.0 {
                float_division_warning(ctx, "modulo", result);
            }
            Ok(result)
        }),
        BinOp::Exponent => combine(a, b, |x, y, _| Ok(x.powf(y))),
        _ => return Err(unsupported_output(op, BaseType::Float)),
    })
}

// ============ Comparisons ============

type Comparator = Arc<dyn Fn(&dyn EvaluationContext) -> Result<Ordering> + Send + Sync>;

fn ord_comparator<T: Ord + 'static>(a: Typed<T>, b: Typed<T>) -> Comparator {
    Arc::new(move |ctx| Ok(a.compute(ctx)?.cmp(&b.compute(ctx)?)))
}

/// Compares present values. FLOAT follows a total order with NaN largest.
fn comparator(l: &Computer, r: &Computer) -> Result<Comparator> {
    if matches!(l, Computer::Float(_)) || matches!(r, Computer::Float(_)) {
        let (a, b) = (l.float()?, r.float()?);
        return Ok(Arc::new(move |ctx| {
            Ok(a.compute(ctx)?.total_cmp(&b.compute(ctx)?))
        }));
    }
    Ok(match (l, r) {
        (Computer::Integer(a), Computer::Integer(b)) => ord_comparator(a.clone(), b.clone()),
        (Computer::TimeDuration(a), Computer::TimeDuration(b)) => {
            ord_comparator(a.clone(), b.clone())
        }
        (Computer::LocalDate(a), Computer::LocalDate(b)) => ord_comparator(a.clone(), b.clone()),
        (Computer::LocalTime(a), Computer::LocalTime(b)) => ord_comparator(a.clone(), b.clone()),
        (Computer::LocalDateTime(a), Computer::LocalDateTime(b)) => {
            ord_comparator(a.clone(), b.clone())
        }
        (Computer::ZonedDateTime(a), Computer::ZonedDateTime(b)) => {
            ord_comparator(a.clone(), b.clone())
        }
        (a, b) => {
            return Err(EvalError::Implementation(format!(
                "{} and {} are not comparable",
                a.base().name(),
                b.base().name()
            )));
        }
    })
}

/// `<` and `>` are false when either side is missing; `<=` and `>=` are
/// true when both are missing. Never missing itself.
fn ordering(op: BinOp, l: Computer, r: Computer) -> Result<Typed<bool>> {
    let compare = comparator(&l, &r)?;
    let accepts: fn(Ordering) -> bool = match op {
        BinOp::LessThan => Ordering::is_lt,
        BinOp::LessThanEqual => Ordering::is_le,
        BinOp::GreaterThan => Ordering::is_gt,
        BinOp::GreaterThanEqual => Ordering::is_ge,
        _ => return Err(unsupported_output(op, BaseType::Boolean)),
    };
    let inclusive = matches!(op, BinOp::LessThanEqual | BinOp::GreaterThanEqual);
    Ok(Typed::present(move |ctx| {
        let (lm, rm) = (l.is_missing(ctx)?, r.is_missing(ctx)?);
        if lm || rm {
            return Ok(inclusive && lm && rm);
        }
        Ok(accepts(compare(ctx)?))
    }))
}

/// Two missing values are equal; missing and present are not. Never missing.
fn equality(op: BinOp, l: Computer, r: Computer) -> Typed<bool> {
    let negate = op == BinOp::NotEqual;
    Typed::present(move |ctx| {
        let equal = values_equal(&l.value(ctx)?, &r.value(ctx)?);
        Ok(equal != negate)
    })
}

/// Equality of present values; INTEGER and FLOAT compare numerically.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Missing, Value::Missing) => true,
        (Value::Integer(x), Value::Float(y)) | (Value::Float(y), Value::Integer(x)) => {
            *x as f64 == *y
        }
        _ => a == b,
    }
}

// ============ Three-valued logic ============

fn truth(c: &Typed<bool>, ctx: &dyn EvaluationContext) -> Result<Option<bool>> {
    if c.is_missing(ctx)? {
        Ok(None)
    } else {
        c.compute(ctx).map(Some)
    }
}

fn logical(op: BinOp, a: Typed<bool>, b: Typed<bool>) -> Typed<bool> {
    // `dominant` decides the result on its own: false for AND, true for OR.
    let dominant = op == BinOp::Or;
    let decide = Arc::new(move |ctx: &dyn EvaluationContext| -> Result<Option<bool>> {
        let first = truth(&a, ctx)?;
        if first == Some(dominant) {
            return Ok(first);
        }
        let second = truth(&b, ctx)?;
        if second == Some(dominant) {
            return Ok(second);
        }
        Ok(match (first, second) {
            (Some(_), Some(_)) => Some(!dominant),
            _ => None,
        })
    });
    let decide_missing = Arc::clone(&decide);
    Typed::new(
        move |ctx| Ok(decide(ctx)? == Some(true)),
        move |ctx| Ok(decide_missing(ctx)?.is_none()),
    )
}

// ============ Temporal arithmetic ============

fn checked<T>(value: Option<T>, kind: BaseType) -> Result<T> {
    value.ok_or_else(|| out_of_range(kind))
}

/// `d * n` without the `i32` limit of `TimeDelta::checked_mul`.
fn scale_duration(d: TimeDelta, n: i64) -> Option<TimeDelta> {
    let secs = d.num_seconds().checked_mul(n)?;
    let nanos = i64::from(d.subsec_nanos()).checked_mul(n)?;
    TimeDelta::try_seconds(secs)?.checked_add(&TimeDelta::nanoseconds(nanos))
}

fn scale_period(p: Period, n: i64) -> Option<Period> {
    p.checked_mul(i32::try_from(n).ok()?)
}

pub(crate) fn add_period_zoned(
    z: DateTime<FixedOffset>,
    p: Period,
) -> Option<DateTime<FixedOffset>> {
    p.add_to_datetime(z.naive_local())?
        .and_local_timezone(*z.offset())
        .single()
}

fn temporal_arithmetic(op: BinOp, out: BaseType, l: Computer, r: Computer) -> Result<Computer> {
    use BinOp::{Minus, Multiply, Plus};
    use Computer as C;

    let kind = out;
    let sign = |op: BinOp| if op == Minus { -1 } else { 1 };
    Ok(match (op, l, r) {
        // durations with durations
        (Plus | Minus, C::TimeDuration(a), C::TimeDuration(b)) => {
            C::TimeDuration(combine(a, b, move |x, y, _| {
                let y = if op == Minus { TimeDelta::zero().checked_sub(&y) } else { Some(y) };
                checked(y.and_then(|y| x.checked_add(&y)), kind)
            }))
        }
        (Plus | Minus, C::DateDuration(a), C::DateDuration(b)) => {
            C::DateDuration(combine(a, b, move |x, y, _| {
                let result = if op == Minus { x.checked_sub(y) } else { x.checked_add(y) };
                checked(result, kind)
            }))
        }
        (Multiply, C::TimeDuration(a), C::Integer(n))
        | (Multiply, C::Integer(n), C::TimeDuration(a)) => {
            C::TimeDuration(combine(a, n, move |d, n, _| checked(scale_duration(d, n), kind)))
        }
        (Multiply, C::DateDuration(a), C::Integer(n))
        | (Multiply, C::Integer(n), C::DateDuration(a)) => {
            C::DateDuration(combine(a, n, move |p, n, _| checked(scale_period(p, n), kind)))
        }

        // differences of points in time
        (Minus, C::LocalDate(a), C::LocalDate(b)) => {
            C::DateDuration(combine(a, b, |x: NaiveDate, y, _| Ok(Period::between(y, x))))
        }
        (Minus, C::LocalTime(a), C::LocalTime(b)) => {
            C::TimeDuration(combine(a, b, |x: NaiveTime, y, _| Ok(x.signed_duration_since(y))))
        }
        (Minus, C::LocalDateTime(a), C::LocalDateTime(b)) => C::TimeDuration(combine(
            a,
            b,
            |x: NaiveDateTime, y, _| Ok(x.signed_duration_since(y)),
        )),
        (Minus, C::ZonedDateTime(a), C::ZonedDateTime(b)) => C::TimeDuration(combine(
            a,
            b,
            |x: DateTime<FixedOffset>, y, _| Ok(x.signed_duration_since(y)),
        )),

        // points in time shifted by durations
        (Plus | Minus, C::LocalDate(a), C::DateDuration(p)) => {
            C::LocalDate(combine(a, p, move |d, p, _| {
                let p = checked(p.checked_mul(sign(op)), kind)?;
                checked(p.add_to_date(d), kind)
            }))
        }
        (Plus | Minus, C::LocalTime(a), C::TimeDuration(d)) => {
            // Wraps around midnight.
            C::LocalTime(combine(a, d, move |t, d, _| {
                Ok(if op == Minus {
                    t.overflowing_sub_signed(d).0
                } else {
                    t.overflowing_add_signed(d).0
                })
            }))
        }
        (Plus | Minus, C::LocalDateTime(a), C::TimeDuration(d)) => {
            C::LocalDateTime(combine(a, d, move |t, d, _| {
                let result = if op == Minus {
                    t.checked_sub_signed(d)
                } else {
                    t.checked_add_signed(d)
                };
                checked(result, kind)
            }))
        }
        (Plus | Minus, C::LocalDateTime(a), C::DateDuration(p)) => {
            C::LocalDateTime(combine(a, p, move |t, p, _| {
                let p = checked(p.checked_mul(sign(op)), kind)?;
                checked(p.add_to_datetime(t), kind)
            }))
        }
        (Plus | Minus, C::ZonedDateTime(a), C::TimeDuration(d)) => {
            C::ZonedDateTime(combine(a, d, move |t, d, _| {
                let result = if op == Minus {
                    t.checked_sub_signed(d)
                } else {
                    t.checked_add_signed(d)
                };
                checked(result, kind)
            }))
        }
        (Plus | Minus, C::ZonedDateTime(a), C::DateDuration(p)) => {
            C::ZonedDateTime(combine(a, p, move |t, p, _| {
                let p = checked(p.checked_mul(sign(op)), kind)?;
                checked(add_period_zoned(t, p), kind)
            }))
        }
        (op, l, r) => {
            return Err(EvalError::Implementation(format!(
                "operator '{}' is not defined for {} and {}",
                op.symbol(),
                l.base().name(),
                r.base().name()
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computer::testing;
    use crate::typing::{TypingContext, infer};

    fn no_columns(_: &ColumnId) -> Option<Computer> {
        None
    }

    fn no_flow_variables(_: &str) -> Option<Computer> {
        None
    }

    fn no_aggregations(_: &Ast) -> Option<Computer> {
        None
    }

    fn eval_with(
        source: &str,
        columns: &[(&str, ValueType, Computer)],
    ) -> (Result<Value>, Vec<String>) {
        let ast = crate::parse::parse(source).unwrap();
        let types: Vec<(String, ValueType)> = columns
            .iter()
            .map(|(n, t, _)| (n.to_string(), *t))
            .collect();
        let ctx = TypingContext::new().with_columns(move |id: &ColumnId| {
            let name = id.name().unwrap_or_default();
            types
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| *t)
                .ok_or_else(|| format!("No column with the name '{name}' is available."))
        });
        infer(&ast, &ctx).unwrap();
        let computer = evaluate(
            &ast,
            |id| {
                columns
                    .iter()
                    .find(|(n, _, _)| Some(*n) == id.name())
                    .map(|(_, _, c)| c.clone())
            },
            no_flow_variables,
            no_aggregations,
        )
        .unwrap();
        let eval_ctx = EvalContext::new();
        let value = computer.value(&eval_ctx);
        (value, eval_ctx.warnings())
    }

    fn eval(source: &str) -> Value {
        eval_with(source, &[]).0.unwrap()
    }

    #[test]
    fn arithmetic() {
        assert_eq!(eval("1 + 2"), Value::Integer(3));
        assert_eq!(eval("1 + 2.0"), Value::Float(3.0));
        assert_eq!(eval("7 // 2"), Value::Integer(3));
        assert_eq!(eval("-7 // 2"), Value::Integer(-3));
        assert_eq!(eval("7 % -3"), Value::Integer(1));
        assert_eq!(eval("2 ** 10"), Value::Integer(1024));
        assert_eq!(eval("2 ** -1"), Value::Integer(0));
        assert_eq!(eval("1 / 4"), Value::Float(0.25));
        assert_eq!(eval("MAX_INTEGER + 1"), Value::Integer(i64::MIN));
        assert_eq!(eval("-2 ** 2"), Value::Integer(-4));
    }

    #[test]
    fn division_by_zero_warns() {
        let (value, warnings) = eval_with("10 // 0", &[]);
        assert_eq!(value.unwrap(), Value::Integer(0));
        assert_eq!(warnings, ["INTEGER division returned 0 because divisor was 0."]);

        let (value, warnings) = eval_with("10.0 / 0.0", &[]);
        assert_eq!(value.unwrap(), Value::Float(f64::INFINITY));
        assert_eq!(warnings, ["FLOAT division returned INFINITY because divisor was 0."]);

        let (value, warnings) = eval_with("-1 / 0", &[]);
        assert_eq!(value.unwrap(), Value::Float(f64::NEG_INFINITY));
        assert_eq!(warnings, ["FLOAT division returned -INFINITY because divisor was 0."]);

        let (value, _) = eval_with("0.0 / 0.0", &[]);
        assert!(matches!(value.unwrap(), Value::Float(x) if x.is_nan()));
    }

    #[test]
    fn string_concatenation_renders_missing() {
        assert_eq!(eval("\"a\" + MISSING"), Value::String("aMISSING".into()));
        assert_eq!(eval("1 + \"a\" + 2.5"), Value::String("1a2.5".into()));
        assert_eq!(eval("\"x\" + TRUE"), Value::String("xtrue".into()));
    }

    #[test]
    fn equality_never_missing() {
        assert_eq!(eval("MISSING == MISSING"), Value::Boolean(true));
        assert_eq!(eval("MISSING == 5"), Value::Boolean(false));
        assert_eq!(eval("MISSING != 5"), Value::Boolean(true));
        assert_eq!(eval("1 == 1.0"), Value::Boolean(true));
        assert_eq!(eval("\"a\" = \"a\""), Value::Boolean(true));
    }

    #[test]
    fn ordering_with_missing_operands() {
        let cols = [
            ("m", ValueType::OPT_INTEGER, testing::integer(None)),
            ("n", ValueType::OPT_INTEGER, testing::integer(None)),
            ("x", ValueType::OPT_INTEGER, testing::integer(Some(3))),
        ];
        assert_eq!(eval_with("$m < $x", &cols).0.unwrap(), Value::Boolean(false));
        assert_eq!(eval_with("$m <= $n", &cols).0.unwrap(), Value::Boolean(true));
        assert_eq!(eval_with("$m >= $x", &cols).0.unwrap(), Value::Boolean(false));
        assert_eq!(eval_with("$x > 2.5", &cols).0.unwrap(), Value::Boolean(true));
    }

    #[test]
    fn kleene_logic() {
        let cols = [
            ("t", ValueType::OPT_BOOLEAN, testing::boolean(Some(true))),
            ("f", ValueType::OPT_BOOLEAN, testing::boolean(Some(false))),
            ("u", ValueType::OPT_BOOLEAN, testing::boolean(None)),
        ];
        let run = |s: &str| eval_with(s, &cols).0.unwrap();
        assert_eq!(run("$t and $u"), Value::Missing);
        assert_eq!(run("$u and $f"), Value::Boolean(false));
        assert_eq!(run("$f and $u"), Value::Boolean(false));
        assert_eq!(run("$u or $t"), Value::Boolean(true));
        assert_eq!(run("$u or $f"), Value::Missing);
        assert_eq!(run("$f or $f"), Value::Boolean(false));
        assert_eq!(run("not $u"), Value::Missing);
        assert_eq!(run("not $t"), Value::Boolean(false));
    }

    #[test]
    fn missing_fallback_and_conditionals() {
        let cols = [
            ("m", ValueType::OPT_INTEGER, testing::integer(None)),
            ("c", ValueType::OPT_BOOLEAN, testing::boolean(None)),
        ];
        let run = |s: &str| eval_with(s, &cols).0.unwrap();
        assert_eq!(run("$m ?? 2.5"), Value::Float(2.5));
        assert_eq!(run("3 ?? $m"), Value::Integer(3));
        assert_eq!(run("if ($c) { 1 } else { 2 }"), Value::Integer(2));
        assert_eq!(run("if (TRUE) { $m } else { 2.0 }"), Value::Missing);
        assert_eq!(run("if (FALSE) { MISSING } else { 2 }"), Value::Integer(2));
    }

    #[test]
    fn missing_propagates_through_arithmetic() {
        let cols = [("m", ValueType::OPT_FLOAT, testing::float(None))];
        assert_eq!(eval_with("$m * 2 + 1", &cols).0.unwrap(), Value::Missing);
    }

    #[test]
    fn unresolved_accesses_fail_fast() {
        let ast = Ast::binary(Ast::column("a"), BinOp::Plus, Ast::integer(1));
        ast.set_type(ValueType::INTEGER).unwrap();
        let err = evaluate(&ast, no_columns, no_flow_variables, no_aggregations).unwrap_err();
        assert!(matches!(err, EvalError::UnresolvedColumn(_)));
    }

    #[test]
    fn warnings_are_deduplicated_and_bounded() {
        let ctx = EvalContext::new().with_warning_limit(2);
        ctx.add_warning("a".into());
        ctx.add_warning("a".into());
        ctx.add_warning("b".into());
        ctx.add_warning("c".into());
        assert_eq!(ctx.warnings(), ["a", "b"]);
    }
}
