//! Typed lazy value sources
//!
//! A [`Computer`] produces one value per row for exactly one base kind. The
//! host asks `is_missing` first and only calls `compute` on a present value;
//! parents follow the same protocol for their children. Computers hold no
//! row position themselves: resolvers supplied by the host close over it.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};

use crate::eval::{EvalError, EvaluationContext, Result};
use crate::value::{Period, Value};
use crate::value_type::BaseType;

type ComputeFn<T> = Arc<dyn Fn(&dyn EvaluationContext) -> Result<T> + Send + Sync>;
type MissingFn = Arc<dyn Fn(&dyn EvaluationContext) -> Result<bool> + Send + Sync>;

/// Lazy source of `T` values that may be missing.
pub struct Typed<T> {
    compute: ComputeFn<T>,
    is_missing: MissingFn,
}

impl<T> Clone for Typed<T> {
    fn clone(&self) -> Self {
        Self {
            compute: Arc::clone(&self.compute),
            is_missing: Arc::clone(&self.is_missing),
        }
    }
}

impl<T: 'static> Typed<T> {
    pub fn new(
        compute: impl Fn(&dyn EvaluationContext) -> Result<T> + Send + Sync + 'static,
        is_missing: impl Fn(&dyn EvaluationContext) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            compute: Arc::new(compute),
            is_missing: Arc::new(is_missing),
        }
    }

    /// A source that is never missing.
    pub fn present(
        compute: impl Fn(&dyn EvaluationContext) -> Result<T> + Send + Sync + 'static,
    ) -> Self {
        Self::new(compute, |_| Ok(false))
    }

    /// A source that is always missing.
    pub fn missing() -> Self {
        Self::new(
            |_| {
                Err(EvalError::Implementation(
                    "compute called on a missing value".to_string(),
                ))
            },
            |_| Ok(true),
        )
    }

    pub fn compute(&self, ctx: &dyn EvaluationContext) -> Result<T> {
        (self.compute)(ctx)
    }

    pub fn is_missing(&self, ctx: &dyn EvaluationContext) -> Result<bool> {
        (self.is_missing)(ctx)
    }

    /// Applies `f` to present values; missing stays missing.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Typed<U> {
        let missing = self.clone();
        Typed::new(
            move |ctx| self.compute(ctx).map(&f),
            move |ctx| missing.is_missing(ctx),
        )
    }

    /// Like [`Typed::map`], but `f` may fail or warn through the context.
    pub fn try_map<U: 'static>(
        self,
        f: impl Fn(T, &dyn EvaluationContext) -> Result<U> + Send + Sync + 'static,
    ) -> Typed<U> {
        let missing = self.clone();
        Typed::new(
            move |ctx| f(self.compute(ctx)?, ctx),
            move |ctx| missing.is_missing(ctx),
        )
    }
}

impl<T: Clone + Send + Sync + 'static> Typed<T> {
    pub fn constant(value: T) -> Self {
        Self::present(move |_| Ok(value.clone()))
    }
}

impl<T> fmt::Debug for Typed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Typed(..)")
    }
}

/// `true` if any of `computers` is missing for the current row.
pub fn any_missing(computers: &[Computer], ctx: &dyn EvaluationContext) -> Result<bool> {
    for c in computers {
        if c.is_missing(ctx)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[derive(Clone, Debug)]
pub enum Computer {
    Missing,
    Boolean(Typed<bool>),
    Integer(Typed<i64>),
    Float(Typed<f64>),
    String(Typed<String>),
    LocalDate(Typed<NaiveDate>),
    LocalTime(Typed<NaiveTime>),
    LocalDateTime(Typed<NaiveDateTime>),
    ZonedDateTime(Typed<DateTime<FixedOffset>>),
    DateDuration(Typed<Period>),
    TimeDuration(Typed<TimeDelta>),
}

macro_rules! accessor {
    ($(#[$doc:meta])* $name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $name(&self) -> Result<Typed<$ty>> {
            match self {
                Computer::$variant(c) => Ok(c.clone()),
                Computer::Missing => Ok(Typed::missing()),
                other => Err(kind_mismatch(BaseType::$variant, other)),
            }
        }
    };
}

fn kind_mismatch(expected: BaseType, got: &Computer) -> EvalError {
    EvalError::Implementation(format!(
        "expected a {} computer, got {}",
        expected.name(),
        got.base().name()
    ))
}

impl Computer {
    pub fn base(&self) -> BaseType {
        match self {
            Computer::Missing => BaseType::Missing,
            Computer::Boolean(_) => BaseType::Boolean,
            Computer::Integer(_) => BaseType::Integer,
            Computer::Float(_) => BaseType::Float,
            Computer::String(_) => BaseType::String,
            Computer::LocalDate(_) => BaseType::LocalDate,
            Computer::LocalTime(_) => BaseType::LocalTime,
            Computer::LocalDateTime(_) => BaseType::LocalDateTime,
            Computer::ZonedDateTime(_) => BaseType::ZonedDateTime,
            Computer::DateDuration(_) => BaseType::DateDuration,
            Computer::TimeDuration(_) => BaseType::TimeDuration,
        }
    }

    pub fn is_missing(&self, ctx: &dyn EvaluationContext) -> Result<bool> {
        match self {
            Computer::Missing => Ok(true),
            Computer::Boolean(c) => c.is_missing(ctx),
            Computer::Integer(c) => c.is_missing(ctx),
            Computer::Float(c) => c.is_missing(ctx),
            Computer::String(c) => c.is_missing(ctx),
            Computer::LocalDate(c) => c.is_missing(ctx),
            Computer::LocalTime(c) => c.is_missing(ctx),
            Computer::LocalDateTime(c) => c.is_missing(ctx),
            Computer::ZonedDateTime(c) => c.is_missing(ctx),
            Computer::DateDuration(c) => c.is_missing(ctx),
            Computer::TimeDuration(c) => c.is_missing(ctx),
        }
    }

    /// Evaluates the current row: `is_missing`, then `compute` if present.
    pub fn value(&self, ctx: &dyn EvaluationContext) -> Result<Value> {
        if self.is_missing(ctx)? {
            return Ok(Value::Missing);
        }
        Ok(match self {
            Computer::Missing => Value::Missing,
            Computer::Boolean(c) => Value::Boolean(c.compute(ctx)?),
            Computer::Integer(c) => Value::Integer(c.compute(ctx)?),
            Computer::Float(c) => Value::Float(c.compute(ctx)?),
            Computer::String(c) => Value::String(c.compute(ctx)?),
            Computer::LocalDate(c) => Value::LocalDate(c.compute(ctx)?),
            Computer::LocalTime(c) => Value::LocalTime(c.compute(ctx)?),
            Computer::LocalDateTime(c) => Value::LocalDateTime(c.compute(ctx)?),
            Computer::ZonedDateTime(c) => Value::ZonedDateTime(c.compute(ctx)?),
            Computer::DateDuration(c) => Value::DateDuration(c.compute(ctx)?),
            Computer::TimeDuration(c) => Value::TimeDuration(c.compute(ctx)?),
        })
    }

    /// The string form of the current row's value; `"MISSING"` when absent.
    pub fn string_representation(&self, ctx: &dyn EvaluationContext) -> Result<String> {
        Ok(self.value(ctx)?.to_string())
    }

    /// A never-missing STRING source rendering this computer's values.
    pub fn to_string_computer(&self) -> Typed<String> {
        let this = self.clone();
        Typed::present(move |ctx| this.string_representation(ctx))
    }

    pub fn constant(value: Value) -> Computer {
        match value {
            Value::Missing => Computer::Missing,
            Value::Boolean(b) => Computer::Boolean(Typed::constant(b)),
            Value::Integer(n) => Computer::Integer(Typed::constant(n)),
            Value::Float(x) => Computer::Float(Typed::constant(x)),
            Value::String(s) => Computer::String(Typed::constant(s)),
            Value::LocalDate(d) => Computer::LocalDate(Typed::constant(d)),
            Value::LocalTime(t) => Computer::LocalTime(Typed::constant(t)),
            Value::LocalDateTime(dt) => Computer::LocalDateTime(Typed::constant(dt)),
            Value::ZonedDateTime(z) => Computer::ZonedDateTime(Typed::constant(z)),
            Value::DateDuration(p) => Computer::DateDuration(Typed::constant(p)),
            Value::TimeDuration(d) => Computer::TimeDuration(Typed::constant(d)),
        }
    }

    /// A computer of kind `base` over host cells: `read` yields the current
    /// row's value, [`Value::Missing`] when absent. INTEGER cells are widened
    /// for a FLOAT source.
    pub fn from_source(
        base: BaseType,
        read: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Computer {
        type Read = Arc<dyn Fn() -> Value + Send + Sync>;

        fn cells<T: 'static>(read: Read, unpack: fn(Value) -> Option<T>) -> Typed<T> {
            let peek = Arc::clone(&read);
            Typed::new(
                move |_| {
                    unpack(read()).ok_or_else(|| {
                        EvalError::Implementation("cell value has the wrong kind".to_string())
                    })
                },
                move |_| Ok(peek().is_missing()),
            )
        }

        let read: Read = Arc::new(read);
        match base {
            BaseType::Missing => Computer::Missing,
            BaseType::Boolean => Computer::Boolean(cells(read, |v| v.as_bool())),
            BaseType::Integer => Computer::Integer(cells(read, |v| v.as_int())),
            BaseType::Float => Computer::Float(cells(read, |v| v.as_float())),
            BaseType::String => Computer::String(cells(read, |v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })),
            BaseType::LocalDate => Computer::LocalDate(cells(read, |v| match v {
                Value::LocalDate(d) => Some(d),
                _ => None,
            })),
            BaseType::LocalTime => Computer::LocalTime(cells(read, |v| match v {
                Value::LocalTime(t) => Some(t),
                _ => None,
            })),
            BaseType::LocalDateTime => Computer::LocalDateTime(cells(read, |v| match v {
                Value::LocalDateTime(dt) => Some(dt),
                _ => None,
            })),
            BaseType::ZonedDateTime => Computer::ZonedDateTime(cells(read, |v| match v {
                Value::ZonedDateTime(z) => Some(z),
                _ => None,
            })),
            BaseType::DateDuration => Computer::DateDuration(cells(read, |v| match v {
                Value::DateDuration(p) => Some(p),
                _ => None,
            })),
            BaseType::TimeDuration => Computer::TimeDuration(cells(read, |v| match v {
                Value::TimeDuration(d) => Some(d),
                _ => None,
            })),
        }
    }

    /// An always-missing computer of the given kind.
    pub fn missing_of(base: BaseType) -> Computer {
        match base {
            BaseType::Missing => Computer::Missing,
            BaseType::Boolean => Computer::Boolean(Typed::missing()),
            BaseType::Integer => Computer::Integer(Typed::missing()),
            BaseType::Float => Computer::Float(Typed::missing()),
            BaseType::String => Computer::String(Typed::missing()),
            BaseType::LocalDate => Computer::LocalDate(Typed::missing()),
            BaseType::LocalTime => Computer::LocalTime(Typed::missing()),
            BaseType::LocalDateTime => Computer::LocalDateTime(Typed::missing()),
            BaseType::ZonedDateTime => Computer::ZonedDateTime(Typed::missing()),
            BaseType::DateDuration => Computer::DateDuration(Typed::missing()),
            BaseType::TimeDuration => Computer::TimeDuration(Typed::missing()),
        }
    }

    /// Converts to `target`: identity, INTEGER widened to FLOAT, or MISSING
    /// to an always-missing computer of the target kind.
    pub fn coerce(self, target: BaseType) -> Result<Computer> {
        if self.base() == target {
            return Ok(self);
        }
        match (self, target) {
            (Computer::Missing, target) => Ok(Computer::missing_of(target)),
            (c @ Computer::Integer(_), BaseType::Float) => Ok(Computer::Float(c.float()?)),
            (other, target) => Err(kind_mismatch(target, &other)),
        }
    }

    accessor!(boolean, Boolean, bool);
    accessor!(integer, Integer, i64);
    accessor!(string, String, String);
    accessor!(local_date, LocalDate, NaiveDate);
    accessor!(local_time, LocalTime, NaiveTime);
    accessor!(local_date_time, LocalDateTime, NaiveDateTime);
    accessor!(zoned_date_time, ZonedDateTime, DateTime<FixedOffset>);
    accessor!(date_duration, DateDuration, Period);
    accessor!(time_duration, TimeDuration, TimeDelta);

    /// FLOAT view; INTEGER values are widened.
    pub fn float(&self) -> Result<Typed<f64>> {
        match self {
            Computer::Float(c) => Ok(c.clone()),
            Computer::Integer(c) => Ok(c.clone().map(|n| n as f64)),
            Computer::Missing => Ok(Typed::missing()),
            other => Err(kind_mismatch(BaseType::Float, other)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Computers that check the evaluation protocol: `compute` panics unless
    //! `is_missing` was asked first and reported a present value.

    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn checked<T: Clone + Send + Sync + 'static>(value: Option<T>) -> Typed<T> {
        let asked = Arc::new(AtomicBool::new(false));
        let asked_in_compute = Arc::clone(&asked);
        let present = value.is_some();
        Typed::new(
            move |_| {
                assert!(
                    asked_in_compute.load(Ordering::SeqCst),
                    "compute called before is_missing"
                );
                Ok(value.clone().expect("compute called on a missing value"))
            },
            move |_| {
                asked.store(true, Ordering::SeqCst);
                Ok(!present)
            },
        )
    }

    pub fn boolean(value: Option<bool>) -> Computer {
        Computer::Boolean(checked(value))
    }

    pub fn integer(value: Option<i64>) -> Computer {
        Computer::Integer(checked(value))
    }

    pub fn float(value: Option<f64>) -> Computer {
        Computer::Float(checked(value))
    }

    pub fn string(value: Option<&str>) -> Computer {
        Computer::String(checked(value.map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalContext;

    #[test]
    fn constants_and_missing() {
        let ctx = EvalContext::new();
        assert_eq!(
            Computer::constant(Value::Integer(3)).value(&ctx).unwrap(),
            Value::Integer(3)
        );
        assert_eq!(Computer::Missing.value(&ctx).unwrap(), Value::Missing);
        assert!(
            Computer::missing_of(BaseType::Float)
                .is_missing(&ctx)
                .unwrap()
        );
    }

    #[test]
    fn integer_widens_to_float() {
        let ctx = EvalContext::new();
        let c = Computer::constant(Value::Integer(2))
            .coerce(BaseType::Float)
            .unwrap();
        assert!(matches!(c, Computer::Float(_)));
        assert_eq!(c.value(&ctx).unwrap(), Value::Float(2.0));
        assert!(
            Computer::constant(Value::Boolean(true))
                .coerce(BaseType::Float)
                .is_err()
        );
    }

    #[test]
    fn string_representation_renders_missing() {
        let ctx = EvalContext::new();
        let s = testing::integer(None).to_string_computer();
        assert!(!s.is_missing(&ctx).unwrap());
        assert_eq!(s.compute(&ctx).unwrap(), "MISSING");
        let s = Computer::constant(Value::Float(1.5)).to_string_computer();
        assert_eq!(s.compute(&ctx).unwrap(), "1.5");
    }

    #[test]
    #[should_panic(expected = "compute called before is_missing")]
    fn checked_computers_enforce_protocol() {
        let ctx = EvalContext::new();
        let Computer::Integer(c) = testing::integer(Some(1)) else {
            unreachable!()
        };
        let _ = c.compute(&ctx);
    }
}
