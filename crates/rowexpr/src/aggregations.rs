//! Built-in column aggregations
//!
//! An aggregation call such as `COLUMN_MAX("price", ignore_nan=TRUE)` reduces
//! a whole column to one value before the row pass. Its arguments must be
//! literals. The host feeds every cell of the column to an [`Accumulator`]
//! and reads the result through the computer it hands back.

use std::fmt;
use std::sync::LazyLock;

use crate::computer::{Computer, Typed};
use crate::eval::{EvalError, out_of_range};
use crate::functions::math::{mean, median, variance};
use crate::functions::{Named, Registry};
use crate::signature::{Arguments, Param, arg, defarg, describe, is_boolean, is_string};
use crate::value::Value;
use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Max,
    Min,
    Average,
    Median,
    Sum,
    Variance,
    StdDev,
    Count,
}

pub struct Aggregation {
    pub name: &'static str,
    pub description: &'static str,
    pub keywords: Vec<&'static str>,
    pub params: Vec<Param>,
    kind: Kind,
}

impl fmt::Debug for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregation").field("name", &self.name).finish()
    }
}

impl Named for Aggregation {
    fn name(&self) -> &str {
        self.name
    }
}

impl Aggregation {
    fn numeric(
        name: &'static str,
        kind: Kind,
        description: &'static str,
        keywords: &[&'static str],
    ) -> Self {
        Self {
            name,
            description,
            keywords: keywords.to_vec(),
            params: vec![
                arg("column", is_string()),
                defarg("ignore_nan", is_boolean(), Value::Boolean(false)),
            ],
            kind,
        }
    }

    pub fn signature(&self) -> String {
        format!("{}{}", self.name, describe(&self.params))
    }

    /// The column named by the bound `column` argument.
    pub fn column_name<'a>(&self, args: &'a Arguments<Value>) -> Option<&'a str> {
        args.get("column").and_then(Value::as_str)
    }

    /// Result type when aggregating a column of type `column`.
    pub fn return_type(&self, column: ValueType) -> Result<ValueType, String> {
        if self.kind == Kind::Count {
            return Ok(ValueType::INTEGER);
        }
        if !column.is_numeric() {
            return Err(format!(
                "{} requires an INTEGER or FLOAT column, but the column is {}.",
                self.name,
                column.base_type()
            ));
        }
        Ok(match self.kind {
            Kind::Max | Kind::Min | Kind::Sum => ValueType::of(column.base(), true),
            _ => ValueType::OPT_FLOAT,
        })
    }

    /// A fresh accumulator for one call site.
    pub fn accumulator(&self, args: &Arguments<Value>, column: ValueType) -> Box<dyn Accumulator> {
        let flag = |name: &str| args.get(name).and_then(Value::as_bool).unwrap_or(false);
        let ignore_nan = flag("ignore_nan");
        let base = column.base();
        match self.kind {
            Kind::Max => Box::new(Extreme::new(self.name, base, ignore_nan, true)),
            Kind::Min => Box::new(Extreme::new(self.name, base, ignore_nan, false)),
            Kind::Sum => Box::new(Sum::new(base, ignore_nan)),
            Kind::Average => Box::new(FloatStatistic::new(self.name, ignore_nan, mean)),
            Kind::Median => Box::new(FloatStatistic::new(self.name, ignore_nan, median)),
            Kind::Variance => Box::new(FloatStatistic::new(self.name, ignore_nan, variance)),
            Kind::StdDev => Box::new(FloatStatistic::new(self.name, ignore_nan, |v| {
                variance(v).sqrt()
            })),
            Kind::Count => Box::new(Count {
                ignore_missing: flag("ignore_missing"),
                count: 0,
            }),
        }
    }
}

pub static BUILT_IN_AGGREGATIONS: LazyLock<Registry<Aggregation>> = LazyLock::new(|| {
    let registry = Registry::new(built_ins());
    log::debug!("registered {} built-in aggregations", registry.len());
    registry
});

fn built_ins() -> Vec<Aggregation> {
    vec![
        Aggregation::numeric(
            "COLUMN_MAX",
            Kind::Max,
            "The largest value of a numeric column. MISSING cells are skipped; \
             NaN wins unless `ignore_nan` is TRUE.",
            &["maximum", "largest", "top"],
        ),
        Aggregation::numeric(
            "COLUMN_MIN",
            Kind::Min,
            "The smallest value of a numeric column.",
            &["minimum", "smallest", "bottom"],
        ),
        Aggregation::numeric(
            "COLUMN_AVERAGE",
            Kind::Average,
            "The arithmetic mean of a numeric column.",
            &["mean", "avg"],
        ),
        Aggregation::numeric(
            "COLUMN_MEDIAN",
            Kind::Median,
            "The median of a numeric column; the mean of the two middle values \
             for an even number of values.",
            &["middle", "percentile"],
        ),
        Aggregation::numeric(
            "COLUMN_SUM",
            Kind::Sum,
            "The sum of a numeric column.",
            &["total", "add"],
        ),
        Aggregation::numeric(
            "COLUMN_VARIANCE",
            Kind::Variance,
            "The population variance of a numeric column.",
            &["spread", "dispersion"],
        ),
        Aggregation::numeric(
            "COLUMN_STD_DEV",
            Kind::StdDev,
            "The population standard deviation of a numeric column.",
            &["standard deviation", "spread", "sigma"],
        ),
        Aggregation {
            name: "COLUMN_COUNT",
            description: "The number of rows, or of non-MISSING cells of the \
                          column if `ignore_missing` is TRUE.",
            keywords: vec!["rows", "size", "length"],
            params: vec![
                arg("column", is_string()),
                defarg("ignore_missing", is_boolean(), Value::Boolean(false)),
            ],
            kind: Kind::Count,
        },
    ]
}

// ============ Accumulators ============

/// Folds the cells of one column into a result.
pub trait Accumulator {
    fn add_row(&mut self, value: &Value);

    /// A computer yielding the result for every row.
    fn result_computer(&self) -> Computer;
}

enum Outcome {
    Value(Value),
    Missing(String),
    Failed(EvalError),
}

fn all_missing(name: &str) -> Outcome {
    Outcome::Missing(format!("{name} returned MISSING because all values were MISSING."))
}

fn all_missing_or_nan(name: &str) -> Outcome {
    Outcome::Missing(format!(
        "{name} returned MISSING because all values were either MISSING or NaN."
    ))
}

/// Missing on every row, warning each time it is asked.
fn warn_missing<T: 'static>(warning: String) -> Typed<T> {
    Typed::new(
        |_| {
            Err(EvalError::Implementation(
                "compute called on a missing value".to_string(),
            ))
        },
        move |ctx| {
            ctx.add_warning(warning.clone());
            Ok(true)
        },
    )
}

fn failing<T: 'static>(error: EvalError) -> Typed<T> {
    Typed::present(move |_| Err(error.clone()))
}

fn to_computer(kind: BaseType, outcome: Outcome) -> Computer {
    match (outcome, kind) {
        (Outcome::Value(v), _) => Computer::constant(v),
        (Outcome::Missing(w), BaseType::Integer) => Computer::Integer(warn_missing(w)),
        (Outcome::Missing(w), _) => Computer::Float(warn_missing(w)),
        (Outcome::Failed(e), BaseType::Integer) => Computer::Integer(failing(e)),
        (Outcome::Failed(e), _) => Computer::Float(failing(e)),
    }
}

struct Extreme {
    name: &'static str,
    kind: BaseType,
    ignore_nan: bool,
    max: bool,
    integer: Option<i64>,
    float: Option<f64>,
    seen: bool,
    nan: bool,
}

impl Extreme {
    fn new(name: &'static str, kind: BaseType, ignore_nan: bool, max: bool) -> Self {
        Self {
            name,
            kind,
            ignore_nan,
            max,
            integer: None,
            float: None,
            seen: false,
            nan: false,
        }
    }
}

impl Accumulator for Extreme {
    fn add_row(&mut self, value: &Value) {
        match *value {
            Value::Integer(n) => {
                self.seen = true;
                self.integer = Some(match self.integer {
                    Some(best) if self.max => best.max(n),
                    Some(best) => best.min(n),
                    None => n,
                });
            }
            Value::Float(x) => {
                self.seen = true;
                if x.is_nan() {
                    self.nan = true;
                    return;
                }
                self.float = Some(match self.float {
                    Some(best) if self.max => best.max(x),
                    Some(best) => best.min(x),
                    None => x,
                });
            }
            _ => {}
        }
    }

    fn result_computer(&self) -> Computer {
        let outcome = if !self.seen {
            all_missing(self.name)
        } else if let Some(n) = self.integer {
            Outcome::Value(Value::Integer(n))
        } else if self.nan && !self.ignore_nan {
            Outcome::Value(Value::Float(f64::NAN))
        } else {
            match self.float {
                Some(x) => Outcome::Value(Value::Float(x)),
                None => all_missing_or_nan(self.name),
            }
        };
        to_computer(self.kind, outcome)
    }
}

struct Sum {
    kind: BaseType,
    ignore_nan: bool,
    integer: Option<i64>,
    float: f64,
    seen: bool,
    all_nan: bool,
}

impl Sum {
    fn new(kind: BaseType, ignore_nan: bool) -> Self {
        Self {
            kind,
            ignore_nan,
            integer: Some(0),
            float: 0.0,
            seen: false,
            all_nan: true,
        }
    }
}

impl Accumulator for Sum {
    fn add_row(&mut self, value: &Value) {
        match *value {
            Value::Integer(n) => {
                self.seen = true;
                // `None` records an overflow.
                self.integer = self.integer.and_then(|sum| sum.checked_add(n));
            }
            Value::Float(x) => {
                self.seen = true;
                self.all_nan &= x.is_nan();
                if !(self.ignore_nan && x.is_nan()) {
                    self.float += x;
                }
            }
            _ => {}
        }
    }

    fn result_computer(&self) -> Computer {
        if !self.seen {
            return to_computer(self.kind, all_missing("COLUMN_SUM"));
        }
        if self.kind == BaseType::Integer {
            let outcome = match self.integer {
                Some(sum) => Outcome::Value(Value::Integer(sum)),
                None => Outcome::Failed(out_of_range(BaseType::Integer)),
            };
            return to_computer(self.kind, outcome);
        }
        if self.ignore_nan && self.all_nan {
            return Computer::Float(Typed::present(|ctx| {
                ctx.add_warning("COLUMN_SUM returned 0 because all values were NaN.".to_string());
                Ok(0.0)
            }));
        }
        to_computer(self.kind, Outcome::Value(Value::Float(self.float)))
    }
}

/// Collects the column as floats and reduces it once at the end.
struct FloatStatistic {
    name: &'static str,
    ignore_nan: bool,
    reduce: fn(&[f64]) -> f64,
    values: Vec<f64>,
    seen: bool,
}

impl FloatStatistic {
    fn new(name: &'static str, ignore_nan: bool, reduce: fn(&[f64]) -> f64) -> Self {
        Self {
            name,
            ignore_nan,
            reduce,
            values: Vec::new(),
            seen: false,
        }
    }
}

impl Accumulator for FloatStatistic {
    fn add_row(&mut self, value: &Value) {
        let Some(x) = value.as_float() else {
            return;
        };
        self.seen = true;
        if !(self.ignore_nan && x.is_nan()) {
            self.values.push(x);
        }
    }

    fn result_computer(&self) -> Computer {
        let outcome = if !self.seen {
            all_missing(self.name)
        } else if self.values.is_empty() {
            all_missing_or_nan(self.name)
        } else {
            Outcome::Value(Value::Float((self.reduce)(&self.values)))
        };
        to_computer(BaseType::Float, outcome)
    }
}

struct Count {
    ignore_missing: bool,
    count: i64,
}

impl Accumulator for Count {
    fn add_row(&mut self, value: &Value) {
        if !(self.ignore_missing && value.is_missing()) {
            self.count += 1;
        }
    }

    fn result_computer(&self) -> Computer {
        Computer::constant(Value::Integer(self.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalContext;

    fn aggregate(
        name: &str,
        column: ValueType,
        flags: &[(&'static str, bool)],
        cells: &[Value],
    ) -> (Value, Vec<String>) {
        let aggregation = BUILT_IN_AGGREGATIONS.get(name).unwrap();
        let mut args = Arguments::new().with("column", Value::String("c".into()));
        for &(flag, on) in flags {
            args = args.with(flag, Value::Boolean(on));
        }
        let mut acc = aggregation.accumulator(&args, column);
        for cell in cells {
            acc.add_row(cell);
        }
        let ctx = EvalContext::new();
        let value = acc.result_computer().value(&ctx).unwrap();
        (value, ctx.warnings())
    }

    fn floats(values: &[f64]) -> Vec<Value> {
        values.iter().map(|x| Value::Float(*x)).collect()
    }

    #[test]
    fn return_types_follow_the_column() {
        let max = BUILT_IN_AGGREGATIONS.get("COLUMN_MAX").unwrap();
        assert_eq!(max.return_type(ValueType::INTEGER), Ok(ValueType::OPT_INTEGER));
        assert_eq!(max.return_type(ValueType::OPT_FLOAT), Ok(ValueType::OPT_FLOAT));
        assert!(max.return_type(ValueType::STRING).unwrap_err().contains("STRING"));

        let avg = BUILT_IN_AGGREGATIONS.get("COLUMN_AVERAGE").unwrap();
        assert_eq!(avg.return_type(ValueType::INTEGER), Ok(ValueType::OPT_FLOAT));

        let count = BUILT_IN_AGGREGATIONS.get("COLUMN_COUNT").unwrap();
        assert_eq!(count.return_type(ValueType::OPT_STRING), Ok(ValueType::INTEGER));
    }

    #[test]
    fn extremes() {
        let cells = [Value::Integer(3), Value::Missing, Value::Integer(-7), Value::Integer(5)];
        assert_eq!(aggregate("COLUMN_MAX", ValueType::INTEGER, &[], &cells).0, Value::Integer(5));
        assert_eq!(aggregate("COLUMN_MIN", ValueType::INTEGER, &[], &cells).0, Value::Integer(-7));

        let cells = floats(&[1.5, f64::NAN, -2.0]);
        assert!(matches!(
            aggregate("COLUMN_MAX", ValueType::FLOAT, &[], &cells).0,
            Value::Float(x) if x.is_nan()
        ));
        assert_eq!(
            aggregate("COLUMN_MAX", ValueType::FLOAT, &[("ignore_nan", true)], &cells).0,
            Value::Float(1.5)
        );
    }

    #[test]
    fn all_missing_warns() {
        let (value, warnings) =
            aggregate("COLUMN_MIN", ValueType::OPT_INTEGER, &[], &[Value::Missing]);
        assert_eq!(value, Value::Missing);
        assert_eq!(warnings, ["COLUMN_MIN returned MISSING because all values were MISSING."]);

        let (value, warnings) = aggregate(
            "COLUMN_MEDIAN",
            ValueType::FLOAT,
            &[("ignore_nan", true)],
            &floats(&[f64::NAN]),
        );
        assert_eq!(value, Value::Missing);
        assert_eq!(
            warnings,
            ["COLUMN_MEDIAN returned MISSING because all values were either MISSING or NaN."]
        );
    }

    #[test]
    fn sums() {
        let cells = [Value::Integer(2), Value::Integer(40), Value::Missing];
        assert_eq!(
            aggregate("COLUMN_SUM", ValueType::OPT_INTEGER, &[], &cells).0,
            Value::Integer(42)
        );

        let (value, warnings) = aggregate(
            "COLUMN_SUM",
            ValueType::FLOAT,
            &[("ignore_nan", true)],
            &floats(&[f64::NAN]),
        );
        assert_eq!(value, Value::Float(0.0));
        assert_eq!(warnings, ["COLUMN_SUM returned 0 because all values were NaN."]);

        let aggregation = BUILT_IN_AGGREGATIONS.get("COLUMN_SUM").unwrap();
        let args = Arguments::new().with("column", Value::String("c".into()));
        let mut acc = aggregation.accumulator(&args, ValueType::INTEGER);
        acc.add_row(&Value::Integer(i64::MAX));
        acc.add_row(&Value::Integer(1));
        let result = acc.result_computer().value(&EvalContext::new());
        assert!(matches!(result, Err(EvalError::Evaluation(_))));
    }

    #[test]
    fn statistics() {
        let cells = floats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(aggregate("COLUMN_AVERAGE", ValueType::FLOAT, &[], &cells).0, Value::Float(5.0));
        assert_eq!(aggregate("COLUMN_MEDIAN", ValueType::FLOAT, &[], &cells).0, Value::Float(4.5));
        assert_eq!(
            aggregate("COLUMN_VARIANCE", ValueType::FLOAT, &[], &cells).0,
            Value::Float(4.0)
        );
        assert_eq!(aggregate("COLUMN_STD_DEV", ValueType::FLOAT, &[], &cells).0, Value::Float(2.0));

        let ints = [Value::Integer(1), Value::Integer(2)];
        assert_eq!(
            aggregate("COLUMN_AVERAGE", ValueType::INTEGER, &[], &ints).0,
            Value::Float(1.5)
        );
    }

    #[test]
    fn counts() {
        let cells = [Value::String("a".into()), Value::Missing, Value::String("b".into())];
        assert_eq!(
            aggregate("COLUMN_COUNT", ValueType::OPT_STRING, &[], &cells).0,
            Value::Integer(3)
        );
        assert_eq!(
            aggregate("COLUMN_COUNT", ValueType::OPT_STRING, &[("ignore_missing", true)], &cells).0,
            Value::Integer(2)
        );
    }
}
