//! Math functions: general, rounding, multi-argument aggregates, trigonometry
//! and distributions

use std::f64::consts::{PI, SQRT_2};

use crate::computer::{Computer, Typed};
use crate::eval::{self, EvaluationContext};
use crate::signature::{
    Arguments, Param, arg, is_float, is_integer_or_opt, is_numeric_or_opt, optarg, vararg,
};
use crate::value_type::{BaseType, ValueType};

use super::{
    Category, Function, all_integer, any_optional, optional_value, partial, propagating,
    render_float, required, returns, returns_exactly, warn,
};

pub fn functions() -> Vec<Function> {
    let mut functions = general();
    functions.extend(rounding());
    functions.extend(aggregates());
    functions.extend(trigonometry());
    functions.extend(distributions());
    functions
}

const TOLERANCE: f64 = 1e-10;

fn is_near_zero(x: f64) -> bool {
    x.abs() < TOLERANCE
}

// ============ Building blocks ============

type FloatOp = fn(f64, &dyn EvaluationContext) -> f64;

/// `name(x)` on a numeric argument, returning FLOAT.
fn unary_float(
    name: &'static str,
    category: Category,
    description: &'static str,
    keywords: &[&'static str],
    op: FloatOp,
) -> Function {
    Function::new(name, category, description)
        .keywords(keywords)
        .overload(
            vec![arg("x", is_numeric_or_opt())],
            returns(BaseType::Float),
            move |args, _| {
                let x = required(args, "x")?.float()?;
                Ok(Computer::Float(x.try_map(move |x, ctx| Ok(op(x, ctx)))))
            },
        )
}

/// `name(x)` rounding to an INTEGER; NaN gives MISSING with a warning.
fn to_integer(
    name: &'static str,
    description: &'static str,
    keywords: &[&'static str],
    op: fn(f64) -> f64,
) -> Function {
    Function::new(name, Category::MathRound, description)
        .keywords(keywords)
        .overload(
            vec![arg("x", is_numeric_or_opt())],
            returns(BaseType::Integer),
            move |args, _| {
                let input = required(args, "x")?.clone();
                let x = input.float()?;
                Ok(Computer::Integer(partial(vec![input], move |ctx| {
                    let x = x.compute(ctx)?;
                    if x.is_nan() {
                        warn(ctx, name, "MISSING", "argument is NaN");
                        return Ok(None);
                    }
                    Ok(Some(op(x) as i64))
                })))
            },
        )
}

fn numbers() -> Vec<Param> {
    vec![
        arg("input_1", is_numeric_or_opt()),
        arg("input_2", is_numeric_or_opt()),
        vararg("more", is_numeric_or_opt()),
    ]
}

fn all_args(args: &Arguments<Computer>) -> Vec<Computer> {
    args.values().cloned().collect()
}

fn compute_all<T: 'static>(
    sources: &[Typed<T>],
    ctx: &dyn EvaluationContext,
) -> eval::Result<Vec<T>> {
    sources.iter().map(|s| s.compute(ctx)).collect()
}

/// Multi-argument reduction over floats, returning FLOAT.
fn float_reduction(
    name: &'static str,
    description: &'static str,
    keywords: &[&'static str],
    reduce: fn(&[f64]) -> f64,
) -> Function {
    Function::new(name, Category::MathAggregate, description)
        .keywords(keywords)
        .overload(numbers(), returns(BaseType::Float), move |args, _| {
            let inputs = all_args(args);
            let floats = inputs.iter().map(Computer::float).collect::<eval::Result<Vec<_>>>()?;
            Ok(Computer::Float(propagating(inputs, move |ctx| {
                Ok(reduce(&compute_all(&floats, ctx)?))
            })))
        })
}

/// Reduction that stays INTEGER when every argument is.
fn numeric_reduction(
    name: &'static str,
    description: &'static str,
    keywords: &[&'static str],
    on_integers: fn(&[i64]) -> i64,
    on_floats: fn(&[f64]) -> f64,
) -> Function {
    Function::new(name, Category::MathAggregate, description)
        .keywords(keywords)
        .overload(numbers(), integer_if_all_integer, move |args, out| {
            let inputs = all_args(args);
            if out.base() == BaseType::Integer {
                let ints = inputs.iter().map(Computer::integer).collect::<eval::Result<Vec<_>>>()?;
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    Ok(on_integers(&compute_all(&ints, ctx)?))
                })))
            } else {
                let floats = inputs.iter().map(Computer::float).collect::<eval::Result<Vec<_>>>()?;
                Ok(Computer::Float(propagating(inputs, move |ctx| {
                    Ok(on_floats(&compute_all(&floats, ctx)?))
                })))
            }
        })
}

fn integer_if_all_integer(args: &Arguments<ValueType>) -> Result<ValueType, String> {
    let base = if all_integer(args) {
        BaseType::Integer
    } else {
        BaseType::Float
    };
    Ok(ValueType::of(base, any_optional(args)))
}

// ============ General ============

fn general() -> Vec<Function> {
    vec![
        Function::new(
            "pow",
            Category::MathGeneral,
            "`x` raised to the power of `y`. INTEGER if both arguments are integers. \
             A zero base with a non-positive exponent returns 0 (INTEGER) or NaN (FLOAT) \
             with a warning.",
        )
        .keywords(&["power", "exponent"])
        .overload(
            vec![arg("x", is_numeric_or_opt()), arg("y", is_numeric_or_opt())],
            integer_if_all_integer,
            |args, out| {
                let inputs = all_args(args);
                let (x, y) = (required(args, "x")?, required(args, "y")?);
                if out.base() == BaseType::Integer {
                    let (x, y) = (x.integer()?, y.integer()?);
                    return Ok(Computer::Integer(propagating(inputs, move |ctx| {
                        integer_pow(x.compute(ctx)?, y.compute(ctx)?, ctx)
                    })));
                }
                let (x, y) = (x.float()?, y.float()?);
                Ok(Computer::Float(propagating(inputs, move |ctx| {
                    let (x, y) = (x.compute(ctx)?, y.compute(ctx)?);
                    if is_near_zero(x) && (is_near_zero(y) || y < 0.0) {
                        ctx.add_warning(
                            "FLOAT pow returned NaN because base is zero and exponent is \
                             non-positive."
                                .to_string(),
                        );
                        return Ok(f64::NAN);
                    }
                    Ok(x.powf(y))
                })))
            },
        ),
        unary_float(
            "sqrt",
            Category::MathGeneral,
            "The square root of `x`. Negative arguments return NaN with a warning.",
            &["root"],
            |x, ctx| {
                if x < 0.0 {
                    warn(ctx, "sqrt", "NaN", "argument is negative");
                }
                x.sqrt()
            },
        ),
        Function::new(
            "mod",
            Category::MathGeneral,
            "The remainder of `x` divided by `y`, with the sign of `x`. A zero divisor \
             returns 0 (INTEGER) or NaN (FLOAT) with a warning.",
        )
        .keywords(&["modulo", "remainder"])
        .overload(
            vec![arg("x", is_numeric_or_opt()), arg("y", is_numeric_or_opt())],
            integer_if_all_integer,
            |args, out| {
                let inputs = all_args(args);
                let (x, y) = (required(args, "x")?, required(args, "y")?);
                if out.base() == BaseType::Integer {
                    let (x, y) = (x.integer()?, y.integer()?);
                    return Ok(Computer::Integer(propagating(inputs, move |ctx| {
                        let divisor = y.compute(ctx)?;
                        if divisor == 0 {
                            ctx.add_warning(
                                "INTEGER mod returned 0 because divisor is zero.".to_string(),
                            );
                            return Ok(0);
                        }
                        Ok(x.compute(ctx)?.wrapping_rem(divisor))
                    })));
                }
                let (x, y) = (x.float()?, y.float()?);
                Ok(Computer::Float(propagating(inputs, move |ctx| {
                    let divisor = y.compute(ctx)?;
                    if is_near_zero(divisor) {
                        ctx.add_warning(
                            "FLOAT mod returned NaN because divisor is zero.".to_string(),
                        );
                        return Ok(f64::NAN);
                    }
                    Ok(x.compute(ctx)? % divisor)
                })))
            },
        ),
        Function::new("abs", Category::MathGeneral, "The absolute value of `x`.")
            .keywords(&["absolute"])
            .overload(
                vec![arg("x", is_numeric_or_opt())],
                |args| {
                    args.get("x")
                        .copied()
                        .ok_or_else(|| "Missing required argument 'x'.".to_string())
                },
                |args, _| {
                    Ok(match required(args, "x")? {
                        Computer::Missing => Computer::Missing,
                        Computer::Integer(x) => Computer::Integer(x.clone().map(i64::wrapping_abs)),
                        other => Computer::Float(other.float()?.map(f64::abs)),
                    })
                },
            ),
        to_sign(),
        unary_float(
            "exp",
            Category::MathGeneral,
            "Euler's number raised to the power of `x`.",
            &["exponential"],
            |x, _| x.exp(),
        ),
        unary_float(
            "ln",
            Category::MathGeneral,
            "The natural logarithm of `x`.",
            &["logarithm", "natural"],
            |x, ctx| log_checked(ctx, "ln", x, f64::ln),
        ),
        unary_float(
            "log10",
            Category::MathGeneral,
            "The base-10 logarithm of `x`.",
            &["logarithm"],
            |x, ctx| log_checked(ctx, "log10", x, f64::log10),
        ),
        unary_float(
            "log2",
            Category::MathGeneral,
            "The base-2 logarithm of `x`.",
            &["logarithm"],
            |x, ctx| log_checked(ctx, "log2", x, f64::log2),
        ),
        Function::new("log", Category::MathGeneral, "The logarithm of `x` to the given `base`.")
            .keywords(&["logarithm"])
            .overload(
                vec![arg("x", is_numeric_or_opt()), arg("base", is_numeric_or_opt())],
                returns(BaseType::Float),
                |args, _| {
                    let inputs = all_args(args);
                    let (x, base) = (
                        required(args, "x")?.float()?,
                        required(args, "base")?.float()?,
                    );
                    Ok(Computer::Float(propagating(inputs, move |ctx| {
                        Ok(log_base(x.compute(ctx)?, base.compute(ctx)?, ctx))
                    })))
                },
            ),
        unary_float(
            "log1p",
            Category::MathGeneral,
            "The natural logarithm of `1 + x`, accurate for small `x`.",
            &["logarithm"],
            |x, ctx| {
                if x == -1.0 {
                    warn(ctx, "log1p", "-INFINITY", "argument is -1");
                } else if x < -1.0 {
                    warn(ctx, "log1p", "NaN", "argument is less than -1");
                }
                x.ln_1p()
            },
        ),
        Function::new(
            "is_nan",
            Category::MathGeneral,
            "TRUE if `x` is NaN. Never MISSING: a MISSING argument gives FALSE.",
        )
        .keywords(&["NaN"])
        .overload(
            vec![arg("x", is_float().or_missing())],
            returns_exactly(ValueType::BOOLEAN),
            |args, _| {
                let x = required(args, "x")?.float()?;
                Ok(Computer::Boolean(Typed::present(move |ctx| {
                    Ok(!x.is_missing(ctx)? && x.compute(ctx)?.is_nan())
                })))
            },
        ),
        Function::new(
            "nan_to_missing",
            Category::MathGeneral,
            "MISSING if `x` is NaN, otherwise `x`.",
        )
        .keywords(&["NaN"])
        .overload(
            vec![arg("x", is_float().or_missing())],
            returns_exactly(ValueType::OPT_FLOAT),
            |args, _| {
                let input = required(args, "x")?.clone();
                let x = input.float()?;
                Ok(Computer::Float(partial(vec![input], move |ctx| {
                    let x = x.compute(ctx)?;
                    Ok((!x.is_nan()).then_some(x))
                })))
            },
        ),
    ]
}

fn integer_pow(x: i64, y: i64, ctx: &dyn EvaluationContext) -> eval::Result<i64> {
    if x == 0 && y <= 0 {
        ctx.add_warning(
            "INTEGER pow returned 0 because base is zero and exponent is non-positive.".to_string(),
        );
        return Ok(0);
    }
    if x == 1 {
        return Ok(1);
    }
    if y < 0 {
        return Ok(0);
    }
    let exponent = u32::try_from(y)
        .map_err(|_| eval::EvalError::Evaluation("Exponent argument was too large.".to_string()))?;
    Ok(x.wrapping_pow(exponent))
}

fn log_checked(ctx: &dyn EvaluationContext, name: &str, x: f64, log: fn(f64) -> f64) -> f64 {
    if x == 0.0 {
        warn(ctx, name, "-INFINITY", "argument is 0");
    } else if x < 0.0 {
        warn(ctx, name, "NaN", "argument is less than 0");
    }
    log(x)
}

fn log_base(x: f64, base: f64, ctx: &dyn EvaluationContext) -> f64 {
    let reason = if x == 0.0 && base == 0.0 {
        "both arguments are 0"
    } else if base == 0.0 {
        "base is 0"
    } else if x == 0.0 {
        warn(ctx, "log", "-INFINITY", "first argument is 0");
        return f64::NEG_INFINITY;
    } else if x < 0.0 {
        "first argument is less than 0"
    } else if base < 0.0 {
        "base is less than 0"
    } else if base == 1.0 {
        "base is 1"
    } else {
        return x.ln() / base.ln();
    };
    warn(ctx, "log", "NaN", reason);
    f64::NAN
}

fn to_sign() -> Function {
    Function::new(
        "sign",
        Category::MathGeneral,
        "-1, 0 or 1 depending on the sign of `x`. NaN gives MISSING with a warning.",
    )
    .overload(
        vec![arg("x", is_numeric_or_opt())],
        returns(BaseType::Integer),
        |args, _| {
            let input = required(args, "x")?.clone();
            let x = input.float()?;
            Ok(Computer::Integer(partial(vec![input], move |ctx| {
                let x = x.compute(ctx)?;
                if x.is_nan() {
                    warn(ctx, "sign", "MISSING", "argument is NaN");
                    return Ok(None);
                }
                Ok(Some(if x > 0.0 {
                    1
                } else if x < 0.0 {
                    -1
                } else {
                    0
                }))
            })))
        },
    )
}

// ============ Rounding ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rounding {
    HalfEven,
    HalfUp,
    HalfDown,
}

const MAX_SCALE: i32 = 400;

/// Rounds the shortest decimal representation of `x` to `scale` places.
///
/// Working on decimal digits makes `round(1.65, 1)` give 1.6 (half-even)
/// even though the binary value of 1.65 is slightly below it.
fn round_decimal(x: f64, scale: i32, mode: Rounding) -> f64 {
    if !x.is_finite() {
        return x;
    }
    let sci = format!("{:e}", x.abs());
    let Some((mantissa, exponent)) = sci.split_once('e') else {
        return x;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return x;
    };
    // Beyond this every f64 is either kept whole or rounded to zero.
    let scale = scale.clamp(-MAX_SCALE, MAX_SCALE);
    let digits: Vec<u8> = mantissa
        .bytes()
        .filter(u8::is_ascii_digit)
        .map(|b| b - b'0')
        .collect();

    // Digits to keep: those before the decimal point plus `scale` after it.
    let keep = exponent + 1 + scale;
    if keep >= digits.len() as i32 {
        return x;
    }
    let (kept, dropped) = if keep <= 0 {
        (&digits[..0], &digits[..])
    } else {
        digits.split_at(keep as usize)
    };
    let first_dropped = if keep < 0 { 0 } else { dropped[0] };
    let tail_nonzero = keep < 0 || dropped[1..].iter().any(|d| *d != 0);
    let last_kept_odd = kept.last().is_some_and(|d| d % 2 == 1);
    let round_up = match mode {
        Rounding::HalfUp => first_dropped >= 5,
        Rounding::HalfDown => first_dropped > 5 || (first_dropped == 5 && tail_nonzero),
        Rounding::HalfEven => {
            first_dropped > 5 || (first_dropped == 5 && (tail_nonzero || last_kept_odd))
        }
    };
    let mut n: u128 = kept.iter().fold(0, |acc, d| acc * 10 + u128::from(*d));
    if round_up {
        n += 1;
    }
    let rounded: f64 = format!("{n}e{}", -scale).parse().unwrap_or(f64::NAN);
    rounded.copysign(x)
}

fn round_function(name: &'static str, description: &'static str, mode: Rounding) -> Function {
    Function::new(name, Category::MathRound, description)
        .keywords(&["round", "decimal"])
        .overload(
            vec![
                arg("x", is_numeric_or_opt()),
                optarg("precision", is_integer_or_opt()),
            ],
            |args| {
                let optional = args.get("x").is_some_and(|t| t.is_optional());
                let base = if args.has("precision") {
                    BaseType::Float
                } else {
                    BaseType::Integer
                };
                Ok(ValueType::of(base, optional))
            },
            move |args, _| {
                let input = required(args, "x")?.clone();
                let x = input.float()?;
                let Some(precision) = args.get("precision") else {
                    return Ok(Computer::Integer(partial(vec![input], move |ctx| {
                        let x = x.compute(ctx)?;
                        if x.is_nan() {
                            warn(ctx, name, "MISSING", "argument is NaN");
                            return Ok(None);
                        }
                        Ok(Some(round_decimal(x, 0, mode) as i64))
                    })));
                };
                // A MISSING precision counts as 0.
                let precision = precision.integer()?;
                Ok(Computer::Float(propagating(vec![input], move |ctx| {
                    let scale = optional_value(Some(&precision), ctx)?.unwrap_or(0);
                    let scale = i32::try_from(scale).map_err(|_| {
                        eval::EvalError::Evaluation("precision arg was too large.".to_string())
                    })?;
                    let x = x.compute(ctx)?;
                    if x.is_nan() {
                        warn(ctx, name, "NaN", "argument is NaN");
                        return Ok(f64::NAN);
                    }
                    Ok(round_decimal(x, scale, mode))
                })))
            },
        )
}

fn rounding() -> Vec<Function> {
    vec![
        round_function(
            "round",
            "Rounds `x` to `precision` decimal places, halfway cases to the even \
             neighbour. INTEGER without `precision`, FLOAT with it.",
            Rounding::HalfEven,
        )
        .keywords(&["roundhalfeven"]),
        round_function(
            "roundhalfup",
            "Rounds `x` to `precision` decimal places, halfway cases away from zero.",
            Rounding::HalfUp,
        ),
        round_function(
            "roundhalfdown",
            "Rounds `x` to `precision` decimal places, halfway cases towards zero.",
            Rounding::HalfDown,
        ),
        to_integer(
            "truncate",
            "`x` rounded towards zero.",
            &["round down"],
            f64::trunc,
        ),
        to_integer(
            "ceil",
            "The smallest integer not less than `x`.",
            &["round up", "ceiling"],
            f64::ceil,
        ),
        to_integer(
            "floor",
            "The largest integer not greater than `x`.",
            &["round down"],
            f64::floor,
        ),
    ]
}

// ============ Aggregates over arguments ============

fn float_max(values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn float_min(values: &[f64]) -> f64 {
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// 1-based position of the first extreme value; a NaN wins immediately.
fn arg_extreme(values: &[f64], better: fn(f64, f64) -> bool) -> i64 {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            return i as i64 + 1;
        }
        if better(*v, values[best]) {
            best = i;
        }
    }
    best as i64 + 1
}

fn arg_function(
    name: &'static str,
    description: &'static str,
    better: fn(f64, f64) -> bool,
) -> Function {
    Function::new(name, Category::MathAggregate, description).overload(
        numbers(),
        returns(BaseType::Integer),
        move |args, _| {
            let inputs = all_args(args);
            let floats = inputs.iter().map(Computer::float).collect::<eval::Result<Vec<_>>>()?;
            Ok(Computer::Integer(propagating(inputs, move |ctx| {
                Ok(arg_extreme(&compute_all(&floats, ctx)?, better))
            })))
        },
    )
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    match sorted.len() {
        0 => f64::NAN,
        _ if sorted.iter().any(|v| v.is_nan()) => f64::NAN,
        n if n % 2 == 0 => 0.5 * (sorted[n / 2 - 1] + sorted[n / 2]),
        n => sorted[n / 2],
    }
}

/// Population variance.
pub(crate) fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let (sum, sum_sq) = values
        .iter()
        .fold((0.0, 0.0), |(s, sq), v| (s + v, sq + v * v));
    (sum_sq - sum * sum / n) / n
}

fn aggregates() -> Vec<Function> {
    vec![
        numeric_reduction(
            "max",
            "The largest of the arguments. INTEGER if all arguments are integers. \
             NaN if any argument is NaN.",
            &["maximum"],
            |v| v.iter().copied().max().unwrap_or(i64::MIN),
            float_max,
        ),
        numeric_reduction(
            "min",
            "The smallest of the arguments. INTEGER if all arguments are integers. \
             NaN if any argument is NaN.",
            &["minimum"],
            |v| v.iter().copied().min().unwrap_or(i64::MAX),
            float_min,
        ),
        arg_function(
            "argmax",
            "The 1-based position of the largest argument; the first one on ties.",
            |a, b| a > b,
        ),
        arg_function(
            "argmin",
            "The 1-based position of the smallest argument; the first one on ties.",
            |a, b| a < b,
        ),
        float_reduction("average", "The mean of the arguments.", &["mean"], mean),
        float_reduction("median", "The median of the arguments.", &[], median),
        numeric_reduction(
            "sum",
            "The sum of the arguments. INTEGER if all arguments are integers.",
            &["total"],
            |v| v.iter().fold(0i64, |a, b| a.wrapping_add(*b)),
            |v| v.iter().sum(),
        ),
        float_reduction("variance", "The population variance of the arguments.", &[], variance),
        float_reduction(
            "stddev",
            "The population standard deviation of the arguments.",
            &["standard deviation"],
            |v| variance(v).sqrt(),
        ),
    ]
}

// ============ Trigonometry ============

fn trig(name: &'static str, description: &'static str, op: FloatOp) -> Function {
    unary_float(name, Category::MathTrigonometry, description, &[], op)
}

fn trigonometry() -> Vec<Function> {
    vec![
        trig("degrees", "`x` radians converted to degrees.", |x, _| x.to_degrees()),
        trig("radians", "`x` degrees converted to radians.", |x, _| x.to_radians()),
        trig("sin", "The sine of `x` radians.", |x, _| x.sin()),
        trig("cos", "The cosine of `x` radians.", |x, _| x.cos()),
        trig("tan", "The tangent of `x` radians.", |x, _| x.tan()),
        trig("asin", "The arcsine of `x`, in radians.", |x, ctx| {
            if x.abs() > 1.0 {
                warn(ctx, "asin", "NaN", "argument is outside the range [-1, 1]");
            }
            x.asin()
        }),
        trig("acos", "The arccosine of `x`, in radians.", |x, ctx| {
            if x.abs() > 1.0 {
                warn(ctx, "acos", "NaN", "argument is greater than 1");
            }
            x.acos()
        }),
        trig("atan", "The arctangent of `x`, in radians.", |x, _| x.atan()),
        Function::new(
            "atan2",
            Category::MathTrigonometry,
            "The angle in radians of the point (`x`, `y`). NaN with a warning at the origin.",
        )
        .overload(
            vec![arg("y", is_numeric_or_opt()), arg("x", is_numeric_or_opt())],
            returns(BaseType::Float),
            |args, _| {
                let inputs = all_args(args);
                let (y, x) = (required(args, "y")?.float()?, required(args, "x")?.float()?);
                Ok(Computer::Float(propagating(inputs, move |ctx| {
                    let (y, x) = (y.compute(ctx)?, x.compute(ctx)?);
                    if is_near_zero(x) && is_near_zero(y) {
                        ctx.add_warning(
                            "atan2 returned NaN because both inputs are zero.".to_string(),
                        );
                        return Ok(f64::NAN);
                    }
                    Ok(y.atan2(x))
                })))
            },
        ),
        trig("sinh", "The hyperbolic sine of `x`.", |x, _| x.sinh()),
        trig("cosh", "The hyperbolic cosine of `x`.", |x, _| x.cosh()),
        trig("tanh", "The hyperbolic tangent of `x`.", |x, _| x.tanh()),
        trig("asinh", "The hyperbolic arcsine of `x`.", |x, _| x.asinh()),
        trig("acosh", "The hyperbolic arccosine of `x`.", |x, ctx| {
            if x < 1.0 {
                warn(ctx, "acosh", "NaN", "argument is less than 1");
                return f64::NAN;
            }
            x.acosh()
        }),
        trig("atanh", "The hyperbolic arctangent of `x`.", |x, ctx| {
            if (x.abs() - 1.0).abs() < TOLERANCE {
                let result = f64::INFINITY.copysign(x);
                let argument = if x > 0.0 { "1" } else { "-1" };
                warn(ctx, "atanh", &render_float(result), &format!("argument is {argument}"));
                return result;
            }
            if x.abs() > 1.0 {
                warn(ctx, "atanh", "NaN", "argument is outside the range [-1, 1]");
                return f64::NAN;
            }
            x.atanh()
        }),
    ]
}

// ============ Distributions ============

fn binomial(mut n: i64, r: i64, ctx: &dyn EvaluationContext) -> i64 {
    if n == 0 && r == 0 {
        return 1;
    }
    let reason = if r > n {
        Some("r > n")
    } else if r < 0 {
        Some("r < 0")
    } else if n < 0 {
        Some("n < 0")
    } else {
        None
    };
    if let Some(reason) = reason {
        warn(ctx, "binomial", "zero", reason);
        return 0;
    }
    let r = r.min(n - r);
    let mut result: i64 = 1;
    for d in 1..=r {
        result = result.wrapping_mul(n) / d;
        n -= 1;
    }
    result
}

/// Abramowitz-Stegun style approximation with fractional error below 1.2e-7.
pub(crate) fn erf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.5 * x.abs());
    let tau = |x: f64| {
        let poly = [
            -1.26551223,
            1.00002368,
            0.37409196,
            0.09678418,
            -0.18628806,
            0.27886807,
            -1.13520398,
            1.48851587,
            -0.82215223,
            0.17087277,
        ]
        .iter()
        .rev()
        .fold(0.0, |acc, c| acc * t + c);
        t * (-x * x + poly).exp()
    };
    if x >= 0.0 {
        1.0 - tau(x)
    } else {
        tau(-x) - 1.0
    }
}

/// `normal` and `error_function` share the optional mean and deviation handling.
fn distribution(
    name: &'static str,
    description: &'static str,
    default_std: f64,
    density: fn(f64, f64, f64) -> f64,
) -> Function {
    Function::new(name, Category::MathDistributions, description)
        .keywords(&["gaussian", "distribution", "probability"])
        .overload(
            vec![
                arg("x", is_numeric_or_opt()),
                optarg("mean", is_numeric_or_opt()),
                optarg("standard_deviation", is_numeric_or_opt()),
            ],
            |args| {
                let optional = args.get("x").is_some_and(|t| t.is_optional());
                Ok(ValueType::of(BaseType::Float, optional))
            },
            move |args, _| {
                let input = required(args, "x")?.clone();
                let x = input.float()?;
                let mean = args.get("mean").map(Computer::float).transpose()?;
                let std = args
                    .get("standard_deviation")
                    .map(Computer::float)
                    .transpose()?;
                Ok(Computer::Float(propagating(vec![input], move |ctx| {
                    let x = x.compute(ctx)?;
                    let mean = optional_value(mean.as_ref(), ctx)?.unwrap_or(0.0);
                    let std = match optional_value(std.as_ref(), ctx)? {
                        Some(s) if is_near_zero(s) || s < 0.0 => {
                            warn(ctx, name, "NaN", "standard deviation <= 0");
                            return Ok(f64::NAN);
                        }
                        Some(s) => s,
                        None => default_std,
                    };
                    Ok(density(x, mean, std))
                })))
            },
        )
}

fn distributions() -> Vec<Function> {
    vec![
        Function::new(
            "binomial",
            Category::MathDistributions,
            "The binomial coefficient `n` choose `r`. Invalid inputs return 0 with a warning.",
        )
        .keywords(&["choose", "permutations"])
        .overload(
            vec![arg("n", is_integer_or_opt()), arg("r", is_integer_or_opt())],
            returns(BaseType::Integer),
            |args, _| {
                let inputs = all_args(args);
                let (n, r) = (required(args, "n")?.integer()?, required(args, "r")?.integer()?);
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    Ok(binomial(n.compute(ctx)?, r.compute(ctx)?, ctx))
                })))
            },
        ),
        distribution(
            "normal",
            "The probability density of the normal distribution at `x`. `mean` \
             defaults to 0 and `standard_deviation` to 1.",
            1.0,
            |x, mean, std| {
                (-(x - mean).powi(2) / (2.0 * std * std)).exp() / (std * (2.0 * PI).sqrt())
            },
        ),
        distribution(
            "error_function",
            "The error function at `x`, scaled by `mean` (default 0) and \
             `standard_deviation` (default 1/sqrt(2)).",
            1.0 / SQRT_2,
            |x, mean, std| erf((x - mean) / (std * SQRT_2)),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::testing::{eval, value};
    use crate::value::Value;

    fn float(source: &str) -> f64 {
        match value(source) {
            Value::Float(x) => x,
            other => panic!("expected FLOAT, got {other:?}"),
        }
    }

    #[test]
    fn rounding_modes_work_on_decimal_digits() {
        assert_eq!(round_decimal(1.65, 1, Rounding::HalfEven), 1.6);
        assert_eq!(round_decimal(1.65, 1, Rounding::HalfUp), 1.7);
        assert_eq!(round_decimal(1.65, 1, Rounding::HalfDown), 1.6);
        assert_eq!(round_decimal(2.5, 0, Rounding::HalfEven), 2.0);
        assert_eq!(round_decimal(3.5, 0, Rounding::HalfEven), 4.0);
        assert_eq!(round_decimal(-2.5, 0, Rounding::HalfUp), -3.0);
        assert_eq!(round_decimal(123.45, -2, Rounding::HalfUp), 100.0);
        assert_eq!(round_decimal(0.004, 2, Rounding::HalfUp), 0.0);
        assert_eq!(round_decimal(1.0, 3, Rounding::HalfEven), 1.0);
    }

    #[test]
    fn extreme_precisions_do_not_overflow() {
        assert_eq!(round_decimal(1.5, i32::MAX, Rounding::HalfEven), 1.5);
        assert_eq!(round_decimal(-1.5, i32::MIN, Rounding::HalfUp), -0.0);
        assert_eq!(value("round(1.5, 2147483647)"), Value::Float(1.5));
        assert_eq!(value("round(1.5, -2147483648)"), Value::Float(0.0));
    }

    #[test]
    fn round_functions() {
        assert_eq!(value("round(2.5)"), Value::Integer(2));
        assert_eq!(value("roundhalfup(2.5)"), Value::Integer(3));
        assert_eq!(value("round(-1.44, 1)"), Value::Float(-1.4));
        assert_eq!(value("round(-1.4, 0)"), Value::Float(-1.0));
        assert_eq!(value("round(1.5, MISSING)"), Value::Float(2.0));

        let (result, warnings) = eval("round(NaN)");
        assert_eq!(result.unwrap(), Value::Missing);
        assert_eq!(warnings, ["round returned MISSING because argument is NaN."]);
    }

    #[test]
    fn truncation_family() {
        assert_eq!(value("truncate(-2.5)"), Value::Integer(-2));
        assert_eq!(value("ceil(1.1)"), Value::Integer(2));
        assert_eq!(value("floor(-1.1)"), Value::Integer(-2));
        assert_eq!(value("floor(NaN)"), Value::Missing);
        assert_eq!(value("sign(-0.3)"), Value::Integer(-1));
    }

    #[test]
    fn general_functions() {
        assert_eq!(value("pow(2, 3)"), Value::Integer(8));
        assert_eq!(value("pow(2, -1)"), Value::Integer(0));
        assert_eq!(value("pow(16, 0.5)"), Value::Float(4.0));
        assert_eq!(value("mod(-7, 3)"), Value::Integer(-1));
        assert_eq!(value("abs(-3)"), Value::Integer(3));
        assert_eq!(value("abs(-3.5)"), Value::Float(3.5));
        assert!((float("log(8, 2)") - 3.0).abs() < 1e-12);
        assert_eq!(value("is_nan(MISSING)"), Value::Boolean(false));
        assert_eq!(value("is_nan(NaN)"), Value::Boolean(true));
        assert_eq!(value("nan_to_missing(NaN)"), Value::Missing);
    }

    #[test]
    fn domain_warnings() {
        let (result, warnings) = eval("sqrt(-1)");
        assert!(matches!(result.unwrap(), Value::Float(x) if x.is_nan()));
        assert_eq!(warnings, ["sqrt returned NaN because argument is negative."]);

        let (_, warnings) = eval("ln(0)");
        assert_eq!(warnings, ["ln returned -INFINITY because argument is 0."]);

        let (_, warnings) = eval("asin(2)");
        assert_eq!(warnings, ["asin returned NaN because argument is outside the range [-1, 1]."]);

        let (result, warnings) = eval("mod(1, 0)");
        assert_eq!(result.unwrap(), Value::Integer(0));
        assert_eq!(warnings, ["INTEGER mod returned 0 because divisor is zero."]);
    }

    #[test]
    fn argument_aggregates() {
        assert_eq!(value("max(1, 2, 3)"), Value::Integer(3));
        assert_eq!(value("max(1, 2.0, 3)"), Value::Float(3.0));
        assert_eq!(value("min(4, -2, 3)"), Value::Integer(-2));
        assert!(matches!(value("max(1, 2, NaN)"), Value::Float(x) if x.is_nan()));
        assert_eq!(value("argmax(1, 2, 2)"), Value::Integer(2));
        assert_eq!(value("argmin(3, 1.0, 1)"), Value::Integer(2));
        assert_eq!(value("argmax(1, NaN, 5)"), Value::Integer(2));
        assert_eq!(value("average(1, 2, 3, 4)"), Value::Float(2.5));
        assert_eq!(value("median(5, 1, 3, 2)"), Value::Float(2.5));
        assert_eq!(value("sum(1, 2, 3)"), Value::Integer(6));
        assert_eq!(value("variance(1, 3)"), Value::Float(1.0));
        assert_eq!(value("stddev(2, 4, 4, 4, 5, 5, 7, 9)"), Value::Float(2.0));
        assert_eq!(value("sum(1, MISSING)"), Value::Missing);
    }

    #[test]
    fn distributions_and_trig() {
        assert_eq!(value("binomial(5, 2)"), Value::Integer(10));
        assert_eq!(value("binomial(0, 0)"), Value::Integer(1));
        let (result, warnings) = eval("binomial(2, 5)");
        assert_eq!(result.unwrap(), Value::Integer(0));
        assert_eq!(warnings, ["binomial returned zero because r > n."]);

        assert!((float("normal(0)") - 1.0 / (2.0 * PI).sqrt()).abs() < 1e-12);
        assert!((float("error_function(1)") - 0.8427007929).abs() < 1e-6);
        assert!(float("error_function(0)").abs() < 1e-6);
        assert_eq!(value("degrees(PI)"), Value::Float(180.0));
        assert!((float("atan2(1, 1)") - PI / 4.0).abs() < 1e-12);
    }
}
