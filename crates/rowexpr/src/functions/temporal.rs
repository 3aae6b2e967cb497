//! Temporal functions: construction, extraction, parsing, formatting and
//! calendar arithmetic over the chrono-backed temporal kinds

use std::fmt::Write as _;

use chrono::format::{Item, ParseErrorKind, StrftimeItems};
use chrono::{
    DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike,
};

use crate::computer::{Computer, Typed};
use crate::eval::{self, EvalError, EvaluationContext, add_period_zoned};
use crate::signature::{
    ArgMatcher, Arguments, arg, has_date_part_or_opt, has_time_part_or_opt, is_base,
    is_date_duration_or_opt, is_integer_or_opt, is_string, is_string_or_opt,
    is_time_duration_or_opt, optarg,
};
use crate::value::{Period, Value, parse_duration};
use crate::value_type::{BaseType, ValueType};

use super::{
    Category, Function, any_optional, optional_value, partial, propagating, required, returns,
    returns_exactly,
};

pub fn functions() -> Vec<Function> {
    let mut functions = construction();
    functions.extend(current());
    functions.extend(extraction());
    functions.extend(parsing());
    functions.extend(formatting());
    functions.extend(arithmetic());
    functions
}

// ============ Views over temporal computers ============

fn kind_error(what: &str, c: &Computer) -> EvalError {
    EvalError::Implementation(format!("{} computer has no {what}", c.base().name()))
}

fn date_of(c: &Computer) -> eval::Result<Typed<NaiveDate>> {
    Ok(match c {
        Computer::LocalDate(d) => d.clone(),
        Computer::LocalDateTime(dt) => dt.clone().map(|dt| dt.date()),
        Computer::ZonedDateTime(z) => z.clone().map(|z| z.date_naive()),
        Computer::Missing => Typed::missing(),
        other => return Err(kind_error("date part", other)),
    })
}

fn time_of(c: &Computer) -> eval::Result<Typed<NaiveTime>> {
    Ok(match c {
        Computer::LocalTime(t) => t.clone(),
        Computer::LocalDateTime(dt) => dt.clone().map(|dt| dt.time()),
        Computer::ZonedDateTime(z) => z.clone().map(|z| z.time()),
        Computer::Missing => Typed::missing(),
        other => return Err(kind_error("time part", other)),
    })
}

fn is_date_time_or_opt() -> ArgMatcher {
    ArgMatcher::new("LOCAL_DATE_TIME or ZONED_DATE_TIME", |t| {
        t.has_date_part() && t.has_time_part()
    })
    .or_missing()
}

fn integer_arg(args: &Arguments<Computer>, name: &str) -> eval::Result<Typed<i64>> {
    required(args, name)?.integer()
}

fn to_i32(n: i64, error: &str) -> eval::Result<i32> {
    i32::try_from(n).map_err(|_| EvalError::Evaluation(error.to_string()))
}

/// Parses a fixed zone: `Z`, `UTC`, `GMT`, or an offset like `+02:00`,
/// `-0530`, `+2` or `UTC+01:00`.
pub(crate) fn parse_zone(text: &str) -> Option<FixedOffset> {
    let upper = text.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }
    let rest = ["UTC", "GMT", "UT"]
        .iter()
        .find_map(|p| upper.strip_prefix(p))
        .unwrap_or(&upper);
    if rest.is_empty() || rest == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, digits) = match rest.split_at(1) {
        ("+", d) => (1, d),
        ("-", d) => (-1, d),
        _ => return None,
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        1 | 2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
        _ => return None,
    };
    if hours > 18 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn range_warning(field: &str, low: i64, high: i64, value: i64) -> String {
    format!("Invalid value for {field} (valid values {low} - {high}): {value}.")
}

// ============ Construction ============

fn make_date(
    year: i64,
    month: i64,
    day: i64,
    ctx: &dyn EvaluationContext,
) -> eval::Result<Option<NaiveDate>> {
    const OVERFLOW: &str = "Numerical overflow encountered while creating date value.";
    let (year, month, day) = (
        to_i32(year, OVERFLOW)?,
        to_i32(month, OVERFLOW)?,
        to_i32(day, OVERFLOW)?,
    );
    if !(1..=12).contains(&month) {
        ctx.add_warning(range_warning("month", 1, 12, month.into()));
        return Ok(None);
    }
    if !(1..=31).contains(&day) {
        ctx.add_warning(format!(
            "Invalid value for day (valid values 1 - 28/31): {day}."
        ));
        return Ok(None);
    }
    let date = NaiveDate::from_ymd_opt(year, month as u32, day as u32);
    if date.is_none() {
        ctx.add_warning(format!("Invalid date '{year}-{month:02}-{day:02}'."));
    }
    Ok(date)
}

fn make_time(
    hour: i64,
    minute: i64,
    second: i64,
    nano: i64,
    ctx: &dyn EvaluationContext,
) -> eval::Result<Option<NaiveTime>> {
    const OVERFLOW: &str = "Numerical overflow encountered while creating time value.";
    let fields = [
        ("hour", to_i32(hour, OVERFLOW)?, 23),
        ("minute", to_i32(minute, OVERFLOW)?, 59),
        ("second", to_i32(second, OVERFLOW)?, 59),
        ("nanosecond", to_i32(nano, OVERFLOW)?, 999_999_999),
    ];
    for (field, value, high) in fields {
        if !(0..=high).contains(&value) {
            ctx.add_warning(range_warning(field, 0, high.into(), value.into()));
            return Ok(None);
        }
    }
    Ok(NaiveTime::from_hms_nano_opt(
        fields[0].1 as u32,
        fields[1].1 as u32,
        fields[2].1 as u32,
        fields[3].1 as u32,
    ))
}

fn make_time_duration(
    hours: i64,
    minutes: i64,
    seconds: i64,
    nanos: i64,
) -> eval::Result<TimeDelta> {
    let too_large = || EvalError::Evaluation("Duration values are too large.".to_string());
    TimeDelta::try_hours(hours)
        .and_then(|d| d.checked_add(&TimeDelta::try_minutes(minutes)?))
        .and_then(|d| d.checked_add(&TimeDelta::try_seconds(seconds)?))
        .and_then(|d| d.checked_add(&TimeDelta::nanoseconds(nanos)))
        .ok_or_else(too_large)
}

fn construction() -> Vec<Function> {
    vec![
        Function::new(
            "make_date",
            Category::Temporal,
            "A LOCAL_DATE from `year`, `month` (1-12) and `day` (1-31). Invalid \
             combinations give MISSING with a warning.",
        )
        .keywords(&["create", "date", "local_date"])
        .overload(
            vec![
                arg("year", is_integer_or_opt()),
                arg("month", is_integer_or_opt()),
                arg("day", is_integer_or_opt()),
            ],
            returns_exactly(ValueType::OPT_LOCAL_DATE),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let (y, m, d) = (
                    integer_arg(args, "year")?,
                    integer_arg(args, "month")?,
                    integer_arg(args, "day")?,
                );
                Ok(Computer::LocalDate(partial(inputs, move |ctx| {
                    make_date(y.compute(ctx)?, m.compute(ctx)?, d.compute(ctx)?, ctx)
                })))
            },
        ),
        Function::new(
            "make_time",
            Category::Temporal,
            "A LOCAL_TIME from `hour`, `minute` and the optional `second` and \
             `nanosecond`, which default to 0. Out-of-range values give MISSING \
             with a warning.",
        )
        .keywords(&["create", "time", "local_time"])
        .overload(
            vec![
                arg("hour", is_integer_or_opt()),
                arg("minute", is_integer_or_opt()),
                optarg("second", is_integer_or_opt()),
                optarg("nanosecond", is_integer_or_opt()),
            ],
            returns_exactly(ValueType::OPT_LOCAL_TIME),
            |args, _| {
                let inputs = vec![
                    required(args, "hour")?.clone(),
                    required(args, "minute")?.clone(),
                ];
                let (h, m) = (integer_arg(args, "hour")?, integer_arg(args, "minute")?);
                let s = args.get("second").map(Computer::integer).transpose()?;
                let n = args.get("nanosecond").map(Computer::integer).transpose()?;
                Ok(Computer::LocalTime(partial(inputs, move |ctx| {
                    let second = optional_value(s.as_ref(), ctx)?.unwrap_or(0);
                    let nano = optional_value(n.as_ref(), ctx)?.unwrap_or(0);
                    make_time(h.compute(ctx)?, m.compute(ctx)?, second, nano, ctx)
                })))
            },
        ),
        Function::new(
            "make_datetime",
            Category::Temporal,
            "A LOCAL_DATE_TIME from a `date` and a `time`.",
        )
        .keywords(&["create", "datetime", "combine"])
        .overload(
            vec![
                arg("date", is_base(BaseType::LocalDate).or_missing()),
                arg("time", is_base(BaseType::LocalTime).or_missing()),
            ],
            returns(BaseType::LocalDateTime),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let date = required(args, "date")?.local_date()?;
                let time = required(args, "time")?.local_time()?;
                Ok(Computer::LocalDateTime(propagating(inputs, move |ctx| {
                    Ok(date.compute(ctx)?.and_time(time.compute(ctx)?))
                })))
            },
        ),
        Function::new(
            "make_zoned",
            Category::Temporal,
            "A ZONED_DATE_TIME from a `datetime` and a fixed `zone` such as `Z`, \
             `UTC` or `+01:00`. An unknown zone gives MISSING with a warning.",
        )
        .keywords(&["create", "zone", "offset", "timezone"])
        .overload(
            vec![
                arg("datetime", is_base(BaseType::LocalDateTime).or_missing()),
                arg("zone", is_string_or_opt()),
            ],
            returns_exactly(ValueType::OPT_ZONED_DATE_TIME),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let datetime = required(args, "datetime")?.local_date_time()?;
                let zone = required(args, "zone")?.string()?;
                Ok(Computer::ZonedDateTime(partial(inputs, move |ctx| {
                    let zone = zone.compute(ctx)?;
                    let Some(offset) = parse_zone(&zone) else {
                        ctx.add_warning(format!("Invalid zone id '{zone}'."));
                        return Ok(None);
                    };
                    Ok(datetime.compute(ctx)?.and_local_timezone(offset).single())
                })))
            },
        ),
        Function::new(
            "make_time_duration",
            Category::Temporal,
            "A TIME_DURATION of `hours`, `minutes` and the optional `seconds` and `nanoseconds`.",
        )
        .keywords(&["create", "duration", "interval"])
        .overload(
            vec![
                arg("hours", is_integer_or_opt()),
                arg("minutes", is_integer_or_opt()),
                optarg("seconds", is_integer_or_opt()),
                optarg("nanoseconds", is_integer_or_opt()),
            ],
            returns(BaseType::TimeDuration),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let (h, m) = (integer_arg(args, "hours")?, integer_arg(args, "minutes")?);
                let s = args.get("seconds").map(Computer::integer).transpose()?;
                let n = args.get("nanoseconds").map(Computer::integer).transpose()?;
                Ok(Computer::TimeDuration(propagating(inputs, move |ctx| {
                    make_time_duration(
                        h.compute(ctx)?,
                        m.compute(ctx)?,
                        optional_value(s.as_ref(), ctx)?.unwrap_or(0),
                        optional_value(n.as_ref(), ctx)?.unwrap_or(0),
                    )
                })))
            },
        ),
        Function::new(
            "make_date_duration",
            Category::Temporal,
            "A DATE_DURATION of `years`, `months` and `days`.",
        )
        .keywords(&["create", "period", "interval"])
        .overload(
            vec![
                arg("years", is_integer_or_opt()),
                arg("months", is_integer_or_opt()),
                arg("days", is_integer_or_opt()),
            ],
            returns(BaseType::DateDuration),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let (y, m, d) = (
                    integer_arg(args, "years")?,
                    integer_arg(args, "months")?,
                    integer_arg(args, "days")?,
                );
                Ok(Computer::DateDuration(propagating(inputs, move |ctx| {
                    const TOO_LARGE: &str = "Duration values are too large.";
                    Ok(Period::new(
                        to_i32(y.compute(ctx)?, TOO_LARGE)?,
                        to_i32(m.compute(ctx)?, TOO_LARGE)?,
                        to_i32(d.compute(ctx)?, TOO_LARGE)?,
                    ))
                })))
            },
        ),
    ]
}

// ============ Current time ============

fn current() -> Vec<Function> {
    vec![
        Function::new(
            "now",
            Category::Temporal,
            "The moment the evaluation started, the same for every row.",
        )
        .keywords(&["current", "time", "timestamp"])
        .overload(Vec::new(), returns_exactly(ValueType::ZONED_DATE_TIME), |_, _| {
            Ok(Computer::ZonedDateTime(Typed::present(|ctx| {
                Ok(ctx.execution_start_time())
            })))
        }),
        Function::new(
            "today",
            Category::Temporal,
            "The date on which the evaluation started, the same for every row.",
        )
        .keywords(&["current", "date"])
        .overload(Vec::new(), returns_exactly(ValueType::LOCAL_DATE), |_, _| {
            Ok(Computer::LocalDate(Typed::present(|ctx| {
                Ok(ctx.execution_start_time().date_naive())
            })))
        }),
    ]
}

// ============ Extraction ============

fn extract_field(
    name: &'static str,
    description: &'static str,
    matcher: fn() -> ArgMatcher,
    view: fn(&Computer) -> eval::Result<Typed<i64>>,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["extract", "get", "part"])
        .overload(
            vec![arg("temporal", matcher())],
            returns(BaseType::Integer),
            move |args, _| Ok(Computer::Integer(view(required(args, "temporal")?)?)),
        )
}

fn extraction() -> Vec<Function> {
    vec![
        extract_field(
            "extract_year",
            "The year of a date or date-time.",
            has_date_part_or_opt,
            |c| Ok(date_of(c)?.map(|d| i64::from(d.year()))),
        ),
        extract_field(
            "extract_month",
            "The month (1-12) of a date or date-time.",
            has_date_part_or_opt,
            |c| Ok(date_of(c)?.map(|d| i64::from(d.month()))),
        ),
        extract_field(
            "extract_day_of_month",
            "The day of the month (1-31) of a date or date-time.",
            has_date_part_or_opt,
            |c| Ok(date_of(c)?.map(|d| i64::from(d.day()))),
        ),
        extract_field(
            "extract_hour",
            "The hour (0-23) of a time or date-time.",
            has_time_part_or_opt,
            |c| Ok(time_of(c)?.map(|t| i64::from(t.hour()))),
        ),
        extract_field(
            "extract_minute",
            "The minute (0-59) of a time or date-time.",
            has_time_part_or_opt,
            |c| Ok(time_of(c)?.map(|t| i64::from(t.minute()))),
        ),
        extract_field(
            "extract_second",
            "The second (0-59) of a time or date-time.",
            has_time_part_or_opt,
            |c| Ok(time_of(c)?.map(|t| i64::from(t.second()))),
        ),
        extract_field(
            "extract_nanosecond",
            "The nanosecond of the second of a time or date-time.",
            has_time_part_or_opt,
            |c| Ok(time_of(c)?.map(|t| i64::from(t.nanosecond()))),
        ),
        Function::new("extract_date", Category::Temporal, "The date part of a date-time.")
            .keywords(&["extract", "date"])
            .overload(
                vec![arg("temporal", is_date_time_or_opt())],
                returns(BaseType::LocalDate),
                |args, _| Ok(Computer::LocalDate(date_of(required(args, "temporal")?)?)),
            ),
        Function::new("extract_time", Category::Temporal, "The time part of a date-time.")
            .keywords(&["extract", "time"])
            .overload(
                vec![arg("temporal", is_date_time_or_opt())],
                returns(BaseType::LocalTime),
                |args, _| Ok(Computer::LocalTime(time_of(required(args, "temporal")?)?)),
            ),
        Function::new(
            "extract_datetime",
            Category::Temporal,
            "The local date and time of a ZONED_DATE_TIME, dropping the zone \
             without adjusting the wall time.",
        )
        .keywords(&["extract", "remove zone"])
        .overload(
            vec![arg("temporal", is_base(BaseType::ZonedDateTime).or_missing())],
            returns(BaseType::LocalDateTime),
            |args, _| {
                let z = required(args, "temporal")?.zoned_date_time()?;
                Ok(Computer::LocalDateTime(z.map(|z| z.naive_local())))
            },
        ),
        duration_conversion("to_hours", "`duration` in hours.", 3600.0),
        duration_conversion("to_minutes", "`duration` in minutes.", 60.0),
        duration_conversion("to_seconds", "`duration` in seconds.", 1.0),
    ]
}

fn seconds_of(d: TimeDelta) -> f64 {
    d.num_seconds() as f64 + f64::from(d.subsec_nanos()) / 1e9
}

fn duration_conversion(
    name: &'static str,
    description: &'static str,
    unit_seconds: f64,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["convert", "duration"])
        .overload(
            vec![arg("duration", is_time_duration_or_opt())],
            returns(BaseType::Float),
            move |args, _| {
                let d = required(args, "duration")?.time_duration()?;
                Ok(Computer::Float(d.map(move |d| seconds_of(d) / unit_seconds)))
            },
        )
}

// ============ Parsing ============

fn parse_with<T>(
    text: &str,
    format: Option<&str>,
    kind: BaseType,
    label: &str,
    default: fn(&str) -> Option<T>,
    custom: fn(&str, &str) -> chrono::ParseResult<T>,
    ctx: &dyn EvaluationContext,
) -> Option<T> {
    let Some(format) = format else {
        let parsed = default(text);
        if parsed.is_none() {
            ctx.add_warning(format!("{label} string '{text}' did not match default format."));
        }
        return parsed;
    };
    match custom(text, format) {
        Ok(value) => Some(value),
        Err(e) if e.kind() == ParseErrorKind::NotEnough => {
            ctx.add_warning(format!(
                "Format '{format}' is underspecified for {}.",
                kind.name()
            ));
            None
        }
        Err(_) => {
            ctx.add_warning(format!(
                "{label} string '{text}' did not match format '{format}'."
            ));
            None
        }
    }
}

fn default_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

fn default_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn default_date_time(s: &str) -> Option<NaiveDateTime> {
    let (date, time) = s.trim().split_once(['T', ' '])?;
    Some(default_date(date)?.and_time(default_time(time)?))
}

/// ISO date-time with `Z` or a numeric offset; a trailing `[Region/City]` is ignored.
fn default_zoned(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    let s = match s.find('[') {
        Some(i) if s.ends_with(']') => &s[..i],
        _ => s,
    };
    if let Ok(z) = DateTime::parse_from_rfc3339(s) {
        return Some(z);
    }
    let split = s
        .char_indices()
        .skip_while(|(_, c)| *c != 'T' && *c != ' ')
        .find(|(_, c)| matches!(c, '+' | '-' | 'Z' | 'z'))
        .map(|(i, _)| i)?;
    let (local, zone) = s.split_at(split);
    default_date_time(local)?
        .and_local_timezone(parse_zone(zone)?)
        .single()
}

fn parse_function(
    name: &'static str,
    description: &'static str,
    out: BaseType,
    parse: fn(&str, Option<&str>, &dyn EvaluationContext) -> Option<Value>,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["parse", "convert", "string"])
        .overload(
            vec![arg("string", is_string_or_opt()), optarg("format", is_string_or_opt())],
            returns_exactly(ValueType::of(out, true)),
            move |args, _| {
                let input = required(args, "string")?.clone();
                let text = input.string()?;
                let format = args.get("format").map(Computer::string).transpose()?;
                let parsed: Typed<Value> = partial(vec![input], move |ctx| {
                    let format = optional_value(format.as_ref(), ctx)?;
                    Ok(parse(&text.compute(ctx)?, format.as_deref(), ctx))
                });
                value_computer(out, parsed)
            },
        )
}

/// Unpacks a `Value` source whose values are all of kind `out`.
fn value_computer(out: BaseType, source: Typed<Value>) -> eval::Result<Computer> {
    fn unpack<T: 'static>(
        source: Typed<Value>,
        get: fn(Value) -> Option<T>,
    ) -> Typed<T> {
        source.try_map(move |v, _| {
            get(v).ok_or_else(|| {
                EvalError::Implementation("parsed value has the wrong kind".to_string())
            })
        })
    }
    Ok(match out {
        BaseType::LocalDate => Computer::LocalDate(unpack(source, |v| match v {
            Value::LocalDate(d) => Some(d),
            _ => None,
        })),
        BaseType::LocalTime => Computer::LocalTime(unpack(source, |v| match v {
            Value::LocalTime(t) => Some(t),
            _ => None,
        })),
        BaseType::LocalDateTime => Computer::LocalDateTime(unpack(source, |v| match v {
            Value::LocalDateTime(dt) => Some(dt),
            _ => None,
        })),
        BaseType::ZonedDateTime => Computer::ZonedDateTime(unpack(source, |v| match v {
            Value::ZonedDateTime(z) => Some(z),
            _ => None,
        })),
        BaseType::TimeDuration => Computer::TimeDuration(unpack(source, |v| match v {
            Value::TimeDuration(d) => Some(d),
            _ => None,
        })),
        BaseType::DateDuration => Computer::DateDuration(unpack(source, |v| match v {
            Value::DateDuration(p) => Some(p),
            _ => None,
        })),
        other => {
            return Err(EvalError::Implementation(format!(
                "cannot parse {}",
                other.name()
            )));
        }
    })
}

fn duration_parser(
    name: &'static str,
    description: &'static str,
    out: BaseType,
    parse: fn(&str) -> Option<Value>,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["parse", "duration", "ISO"])
        .overload(
            vec![arg("string", is_string_or_opt())],
            returns_exactly(ValueType::of(out, true)),
            move |args, _| {
                let input = required(args, "string")?.clone();
                let text = input.string()?;
                let parsed = partial(vec![input], move |ctx| {
                    let text = text.compute(ctx)?;
                    let value = parse(&text);
                    if value.is_none() {
                        ctx.add_warning(format!("Invalid {} string '{text}'.", out.name()));
                    }
                    Ok(value)
                });
                value_computer(out, parsed)
            },
        )
}

fn parsing() -> Vec<Function> {
    vec![
        parse_function(
            "parse_date",
            "Parses a LOCAL_DATE from `string`, by default `YYYY-MM-DD`, or with a \
             chrono `format` such as `%d.%m.%Y`.",
            BaseType::LocalDate,
            |s, f, ctx| {
                parse_with(
                    s,
                    f,
                    BaseType::LocalDate,
                    "Date",
                    default_date,
                    NaiveDate::parse_from_str,
                    ctx,
                )
                .map(Value::LocalDate)
            },
        ),
        parse_function(
            "parse_time",
            "Parses a LOCAL_TIME from `string`, by default `HH:MM[:SS[.fff]]`.",
            BaseType::LocalTime,
            |s, f, ctx| {
                parse_with(
                    s,
                    f,
                    BaseType::LocalTime,
                    "Time",
                    default_time,
                    NaiveTime::parse_from_str,
                    ctx,
                )
                .map(Value::LocalTime)
            },
        ),
        parse_function(
            "parse_datetime",
            "Parses a LOCAL_DATE_TIME from `string`, by default `YYYY-MM-DDTHH:MM[:SS[.fff]]`.",
            BaseType::LocalDateTime,
            |s, f, ctx| {
                parse_with(
                    s,
                    f,
                    BaseType::LocalDateTime,
                    "Date time",
                    default_date_time,
                    NaiveDateTime::parse_from_str,
                    ctx,
                )
                .map(Value::LocalDateTime)
            },
        ),
        parse_function(
            "parse_zoned_datetime",
            "Parses a ZONED_DATE_TIME from `string`, by default an ISO date-time \
             followed by `Z` or an offset like `+01:00`.",
            BaseType::ZonedDateTime,
            |s, f, ctx| {
                parse_with(
                    s,
                    f,
                    BaseType::ZonedDateTime,
                    "Zoned date time",
                    default_zoned,
                    DateTime::parse_from_str,
                    ctx,
                )
                .map(Value::ZonedDateTime)
            },
        ),
        duration_parser(
            "parse_time_duration",
            "Parses a TIME_DURATION from an ISO-8601 string such as `PT1H30M`.",
            BaseType::TimeDuration,
            |s| parse_duration(s).map(Value::TimeDuration),
        ),
        duration_parser(
            "parse_date_duration",
            "Parses a DATE_DURATION from an ISO-8601 string such as `P1Y2M3D`.",
            BaseType::DateDuration,
            |s| Period::parse_iso(s).map(Value::DateDuration),
        ),
    ]
}

// ============ Formatting ============

/// Formats `value` with a chrono pattern, or `None` with a warning if the
/// pattern is invalid or asks for fields `value` does not have.
fn format_value(
    value: &dyn Fn(&[Item<'_>]) -> Result<String, std::fmt::Error>,
    format: &str,
    kind: BaseType,
    ctx: &dyn EvaluationContext,
) -> Option<String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        ctx.add_warning(format!("Invalid format '{format}'."));
        return None;
    }
    match value(&items) {
        Ok(s) => Some(s),
        Err(_) => {
            ctx.add_warning(format!("Format '{format}' overspecified for {}.", kind.name()));
            None
        }
    }
}

fn render(formatted: impl std::fmt::Display) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    write!(out, "{formatted}")?;
    Ok(out)
}

fn format_function(
    name: &'static str,
    description: &'static str,
    matcher: ArgMatcher,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["format", "string", "convert"])
        .overload(
            vec![arg("temporal", matcher), arg("format", is_string())],
            returns_exactly(ValueType::OPT_STRING),
            |args, _| {
                let input = required(args, "temporal")?.clone();
                let format = required(args, "format")?.string()?;
                let temporal = input.clone();
                Ok(Computer::String(partial(vec![input], move |ctx| {
                    let format = format.compute(ctx)?;
                    let kind = temporal.base();
                    let formatted = match &temporal {
                        Computer::LocalDate(d) => {
                            let d = d.compute(ctx)?;
                            format_value(
                                &|items| render(d.format_with_items(items.iter())),
                                &format,
                                kind,
                                ctx,
                            )
                        }
                        Computer::LocalTime(t) => {
                            let t = t.compute(ctx)?;
                            format_value(
                                &|items| render(t.format_with_items(items.iter())),
                                &format,
                                kind,
                                ctx,
                            )
                        }
                        Computer::LocalDateTime(dt) => {
                            let dt = dt.compute(ctx)?;
                            format_value(
                                &|items| render(dt.format_with_items(items.iter())),
                                &format,
                                kind,
                                ctx,
                            )
                        }
                        Computer::ZonedDateTime(z) => {
                            let z = z.compute(ctx)?;
                            format_value(
                                &|items| render(z.format_with_items(items.iter())),
                                &format,
                                kind,
                                ctx,
                            )
                        }
                        other => return Err(kind_error("format", other)),
                    };
                    Ok(formatted)
                })))
            },
        )
}

fn formatting() -> Vec<Function> {
    vec![
        format_function(
            "format_date",
            "Formats a LOCAL_DATE with a chrono `format` such as `%d.%m.%Y`.",
            is_base(BaseType::LocalDate).or_missing(),
        ),
        format_function(
            "format_time",
            "Formats a LOCAL_TIME with a chrono `format` such as `%H:%M`.",
            is_base(BaseType::LocalTime).or_missing(),
        ),
        format_function(
            "format_datetime",
            "Formats a LOCAL_DATE_TIME or ZONED_DATE_TIME with a chrono `format`.",
            is_date_time_or_opt(),
        ),
    ]
}

// ============ Arithmetic ============

/// Return type for `name(start, end)` over two values of the same temporal kind.
fn same_kind(
    out: BaseType,
    needs: &'static str,
    accepts: fn(ValueType) -> bool,
) -> impl Fn(&Arguments<ValueType>) -> Result<ValueType, String> + Send + Sync + 'static {
    move |args| {
        let (Some(start), Some(end)) = (args.get("start"), args.get("end")) else {
            return Err("Expected a start and an end argument.".to_string());
        };
        if start.base() != end.base() && !start.is_missing() && !end.is_missing() {
            return Err(format!(
                "Both arguments must be of the same base type, but one was {} and the other was {}",
                start.base().name(),
                end.base().name()
            ));
        }
        let known = if start.is_missing() { end } else { start };
        if !known.is_missing() && !accepts(*known) {
            return Err(format!("{} does not have {needs} information", known.base().name()));
        }
        Ok(ValueType::of(out, any_optional(args)))
    }
}

fn dates_between(
    name: &'static str,
    description: &'static str,
    count: fn(NaiveDate, NaiveDate) -> i64,
) -> Function {
    Function::new(name, Category::Temporal, description)
        .keywords(&["difference", "interval", "between"])
        .overload(
            vec![arg("start", has_date_part_or_opt()), arg("end", has_date_part_or_opt())],
            same_kind(BaseType::Integer, "date", ValueType::has_date_part),
            move |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let start = date_of(required(args, "start")?)?;
                let end = date_of(required(args, "end")?)?;
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    Ok(count(start.compute(ctx)?, end.compute(ctx)?))
                })))
            },
        )
}

fn total_months(start: NaiveDate, end: NaiveDate) -> i64 {
    Period::between(start, end).total_months()
}

fn time_between(start: &Computer, end: &Computer) -> eval::Result<Typed<TimeDelta>> {
    fn diff<T: 'static>(
        start: Typed<T>,
        end: Typed<T>,
        sub: fn(T, T) -> TimeDelta,
    ) -> Typed<TimeDelta> {
        let (s, e) = (start.clone(), end.clone());
        Typed::new(
            move |ctx| Ok(sub(end.compute(ctx)?, start.compute(ctx)?)),
            move |ctx| Ok(s.is_missing(ctx)? || e.is_missing(ctx)?),
        )
    }
    Ok(match (start, end) {
        (Computer::LocalTime(s), Computer::LocalTime(e)) => {
            diff(s.clone(), e.clone(), |e, s| e - s)
        }
        (Computer::LocalDateTime(s), Computer::LocalDateTime(e)) => {
            diff(s.clone(), e.clone(), |e, s| e - s)
        }
        (Computer::ZonedDateTime(s), Computer::ZonedDateTime(e)) => {
            diff(s.clone(), e.clone(), |e, s| e - s)
        }
        _ => Typed::missing(),
    })
}

fn add_time(start: &Computer, duration: Typed<TimeDelta>) -> eval::Result<Computer> {
    let too_large = || {
        EvalError::Evaluation("Resulting date-time is too large to be represented.".to_string())
    };
    let missing = {
        let (start, duration) = (start.clone(), duration.clone());
        move |ctx: &dyn EvaluationContext| Ok(start.is_missing(ctx)? || duration.is_missing(ctx)?)
    };
    Ok(match start {
        Computer::LocalTime(t) => {
            let t = t.clone();
            Computer::LocalTime(Typed::new(
                move |ctx| Ok(t.compute(ctx)?.overflowing_add_signed(duration.compute(ctx)?).0),
                missing,
            ))
        }
        Computer::LocalDateTime(dt) => {
            let dt = dt.clone();
            Computer::LocalDateTime(Typed::new(
                move |ctx| {
                    dt.compute(ctx)?
                        .checked_add_signed(duration.compute(ctx)?)
                        .ok_or_else(too_large)
                },
                missing,
            ))
        }
        Computer::ZonedDateTime(z) => {
            let z = z.clone();
            Computer::ZonedDateTime(Typed::new(
                move |ctx| {
                    z.compute(ctx)?
                        .checked_add_signed(duration.compute(ctx)?)
                        .ok_or_else(too_large)
                },
                missing,
            ))
        }
        Computer::Missing => Computer::Missing,
        other => return Err(kind_error("time part", other)),
    })
}

fn add_date(start: &Computer, duration: Typed<Period>) -> eval::Result<Computer> {
    let too_large = || {
        EvalError::Evaluation("Resulting date-time is too large to be represented.".to_string())
    };
    let missing = {
        let (start, duration) = (start.clone(), duration.clone());
        move |ctx: &dyn EvaluationContext| Ok(start.is_missing(ctx)? || duration.is_missing(ctx)?)
    };
    Ok(match start {
        Computer::LocalDate(d) => {
            let d = d.clone();
            Computer::LocalDate(Typed::new(
                move |ctx| {
                    duration
                        .compute(ctx)?
                        .add_to_date(d.compute(ctx)?)
                        .ok_or_else(too_large)
                },
                missing,
            ))
        }
        Computer::LocalDateTime(dt) => {
            let dt = dt.clone();
            Computer::LocalDateTime(Typed::new(
                move |ctx| {
                    duration
                        .compute(ctx)?
                        .add_to_datetime(dt.compute(ctx)?)
                        .ok_or_else(too_large)
                },
                missing,
            ))
        }
        Computer::ZonedDateTime(z) => {
            let z = z.clone();
            Computer::ZonedDateTime(Typed::new(
                move |ctx| {
                    add_period_zoned(z.compute(ctx)?, duration.compute(ctx)?)
                        .ok_or_else(too_large)
                },
                missing,
            ))
        }
        Computer::Missing => Computer::Missing,
        other => return Err(kind_error("date part", other)),
    })
}

/// The start's kind, optional if either argument is.
fn start_kind(args: &Arguments<ValueType>) -> Result<ValueType, String> {
    let start = args
        .get("start")
        .copied()
        .ok_or_else(|| "Missing required argument 'start'.".to_string())?;
    Ok(start.with_optional(any_optional(args)))
}

fn arithmetic() -> Vec<Function> {
    vec![
        dates_between(
            "days_between",
            "The number of days from `start` to `end`; negative if `end` is earlier. \
             Times and zones are ignored.",
            |s, e| (e - s).num_days(),
        ),
        dates_between(
            "months_between",
            "The number of complete months from `start` to `end`.",
            total_months,
        ),
        dates_between(
            "years_between",
            "The number of complete years from `start` to `end`.",
            |s, e| total_months(s, e) / 12,
        ),
        Function::new(
            "date_duration_between",
            Category::Temporal,
            "The DATE_DURATION from the date part of `start` to that of `end`.",
        )
        .keywords(&["difference", "period", "between"])
        .overload(
            vec![arg("start", has_date_part_or_opt()), arg("end", has_date_part_or_opt())],
            same_kind(BaseType::DateDuration, "date", ValueType::has_date_part),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let start = date_of(required(args, "start")?)?;
                let end = date_of(required(args, "end")?)?;
                Ok(Computer::DateDuration(propagating(inputs, move |ctx| {
                    Ok(Period::between(start.compute(ctx)?, end.compute(ctx)?))
                })))
            },
        ),
        Function::new(
            "time_duration_between",
            Category::Temporal,
            "The TIME_DURATION from `start` to `end`, which must be the same kind \
             of time or date-time. ZONED_DATE_TIME values are compared as instants.",
        )
        .keywords(&["difference", "duration", "between"])
        .overload(
            vec![arg("start", has_time_part_or_opt()), arg("end", has_time_part_or_opt())],
            same_kind(BaseType::TimeDuration, "time", ValueType::has_time_part),
            |args, _| {
                let start = required(args, "start")?;
                let end = required(args, "end")?;
                Ok(Computer::TimeDuration(time_between(start, end)?))
            },
        ),
        Function::new(
            "add_time_duration",
            Category::Temporal,
            "`start` moved by `duration`. LOCAL_TIME values wrap around midnight.",
        )
        .keywords(&["plus", "shift"])
        .overload(
            vec![arg("start", has_time_part_or_opt()), arg("duration", is_time_duration_or_opt())],
            start_kind,
            |args, _| {
                let duration = required(args, "duration")?.time_duration()?;
                add_time(required(args, "start")?, duration)
            },
        ),
        Function::new(
            "add_date_duration",
            Category::Temporal,
            "`start` moved by a calendar `duration`; days that do not exist in the \
             target month are clamped to its last day.",
        )
        .keywords(&["plus", "shift"])
        .overload(
            vec![arg("start", has_date_part_or_opt()), arg("duration", is_date_duration_or_opt())],
            start_kind,
            |args, _| {
                let duration = required(args, "duration")?.date_duration()?;
                add_date(required(args, "start")?, duration)
            },
        ),
    ]
}
