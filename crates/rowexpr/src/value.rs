//! Runtime values
//!
//! Used for literals, host-provided cells and flow variables, and as the
//! rendered result of evaluating a Computer for one row.

use std::fmt;

use chrono::{
    DateTime, Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta,
};

use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Missing,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    LocalDate(NaiveDate),
    LocalTime(NaiveTime),
    LocalDateTime(NaiveDateTime),
    ZonedDateTime(DateTime<FixedOffset>),
    DateDuration(Period),
    TimeDuration(TimeDelta),
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v.into())
            }
        })*
    };
}

value_from! {
    bool => Boolean,
    i64 => Integer,
    f64 => Float,
    String => String,
    &str => String,
    NaiveDate => LocalDate,
    NaiveTime => LocalTime,
    NaiveDateTime => LocalDateTime,
    DateTime<FixedOffset> => ZonedDateTime,
    Period => DateDuration,
    TimeDelta => TimeDuration,
}

impl Value {
    /// The required type of this value, or MISSING.
    pub fn value_type(&self) -> ValueType {
        let base = match self {
            Value::Missing => BaseType::Missing,
            Value::Boolean(_) => BaseType::Boolean,
            Value::Integer(_) => BaseType::Integer,
            Value::Float(_) => BaseType::Float,
            Value::String(_) => BaseType::String,
            Value::LocalDate(_) => BaseType::LocalDate,
            Value::LocalTime(_) => BaseType::LocalTime,
            Value::LocalDateTime(_) => BaseType::LocalDateTime,
            Value::ZonedDateTime(_) => BaseType::ZonedDateTime,
            Value::DateDuration(_) => BaseType::DateDuration,
            Value::TimeDuration(_) => BaseType::TimeDuration,
        };
        ValueType::of(base, false)
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// String form used by concatenation, `to_string` and host output.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => f.write_str("MISSING"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => f.write_str(&format_float(*x)),
            Value::String(s) => f.write_str(s),
            Value::LocalDate(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::LocalTime(t) => f.write_str(&format_time(*t)),
            Value::LocalDateTime(dt) => {
                write!(f, "{}T{}", dt.date().format("%Y-%m-%d"), format_time(dt.time()))
            }
            Value::ZonedDateTime(zdt) => {
                let local = zdt.naive_local();
                let offset = zdt.offset();
                let offset = if offset.local_minus_utc() == 0 {
                    "Z".to_string()
                } else {
                    offset.to_string()
                };
                write!(
                    f,
                    "{}T{}{}",
                    local.date().format("%Y-%m-%d"),
                    format_time(local.time()),
                    offset
                )
            }
            Value::DateDuration(p) => write!(f, "{p}"),
            Value::TimeDuration(d) => f.write_str(&format_duration(*d)),
        }
    }
}

/// Renders a float the way the expression language prints numbers:
/// plain decimals in `[1e-3, 1e7)`, scientific notation outside of it.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = x.abs();
    if x == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let s = format!("{x}");
        if s.contains('.') { s } else { format!("{s}.0") }
    } else {
        let s = format!("{x:e}");
        let (mantissa, exponent) = s.split_once('e').unwrap_or((&s, "0"));
        let mantissa = if mantissa.contains('.') {
            mantissa.to_string()
        } else {
            format!("{mantissa}.0")
        };
        format!("{mantissa}E{exponent}")
    }
}

/// `HH:MM`, `HH:MM:SS` or `HH:MM:SS.fff…`, dropping trailing zero parts.
fn format_time(t: NaiveTime) -> String {
    use chrono::Timelike;
    let nanos = t.nanosecond();
    if nanos == 0 && t.second() == 0 {
        format!("{:02}:{:02}", t.hour(), t.minute())
    } else if nanos == 0 {
        format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second())
    } else if nanos % 1_000_000 == 0 {
        format!(
            "{:02}:{:02}:{:02}.{:03}",
            t.hour(),
            t.minute(),
            t.second(),
            nanos / 1_000_000
        )
    } else if nanos % 1_000 == 0 {
        format!(
            "{:02}:{:02}:{:02}.{:06}",
            t.hour(),
            t.minute(),
            t.second(),
            nanos / 1_000
        )
    } else {
        format!(
            "{:02}:{:02}:{:02}.{:09}",
            t.hour(),
            t.minute(),
            t.second(),
            nanos
        )
    }
}

/// ISO-8601 rendering such as `PT1H30M` or `PT-0.5S`.
pub fn format_duration(d: TimeDelta) -> String {
    if d.is_zero() {
        return "PT0S".to_string();
    }
    let negative = d < TimeDelta::zero();
    let abs = d.abs();
    let total_secs = abs.num_seconds();
    let nanos = abs.subsec_nanos();
    let sign = if negative { "-" } else { "" };

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    let mut out = String::from("PT");
    if hours != 0 {
        out.push_str(&format!("{sign}{hours}H"));
    }
    if minutes != 0 {
        out.push_str(&format!("{sign}{minutes}M"));
    }
    if secs != 0 || nanos != 0 {
        if nanos == 0 {
            out.push_str(&format!("{sign}{secs}S"));
        } else {
            let frac = format!("{nanos:09}");
            out.push_str(&format!("{sign}{secs}.{}S", frac.trim_end_matches('0')));
        }
    }
    out
}

/// Parses `PnDTnHnMn.nS` (days, hours, minutes, fractional seconds).
pub fn parse_duration(text: &str) -> Option<TimeDelta> {
    let upper = text.trim().to_ascii_uppercase();
    let (negate, rest) = match upper.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, upper.strip_prefix('+').unwrap_or(&upper)),
    };
    let rest = rest.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };
    if date_part.is_empty() && time_part.is_none_or(str::is_empty) {
        return None;
    }

    let mut total = TimeDelta::zero();
    for (amount, unit) in designators(date_part)? {
        let days: i64 = amount.parse().ok()?;
        match unit {
            'D' => total = total.checked_add(&TimeDelta::try_days(days)?)?,
            _ => return None,
        }
    }
    if let Some(time_part) = time_part {
        for (amount, unit) in designators(time_part)? {
            let delta = match unit {
                'H' => TimeDelta::try_hours(amount.parse().ok()?)?,
                'M' => TimeDelta::try_minutes(amount.parse().ok()?)?,
                'S' => fractional_seconds(&amount)?,
                _ => return None,
            };
            total = total.checked_add(&delta)?;
        }
    }
    Some(if negate { -total } else { total })
}

fn fractional_seconds(amount: &str) -> Option<TimeDelta> {
    let (negative, digits) = match amount.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, amount),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if frac.len() > 9 {
        return None;
    }
    let secs: i64 = whole.parse().ok()?;
    let nanos: i64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };
    let delta = TimeDelta::try_seconds(secs)?.checked_add(&TimeDelta::nanoseconds(nanos))?;
    Some(if negative { -delta } else { delta })
}

/// Splits `1Y-2M3D` into `[("1", 'Y'), ("-2", 'M'), ("3", 'D')]`.
fn designators(text: &str) -> Option<Vec<(String, char)>> {
    let mut parts = Vec::new();
    let mut amount = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' {
            amount.push(c);
        } else if amount.is_empty() {
            return None;
        } else {
            parts.push((std::mem::take(&mut amount), c));
        }
    }
    if amount.is_empty() { Some(parts) } else { None }
}

// ============ Date durations ============

/// A calendar-based amount of time: years, months and days.
///
/// Components are kept separately (no normalization), so `P1M` and `P30D`
/// are different values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Period {
    pub years: i32,
    pub months: i32,
    pub days: i32,
}

impl Period {
    pub const ZERO: Period = Period {
        years: 0,
        months: 0,
        days: 0,
    };

    pub fn new(years: i32, months: i32, days: i32) -> Self {
        Self {
            years,
            months,
            days,
        }
    }

    pub fn checked_add(self, other: Period) -> Option<Period> {
        Some(Period {
            years: self.years.checked_add(other.years)?,
            months: self.months.checked_add(other.months)?,
            days: self.days.checked_add(other.days)?,
        })
    }

    pub fn checked_sub(self, other: Period) -> Option<Period> {
        self.checked_add(other.checked_neg()?)
    }

    pub fn checked_neg(self) -> Option<Period> {
        self.checked_mul(-1)
    }

    pub fn checked_mul(self, factor: i32) -> Option<Period> {
        Some(Period {
            years: self.years.checked_mul(factor)?,
            months: self.months.checked_mul(factor)?,
            days: self.days.checked_mul(factor)?,
        })
    }

    pub fn total_months(self) -> i64 {
        i64::from(self.years) * 12 + i64::from(self.months)
    }

    /// Adds years and months first (clamping to the month's last day), then days.
    pub fn add_to_date(self, date: NaiveDate) -> Option<NaiveDate> {
        let months = self.total_months();
        let shifted = if months >= 0 {
            date.checked_add_months(Months::new(u32::try_from(months).ok()?))?
        } else {
            date.checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
        };
        shifted.checked_add_signed(TimeDelta::try_days(i64::from(self.days))?)
    }

    pub fn subtract_from_date(self, date: NaiveDate) -> Option<NaiveDate> {
        self.checked_neg()?.add_to_date(date)
    }

    pub fn add_to_datetime(self, dt: NaiveDateTime) -> Option<NaiveDateTime> {
        Some(self.add_to_date(dt.date())?.and_time(dt.time()))
    }

    /// Calendar distance from `start` to `end`, negative if `end` is earlier.
    pub fn between(start: NaiveDate, end: NaiveDate) -> Period {
        let mut total_months = (i64::from(end.year()) * 12 + i64::from(end.month0()))
            - (i64::from(start.year()) * 12 + i64::from(start.month0()));
        let mut days = i64::from(end.day()) - i64::from(start.day());
        if total_months > 0 && days < 0 {
            total_months -= 1;
            let anchor = Months::new(u32::try_from(total_months).unwrap_or(0));
            if let Some(calc) = start.checked_add_months(anchor) {
                days = (end - calc).num_days();
            }
        } else if total_months < 0 && days > 0 {
            total_months += 1;
            days -= i64::from(days_in_month(end));
        }
        Period {
            years: (total_months / 12) as i32,
            months: (total_months % 12) as i32,
            days: days as i32,
        }
    }

    /// Parses `PnYnMnWnD`; weeks are folded into days.
    pub fn parse_iso(text: &str) -> Option<Period> {
        let upper = text.trim().to_ascii_uppercase();
        let (negate, rest) = match upper.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, upper.strip_prefix('+').unwrap_or(&upper)),
        };
        let rest = rest.strip_prefix('P')?;
        if rest.is_empty() {
            return None;
        }
        let mut period = Period::ZERO;
        for (amount, unit) in designators(rest)? {
            let n: i32 = amount.parse().ok()?;
            match unit {
                'Y' => period.years = period.years.checked_add(n)?,
                'M' => period.months = period.months.checked_add(n)?,
                'W' => period.days = period.days.checked_add(n.checked_mul(7)?)?,
                'D' => period.days = period.days.checked_add(n)?,
                _ => return None,
            }
        }
        if negate { period.checked_neg() } else { Some(period) }
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (y, m) = (date.year(), date.month());
    let next = if m == 12 {
        NaiveDate::from_ymd_opt(y + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(y, m + 1, 1)
    };
    next.and_then(|n| n.pred_opt()).map_or(31, |last| last.day())
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Period::ZERO {
            return f.write_str("P0D");
        }
        f.write_str("P")?;
        if self.years != 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months != 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days != 0 {
            write!(f, "{}D", self.days)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_rendering() {
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(format_float(1e10), "1.0E10");
        assert_eq!(format_float(1.5e-5), "1.5E-5");
        assert_eq!(format_float(f64::INFINITY), "Infinity");
        assert_eq!(format_float(f64::NAN), "NaN");
    }

    #[test]
    fn duration_rendering() {
        assert_eq!(format_duration(TimeDelta::zero()), "PT0S");
        assert_eq!(format_duration(TimeDelta::minutes(90)), "PT1H30M");
        assert_eq!(format_duration(TimeDelta::milliseconds(-500)), "PT-0.5S");
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(parse_duration("PT1H30M"), Some(TimeDelta::minutes(90)));
        assert_eq!(parse_duration("P1DT1S"), Some(TimeDelta::seconds(86_401)));
        assert_eq!(parse_duration("PT0.25S"), Some(TimeDelta::milliseconds(250)));
        assert_eq!(parse_duration("1H"), None);
        assert_eq!(parse_duration("PT"), None);
    }

    #[test]
    fn period_parsing_and_display() {
        assert_eq!(Period::parse_iso("P1Y2M3D"), Some(Period::new(1, 2, 3)));
        assert_eq!(Period::parse_iso("P2W"), Some(Period::new(0, 0, 14)));
        assert_eq!(Period::new(1, 0, -3).to_string(), "P1Y-3D");
        assert_eq!(Period::ZERO.to_string(), "P0D");
    }

    #[test]
    fn period_between_dates() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(Period::between(d(2020, 1, 31), d(2020, 3, 1)), Period::new(0, 1, 1));
        assert_eq!(Period::between(d(2021, 5, 1), d(2020, 5, 1)), Period::new(-1, 0, 0));
        assert_eq!(Period::between(d(2020, 1, 1), d(2021, 2, 3)), Period::new(1, 1, 2));
    }

    #[test]
    fn period_added_to_date_clamps() {
        let jan31 = NaiveDate::from_ymd_opt(2021, 1, 31).unwrap();
        assert_eq!(
            Period::new(0, 1, 0).add_to_date(jan31),
            NaiveDate::from_ymd_opt(2021, 2, 28)
        );
    }

    #[test]
    fn value_strings() {
        assert_eq!(Value::Missing.to_string(), "MISSING");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        assert_eq!(
            Value::LocalTime(NaiveTime::from_hms_opt(12, 30, 0).unwrap()).to_string(),
            "12:30"
        );
    }
}
