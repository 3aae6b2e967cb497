//! Value-type lattice
//!
//! Every value an expression can produce has one of a closed set of base
//! kinds. Each kind except MISSING has a required and an optional ("may be
//! MISSING") form; MISSING itself is always optional.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BaseType {
    Missing,
    Boolean,
    Integer,
    Float,
    String,
    LocalDate,
    LocalTime,
    LocalDateTime,
    ZonedDateTime,
    DateDuration,
    TimeDuration,
}

impl BaseType {
    pub const ALL: [BaseType; 11] = [
        BaseType::Missing,
        BaseType::Boolean,
        BaseType::Integer,
        BaseType::Float,
        BaseType::String,
        BaseType::LocalDate,
        BaseType::LocalTime,
        BaseType::LocalDateTime,
        BaseType::ZonedDateTime,
        BaseType::DateDuration,
        BaseType::TimeDuration,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BaseType::Missing => "MISSING",
            BaseType::Boolean => "BOOLEAN",
            BaseType::Integer => "INTEGER",
            BaseType::Float => "FLOAT",
            BaseType::String => "STRING",
            BaseType::LocalDate => "LOCAL_DATE",
            BaseType::LocalTime => "LOCAL_TIME",
            BaseType::LocalDateTime => "LOCAL_DATE_TIME",
            BaseType::ZonedDateTime => "ZONED_DATE_TIME",
            BaseType::DateDuration => "DATE_DURATION",
            BaseType::TimeDuration => "TIME_DURATION",
        }
    }
}

/// A base kind plus the "may be MISSING" bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueType {
    base: BaseType,
    optional: bool,
}

impl ValueType {
    pub const MISSING: ValueType = ValueType::of(BaseType::Missing, true);
    pub const BOOLEAN: ValueType = ValueType::of(BaseType::Boolean, false);
    pub const OPT_BOOLEAN: ValueType = ValueType::of(BaseType::Boolean, true);
    pub const INTEGER: ValueType = ValueType::of(BaseType::Integer, false);
    pub const OPT_INTEGER: ValueType = ValueType::of(BaseType::Integer, true);
    pub const FLOAT: ValueType = ValueType::of(BaseType::Float, false);
    pub const OPT_FLOAT: ValueType = ValueType::of(BaseType::Float, true);
    pub const STRING: ValueType = ValueType::of(BaseType::String, false);
    pub const OPT_STRING: ValueType = ValueType::of(BaseType::String, true);
    pub const LOCAL_DATE: ValueType = ValueType::of(BaseType::LocalDate, false);
    pub const OPT_LOCAL_DATE: ValueType = ValueType::of(BaseType::LocalDate, true);
    pub const LOCAL_TIME: ValueType = ValueType::of(BaseType::LocalTime, false);
    pub const OPT_LOCAL_TIME: ValueType = ValueType::of(BaseType::LocalTime, true);
    pub const LOCAL_DATE_TIME: ValueType = ValueType::of(BaseType::LocalDateTime, false);
    pub const OPT_LOCAL_DATE_TIME: ValueType = ValueType::of(BaseType::LocalDateTime, true);
    pub const ZONED_DATE_TIME: ValueType = ValueType::of(BaseType::ZonedDateTime, false);
    pub const OPT_ZONED_DATE_TIME: ValueType = ValueType::of(BaseType::ZonedDateTime, true);
    pub const DATE_DURATION: ValueType = ValueType::of(BaseType::DateDuration, false);
    pub const OPT_DATE_DURATION: ValueType = ValueType::of(BaseType::DateDuration, true);
    pub const TIME_DURATION: ValueType = ValueType::of(BaseType::TimeDuration, false);
    pub const OPT_TIME_DURATION: ValueType = ValueType::of(BaseType::TimeDuration, true);

    /// MISSING is forced optional regardless of `optional`.
    pub const fn of(base: BaseType, optional: bool) -> Self {
        let optional = optional || matches!(base, BaseType::Missing);
        Self { base, optional }
    }

    pub fn base(self) -> BaseType {
        self.base
    }

    /// The required form of this type. MISSING stays MISSING.
    pub fn base_type(self) -> ValueType {
        ValueType::of(self.base, false)
    }

    pub fn is_optional(self) -> bool {
        self.optional
    }

    pub fn with_optional(self, optional: bool) -> ValueType {
        ValueType::of(self.base, optional)
    }

    pub fn optional_type(self) -> ValueType {
        self.with_optional(true)
    }

    pub fn is_missing(self) -> bool {
        self.base == BaseType::Missing
    }

    pub fn is_numeric(self) -> bool {
        matches!(self.base, BaseType::Integer | BaseType::Float)
    }

    pub fn is_duration(self) -> bool {
        matches!(self.base, BaseType::DateDuration | BaseType::TimeDuration)
    }

    /// Kinds with a date component.
    pub fn has_date_part(self) -> bool {
        matches!(
            self.base,
            BaseType::LocalDate | BaseType::LocalDateTime | BaseType::ZonedDateTime
        )
    }

    /// Kinds with a time-of-day component.
    pub fn has_time_part(self) -> bool {
        matches!(
            self.base,
            BaseType::LocalTime | BaseType::LocalDateTime | BaseType::ZonedDateTime
        )
    }

    /// Numeric and date/time kinds. DATE_DURATION has no total order.
    pub fn is_orderable(self) -> bool {
        self.is_numeric()
            || matches!(
                self.base,
                BaseType::LocalDate
                    | BaseType::LocalTime
                    | BaseType::LocalDateTime
                    | BaseType::ZonedDateTime
                    | BaseType::TimeDuration
            )
    }

    /// Whether `<`, `<=`, `>`, `>=` may compare values of `self` and `other`.
    pub fn is_mutually_orderable(self, other: ValueType) -> bool {
        (self.is_numeric() && other.is_numeric())
            || (self.base == other.base && self.is_orderable() && !self.is_missing())
    }

    /// Whether `==` / `!=` may compare values of `self` and `other`.
    pub fn is_equatable(self, other: ValueType) -> bool {
        self.base == other.base
            || self.is_missing()
            || other.is_missing()
            || (self.is_numeric() && other.is_numeric())
    }

    /// Least common supertype, or `None` if the kinds are incompatible.
    ///
    /// MISSING joins with anything to that thing's optional form; INTEGER
    /// widens to FLOAT; optionality is the OR of both sides.
    pub fn join(self, other: ValueType) -> Option<ValueType> {
        let optional = self.optional || other.optional;
        if self.is_missing() {
            return Some(other.optional_type());
        }
        if other.is_missing() {
            return Some(self.optional_type());
        }
        if self.base == other.base {
            return Some(ValueType::of(self.base, optional));
        }
        if self.is_numeric() && other.is_numeric() {
            return Some(ValueType::of(BaseType::Float, optional));
        }
        None
    }

    /// Join over many types; `None` if the slice is empty or any pair fails.
    pub fn join_all(types: &[ValueType]) -> Option<ValueType> {
        let (first, rest) = types.split_first()?;
        rest.iter().try_fold(*first, |acc, t| acc.join(*t))
    }

    /// `true` if a value of type `self` can be used where `other` is expected.
    pub fn is_subtype_of(self, other: ValueType) -> bool {
        self.join(other) == Some(other)
    }

    pub fn name(self) -> String {
        if self.optional && !self.is_missing() {
            format!("{} | MISSING", self.base.name())
        } else {
            self.base.name().to_string()
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl Serialize for ValueType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_is_always_optional() {
        assert!(ValueType::MISSING.is_optional());
        assert!(ValueType::of(BaseType::Missing, false).is_optional());
        assert_eq!(ValueType::MISSING.base_type(), ValueType::MISSING);
    }

    #[test]
    fn numeric_join_widens_to_float() {
        assert_eq!(
            ValueType::INTEGER.join(ValueType::FLOAT),
            Some(ValueType::FLOAT)
        );
        assert_eq!(
            ValueType::OPT_INTEGER.join(ValueType::FLOAT),
            Some(ValueType::OPT_FLOAT)
        );
        assert_eq!(
            ValueType::INTEGER.join(ValueType::INTEGER),
            Some(ValueType::INTEGER)
        );
    }

    #[test]
    fn missing_join_makes_optional() {
        assert_eq!(
            ValueType::BOOLEAN.join(ValueType::MISSING),
            Some(ValueType::OPT_BOOLEAN)
        );
        assert_eq!(
            ValueType::MISSING.join(ValueType::MISSING),
            Some(ValueType::MISSING)
        );
    }

    #[test]
    fn incompatible_join_fails() {
        assert_eq!(ValueType::BOOLEAN.join(ValueType::STRING), None);
        assert_eq!(ValueType::LOCAL_DATE.join(ValueType::LOCAL_TIME), None);
    }

    #[test]
    fn orderable_excludes_date_duration() {
        assert!(ValueType::TIME_DURATION.is_orderable());
        assert!(!ValueType::DATE_DURATION.is_orderable());
        assert!(!ValueType::STRING.is_orderable());
        assert!(ValueType::OPT_INTEGER.is_mutually_orderable(ValueType::FLOAT));
        assert!(!ValueType::LOCAL_DATE.is_mutually_orderable(ValueType::LOCAL_TIME));
    }

    #[test]
    fn names() {
        assert_eq!(ValueType::OPT_FLOAT.name(), "FLOAT | MISSING");
        assert_eq!(ValueType::MISSING.name(), "MISSING");
        assert_eq!(ValueType::LOCAL_DATE_TIME.to_string(), "LOCAL_DATE_TIME");
    }
}
