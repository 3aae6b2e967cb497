//! Function and aggregation signatures
//!
//! A signature is an ordered list of parameters. Each parameter carries an
//! [`ArgMatcher`], a composable type predicate with a human-readable
//! description used in error messages.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;
use crate::value_type::{BaseType, ValueType};

// ============ Type predicates ============

#[derive(Clone)]
pub struct ArgMatcher {
    description: String,
    predicate: Arc<dyn Fn(ValueType) -> bool + Send + Sync>,
}

impl ArgMatcher {
    pub fn new(
        description: impl Into<String>,
        predicate: impl Fn(ValueType) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn matches(&self, ty: ValueType) -> bool {
        (self.predicate)(ty)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Accepts anything either matcher accepts.
    pub fn or(self, other: ArgMatcher) -> ArgMatcher {
        let description = format!("{} or {}", self.description, other.description);
        ArgMatcher::new(description, move |t| self.matches(t) || other.matches(t))
    }

    /// Also accepts the optional form of matching types, and MISSING itself.
    pub fn or_missing(self) -> ArgMatcher {
        let description = format!("{} (or MISSING)", self.description);
        ArgMatcher::new(description, move |t| {
            t.is_missing() || self.matches(t.base_type())
        })
    }
}

impl fmt::Debug for ArgMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArgMatcher({})", self.description)
    }
}

/// Exactly the required form of `base`.
pub fn is_base(base: BaseType) -> ArgMatcher {
    ArgMatcher::new(base.name(), move |t| t == ValueType::of(base, false))
}

pub fn is_boolean() -> ArgMatcher {
    is_base(BaseType::Boolean)
}

pub fn is_boolean_or_opt() -> ArgMatcher {
    is_boolean().or_missing()
}

pub fn is_integer() -> ArgMatcher {
    is_base(BaseType::Integer)
}

pub fn is_integer_or_opt() -> ArgMatcher {
    is_integer().or_missing()
}

pub fn is_float() -> ArgMatcher {
    is_base(BaseType::Float)
}

pub fn is_numeric() -> ArgMatcher {
    ArgMatcher::new("INTEGER or FLOAT", |t| t.is_numeric() && !t.is_optional())
}

pub fn is_numeric_or_opt() -> ArgMatcher {
    is_numeric().or_missing()
}

pub fn is_string() -> ArgMatcher {
    is_base(BaseType::String)
}

pub fn is_string_or_opt() -> ArgMatcher {
    is_string().or_missing()
}

pub fn is_date_duration_or_opt() -> ArgMatcher {
    is_base(BaseType::DateDuration).or_missing()
}

pub fn is_time_duration_or_opt() -> ArgMatcher {
    is_base(BaseType::TimeDuration).or_missing()
}

/// Any kind with a date component (LOCAL_DATE, LOCAL_DATE_TIME, ZONED_DATE_TIME).
pub fn has_date_part_or_opt() -> ArgMatcher {
    ArgMatcher::new("a date or date-time", |t| t.has_date_part()).or_missing()
}

/// Any kind with a time component (LOCAL_TIME, LOCAL_DATE_TIME, ZONED_DATE_TIME).
pub fn has_time_part_or_opt() -> ArgMatcher {
    ArgMatcher::new("a time or date-time", |t| t.has_time_part()).or_missing()
}

pub fn is_anything() -> ArgMatcher {
    ArgMatcher::new("any type", |_| true)
}

// ============ Parameters ============

#[derive(Debug, Clone)]
pub enum ParamKind {
    Required,
    /// May be omitted; an omitted parameter binds `default` if one is given.
    Optional { default: Option<Value> },
    /// Absorbs all remaining positional arguments.
    Vararg,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: &'static str,
    pub matcher: ArgMatcher,
    pub kind: ParamKind,
}

pub fn arg(name: &'static str, matcher: ArgMatcher) -> Param {
    Param {
        name,
        matcher,
        kind: ParamKind::Required,
    }
}

pub fn optarg(name: &'static str, matcher: ArgMatcher) -> Param {
    Param {
        name,
        matcher,
        kind: ParamKind::Optional { default: None },
    }
}

pub fn defarg(name: &'static str, matcher: ArgMatcher, default: Value) -> Param {
    Param {
        name,
        matcher,
        kind: ParamKind::Optional {
            default: Some(default),
        },
    }
}

pub fn vararg(name: &'static str, matcher: ArgMatcher) -> Param {
    Param {
        name,
        matcher,
        kind: ParamKind::Vararg,
    }
}

/// Renders a parameter list such as `(x, precision=)` or `(sep, strings...)`.
pub fn describe(params: &[Param]) -> String {
    let parts: Vec<String> = params
        .iter()
        .map(|p| match p.kind {
            ParamKind::Required => format!("{}: {}", p.name, p.matcher.description()),
            ParamKind::Optional { .. } => format!("{}?: {}", p.name, p.matcher.description()),
            ParamKind::Vararg => format!("{}...: {}", p.name, p.matcher.description()),
        })
        .collect();
    format!("({})", parts.join(", "))
}

// ============ Bound arguments ============

/// Arguments bound to parameter names, in parameter order.
///
/// Non-vararg parameters hold zero or one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments<T> {
    slots: Vec<(&'static str, Vec<T>)>,
}

impl<T> Default for Arguments<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> Arguments<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: T) -> Self {
        self.push(name, value);
        self
    }

    fn push(&mut self, name: &'static str, value: T) {
        match self.slots.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.slots.push((name, vec![value])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.all(name).first()
    }

    pub fn has(&self, name: &str) -> bool {
        !self.all(name).is_empty()
    }

    /// Every value bound to `name`; used for varargs.
    pub fn all(&self, name: &str) -> &[T] {
        self.slots
            .iter()
            .find(|(n, _)| *n == name)
            .map_or(&[], |(_, values)| values.as_slice())
    }

    /// All bound values in parameter order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flat_map(|(_, values)| values.iter())
    }

    pub fn len(&self) -> usize {
        self.values().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Arguments<U> {
        Arguments {
            slots: self
                .slots
                .iter()
                .map(|(name, values)| (*name, values.iter().map(&mut f).collect()))
                .collect(),
        }
    }

    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> Result<U, E>) -> Result<Arguments<U>, E> {
        let mut slots = Vec::with_capacity(self.slots.len());
        for (name, values) in &self.slots {
            let mapped = values.iter().map(&mut f).collect::<Result<Vec<_>, E>>()?;
            slots.push((*name, mapped));
        }
        Ok(Arguments { slots })
    }
}

/// What a parameter was bound to: an argument of the call, or a default.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgRef {
    /// Index into the call's argument list (source order).
    Arg(usize),
    Default(Value),
}

/// Binds a call's arguments to `params` and checks their types.
///
/// `args` holds each argument's name (if given by name) and type, in source
/// order. Positional arguments fill parameters left to right, then named
/// arguments bind by name. Extra, unknown or doubly bound arguments fail.
pub fn match_signature(
    params: &[Param],
    args: &[(Option<&str>, ValueType)],
) -> Result<Arguments<ArgRef>, String> {
    let mut bound: Vec<Vec<usize>> = vec![Vec::new(); params.len()];

    let mut next_param = 0;
    for (idx, _) in args.iter().enumerate().filter(|(_, (name, _))| name.is_none()) {
        let Some(param) = params.get(next_param) else {
            return Err(format!(
                "Too many arguments. Expected at most {}.",
                params.len()
            ));
        };
        bound[next_param].push(idx);
        if !matches!(param.kind, ParamKind::Vararg) {
            next_param += 1;
        }
    }

    for (idx, (name, _)) in args.iter().enumerate() {
        let Some(name) = name else { continue };
        let Some(pos) = params.iter().position(|p| p.name == *name) else {
            return Err(format!("Unknown argument '{name}'."));
        };
        if matches!(params[pos].kind, ParamKind::Vararg) {
            return Err(format!("Argument '{name}' cannot be given by name."));
        }
        if !bound[pos].is_empty() {
            return Err(format!("Argument '{name}' was given more than once."));
        }
        bound[pos].push(idx);
    }

    let mut arguments = Arguments::new();
    for (param, indices) in params.iter().zip(&bound) {
        if indices.is_empty() {
            match &param.kind {
                ParamKind::Required => {
                    return Err(format!("Missing required argument '{}'.", param.name));
                }
                ParamKind::Optional {
                    default: Some(default),
                } => arguments.push(param.name, ArgRef::Default(default.clone())),
                ParamKind::Optional { default: None } | ParamKind::Vararg => {}
            }
            continue;
        }
        for &idx in indices {
            let ty = args[idx].1;
            if !param.matcher.matches(ty) {
                return Err(format!(
                    "Argument '{}' must be {}, but got {}.",
                    param.name,
                    param.matcher.description(),
                    ty
                ));
            }
            arguments.push(param.name, ArgRef::Arg(idx));
        }
    }
    Ok(arguments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Vec<Param> {
        vec![
            arg("x", is_numeric_or_opt()),
            defarg("precision", is_integer(), Value::Integer(0)),
        ]
    }

    #[test]
    fn binds_positional_then_named() {
        let args = match_signature(&params(), &[(None, ValueType::FLOAT)]).unwrap();
        assert_eq!(args.get("x"), Some(&ArgRef::Arg(0)));
        assert_eq!(args.get("precision"), Some(&ArgRef::Default(Value::Integer(0))));

        let args = match_signature(
            &params(),
            &[(Some("precision"), ValueType::INTEGER), (None, ValueType::OPT_INTEGER)],
        )
        .unwrap();
        assert_eq!(args.get("x"), Some(&ArgRef::Arg(1)));
        assert_eq!(args.get("precision"), Some(&ArgRef::Arg(0)));
    }

    #[test]
    fn rejects_bad_calls() {
        let p = params();
        assert!(match_signature(&p, &[]).unwrap_err().contains("'x'"));
        assert!(
            match_signature(&p, &[(None, ValueType::STRING)])
                .unwrap_err()
                .contains("STRING")
        );
        assert!(match_signature(
            &p,
            &[(None, ValueType::FLOAT), (None, ValueType::INTEGER), (None, ValueType::INTEGER)]
        )
        .is_err());
        assert!(match_signature(
            &p,
            &[(None, ValueType::FLOAT), (Some("x"), ValueType::INTEGER)]
        )
        .is_err());
        assert!(match_signature(
            &p,
            &[(None, ValueType::FLOAT), (Some("digits"), ValueType::INTEGER)]
        )
        .is_err());
    }

    #[test]
    fn varargs_collect_the_rest() {
        let p = vec![arg("sep", is_string()), vararg("strings", is_string_or_opt())];
        let args = match_signature(
            &p,
            &[
                (None, ValueType::STRING),
                (None, ValueType::OPT_STRING),
                (None, ValueType::MISSING),
            ],
        )
        .unwrap();
        assert_eq!(args.all("strings").len(), 2);
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn matchers_compose() {
        let m = is_integer().or(is_string()).or_missing();
        assert!(m.matches(ValueType::OPT_STRING));
        assert!(m.matches(ValueType::MISSING));
        assert!(!m.matches(ValueType::FLOAT));
        assert_eq!(m.description(), "INTEGER or STRING (or MISSING)");
        assert!(!is_numeric().matches(ValueType::OPT_FLOAT));
    }
}
