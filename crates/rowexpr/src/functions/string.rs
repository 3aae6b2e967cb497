//! String functions
//!
//! Search-style functions take an optional `modifiers` string:
//! `i` ignores case, `w` matches whole words only, `b` searches backwards
//! (`find`). Regular expressions use the `regex` crate syntax.

use std::sync::Mutex;

use regex::{Regex, RegexBuilder};

use crate::computer::{Computer, Typed};
use crate::eval::{self, EvalError, EvaluationContext};
use crate::signature::{
    Arguments, Param, arg, is_anything, is_integer_or_opt, is_string_or_opt, optarg, vararg,
};
use crate::value_type::{BaseType, ValueType};

use super::{Category, Function, optional_value, partial, propagating, required, returns_exactly};

pub fn functions() -> Vec<Function> {
    let mut functions = case_and_layout();
    functions.extend(conversion());
    functions.extend(matching());
    functions.extend(slicing());
    functions.extend(editing());
    functions
}

// ============ Shared plumbing ============

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
struct Modifiers {
    ignore_case: bool,
    whole_words: bool,
    backwards: bool,
}

impl Modifiers {
    fn parse(text: &str) -> Self {
        Self {
            ignore_case: text.contains('i'),
            whole_words: text.contains('w'),
            backwards: text.contains('b'),
        }
    }

    fn is_plain(self) -> bool {
        !self.ignore_case && !self.whole_words
    }
}

fn modifiers_param() -> Param {
    optarg("modifiers", is_string_or_opt())
}

fn modifiers_of(args: &Arguments<Computer>) -> eval::Result<Option<Typed<String>>> {
    args.get("modifiers").map(Computer::string).transpose()
}

fn read_modifiers(
    modifiers: Option<&Typed<String>>,
    ctx: &dyn EvaluationContext,
) -> eval::Result<Modifiers> {
    Ok(optional_value(modifiers, ctx)?
        .map(|m| Modifiers::parse(&m))
        .unwrap_or_default())
}

/// `base`, optional if any of the named arguments is.
fn returns_if(
    base: BaseType,
    names: &'static [&'static str],
) -> impl Fn(&Arguments<ValueType>) -> Result<ValueType, String> + Send + Sync + 'static {
    move |args| {
        let optional = names
            .iter()
            .flat_map(|n| args.all(n))
            .any(|t| t.is_optional());
        Ok(ValueType::of(base, optional))
    }
}

fn string_inputs(
    args: &Arguments<Computer>,
    names: &[&str],
) -> eval::Result<(Vec<Computer>, Vec<Typed<String>>)> {
    let mut inputs = Vec::with_capacity(names.len());
    let mut strings = Vec::with_capacity(names.len());
    for name in names {
        let c = required(args, name)?;
        strings.push(c.string()?);
        inputs.push(c.clone());
    }
    Ok((inputs, strings))
}

/// Remembers the last compiled pattern; most calls see the same pattern on every row.
#[derive(Default)]
struct RegexCache {
    last: Mutex<Option<(String, Modifiers, Regex)>>,
}

impl RegexCache {
    fn get(&self, pattern: &str, modifiers: Modifiers) -> Result<Regex, regex::Error> {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((p, m, regex)) = last.as_ref() {
            if p == pattern && *m == modifiers {
                return Ok(regex.clone());
            }
        }
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(modifiers.ignore_case)
            .build()?;
        *last = Some((pattern.to_string(), modifiers, regex.clone()));
        Ok(regex)
    }

    /// A regex matching `literal`, honouring the case and whole-word modifiers.
    fn literal(&self, literal: &str, modifiers: Modifiers) -> eval::Result<Regex> {
        let escaped = regex::escape(literal);
        let pattern = if modifiers.whole_words {
            format!(r"\b{escaped}\b")
        } else {
            escaped
        };
        self.get(&pattern, modifiers)
            .map_err(|e| EvalError::Evaluation(e.to_string()))
    }

    /// Like [`RegexCache::get`], but an invalid pattern is a warning naming
    /// `shown` and gives `None`.
    fn user_pattern(
        &self,
        pattern: &str,
        shown: &str,
        modifiers: Modifiers,
        ctx: &dyn EvaluationContext,
    ) -> Option<Regex> {
        match self.get(pattern, modifiers) {
            Ok(regex) => Some(regex),
            Err(e) => {
                let reason = match e {
                    regex::Error::Syntax(s) => {
                        s.lines().last().unwrap_or_default().trim().to_string()
                    }
                    other => other.to_string(),
                };
                ctx.add_warning(format!("Invalid regex pattern '{shown}'. {reason}"));
                None
            }
        }
    }
}

/// Clamps a user-supplied count to a char count.
fn clamp_count(n: i64) -> usize {
    usize::try_from(n.max(0)).unwrap_or(usize::MAX)
}

// ============ Case and layout ============

fn unary(
    name: &'static str,
    description: &'static str,
    keywords: &[&'static str],
    op: fn(&str) -> String,
) -> Function {
    Function::new(name, Category::String, description)
        .keywords(keywords)
        .overload(
            vec![arg("string", is_string_or_opt())],
            returns_if(BaseType::String, &["string"]),
            move |args, _| {
                let s = required(args, "string")?.string()?;
                Ok(Computer::String(s.map(move |s| op(&s))))
            },
        )
}

fn capitalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut word_start = true;
    for c in s.chars() {
        if c.is_whitespace() {
            word_start = true;
            out.push(c);
        } else if word_start {
            word_start = false;
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
    }
    out
}

fn remove_duplicate_spaces(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_space = false;
    for c in s.chars() {
        if c == ' ' && previous_space {
            continue;
        }
        previous_space = c == ' ';
        out.push(c);
    }
    out
}

#[derive(Clone, Copy)]
enum Side {
    Start,
    End,
}

fn pad_function(name: &'static str, side: Side, description: &'static str) -> Function {
    Function::new(name, Category::String, description)
        .keywords(&["fill", "align"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("length", is_integer_or_opt()),
                optarg("character", is_string_or_opt()),
            ],
            returns_if(BaseType::String, &["string", "length"]),
            move |args, _| {
                let (mut inputs, strings) = string_inputs(args, &["string"])?;
                let length = required(args, "length")?;
                inputs.push(length.clone());
                let length = length.integer()?;
                let fill = args.get("character").map(Computer::string).transpose()?;
                let s = strings[0].clone();
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let target = length.compute(ctx)?;
                    let target = i32::try_from(target).map_err(|_| {
                        EvalError::Evaluation(format!(
                            "The target length {target} is too large for {name}."
                        ))
                    })?;
                    let fill = optional_value(fill.as_ref(), ctx)?
                        .and_then(|f| f.chars().next())
                        .unwrap_or(' ');
                    let s = s.compute(ctx)?;
                    let missing = clamp_count(i64::from(target)).saturating_sub(s.chars().count());
                    let padding: String = std::iter::repeat_n(fill, missing).collect();
                    Ok(match side {
                        Side::Start => padding + &s,
                        Side::End => s + &padding,
                    })
                })))
            },
        )
}

fn case_and_layout() -> Vec<Function> {
    vec![
        unary(
            "lower_case",
            "`string` with all characters in lower case.",
            &["lowercase", "small"],
            str::to_lowercase,
        ),
        unary(
            "upper_case",
            "`string` with all characters in upper case.",
            &["uppercase", "capital"],
            str::to_uppercase,
        ),
        unary(
            "capitalize",
            "`string` with the first letter of every word in upper case and the \
             rest in lower case.",
            &["title case"],
            capitalize,
        ),
        pad_function(
            "pad_start",
            Side::Start,
            "Pads `string` at the start with `character` (default space) up to `length` \
             characters.",
        ),
        pad_function(
            "pad_end",
            Side::End,
            "Pads `string` at the end with `character` (default space) up to `length` characters.",
        ),
        Function::new(
            "join",
            Category::String,
            "Concatenates `strings`, putting `separator` between each pair.",
        )
        .keywords(&["concatenate", "combine"])
        .overload(
            vec![
                arg("separator", is_string_or_opt()),
                arg("string", is_string_or_opt()),
                vararg("more", is_string_or_opt()),
            ],
            returns_if(BaseType::String, &["separator", "string", "more"]),
            |args, _| {
                let inputs: Vec<Computer> = args.values().cloned().collect();
                let strings = inputs
                    .iter()
                    .map(Computer::string)
                    .collect::<eval::Result<Vec<_>>>()?;
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let mut values = strings.iter().map(|s| s.compute(ctx));
                    let separator = values.next().transpose()?.unwrap_or_default();
                    let parts = values.collect::<eval::Result<Vec<_>>>()?;
                    Ok(parts.join(&separator))
                })))
            },
        ),
        unary(
            "reverse",
            "`string` with its characters in reverse order.",
            &["backwards"],
            |s| s.chars().rev().collect(),
        ),
        unary(
            "remove_duplicate_spaces",
            "`string` with every run of spaces collapsed to a single space.",
            &["whitespace", "collapse"],
            remove_duplicate_spaces,
        ),
        unary(
            "strip",
            "`string` without leading and trailing whitespace.",
            &["trim"],
            |s| s.trim().to_string(),
        ),
        unary(
            "strip_start",
            "`string` without leading whitespace.",
            &["trim", "left"],
            |s| s.trim_start().to_string(),
        ),
        unary(
            "strip_end",
            "`string` without trailing whitespace.",
            &["trim", "right"],
            |s| s.trim_end().to_string(),
        ),
    ]
}

// ============ Conversion ============

fn parse_function<T: Send + Sync + 'static>(
    name: &'static str,
    description: &'static str,
    base: BaseType,
    parse: fn(&str) -> Option<T>,
    wrap: fn(Typed<T>) -> Computer,
) -> Function {
    Function::new(name, Category::String, description)
        .keywords(&["convert", "cast"])
        .overload(
            vec![arg("string", is_string_or_opt())],
            returns_exactly(ValueType::of(base, true)),
            move |args, _| {
                let input = required(args, "string")?.clone();
                let s = input.string()?;
                Ok(wrap(partial(vec![input], move |ctx| Ok(parse(&s.compute(ctx)?)))))
            },
        )
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn parse_int(s: &str) -> Option<i64> {
    s.trim().replace('_', "").parse().ok()
}

fn parse_float(s: &str) -> Option<f64> {
    s.trim().replace('_', "").parse().ok()
}

fn conversion() -> Vec<Function> {
    vec![
        Function::new(
            "empty_to_missing",
            Category::String,
            "MISSING if `string` is empty, otherwise `string`.",
        )
        .keywords(&["null", "blank"])
        .overload(
            vec![arg("string", is_string_or_opt())],
            returns_exactly(ValueType::OPT_STRING),
            |args, _| {
                let input = required(args, "string")?.clone();
                let s = input.string()?;
                Ok(Computer::String(partial(vec![input], move |ctx| {
                    let s = s.compute(ctx)?;
                    Ok((!s.is_empty()).then_some(s))
                })))
            },
        ),
        Function::new(
            "missing_to_empty",
            Category::String,
            "The empty string if `string` is MISSING, otherwise `string`. Never MISSING.",
        )
        .keywords(&["null", "blank", "default"])
        .overload(
            vec![arg("string", is_string_or_opt())],
            returns_exactly(ValueType::STRING),
            |args, _| {
                let s = required(args, "string")?.string()?;
                Ok(Computer::String(Typed::present(move |ctx| {
                    Ok(optional_value(Some(&s), ctx)?.unwrap_or_default())
                })))
            },
        ),
        Function::new(
            "to_string",
            Category::String,
            "The text form of any value. A MISSING value gives \"MISSING\".",
        )
        .keywords(&["convert", "text"])
        .overload(
            vec![arg("value", is_anything())],
            returns_exactly(ValueType::STRING),
            |args, _| Ok(Computer::String(required(args, "value")?.to_string_computer())),
        ),
        parse_function(
            "parse_bool",
            "TRUE or FALSE from `string`, ignoring case. MISSING if it is neither.",
            BaseType::Boolean,
            parse_bool,
            Computer::Boolean,
        ),
        parse_function(
            "parse_float",
            "The FLOAT written in `string`, which may use `_` separators. \
             MISSING if it is not a number.",
            BaseType::Float,
            parse_float,
            Computer::Float,
        ),
        parse_function(
            "parse_int",
            "The INTEGER written in `string`, which may use `_` separators. \
             MISSING if it is not an integer.",
            BaseType::Integer,
            parse_int,
            Computer::Integer,
        ),
    ]
}

// ============ Matching ============

/// `name(string, search, modifiers?)` returning BOOLEAN.
fn search_predicate(
    name: &'static str,
    description: &'static str,
    plain: fn(&str, &str) -> bool,
    with_regex: fn(&Regex, &str) -> bool,
) -> Function {
    Function::new(name, Category::String, description)
        .keywords(&["search", "match"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("search", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::Boolean, &["string", "search"]),
            move |args, _| {
                let (inputs, strings) = string_inputs(args, &["string", "search"])?;
                let modifiers = modifiers_of(args)?;
                let cache = RegexCache::default();
                Ok(Computer::Boolean(propagating(inputs, move |ctx| {
                    let (s, search) = (strings[0].compute(ctx)?, strings[1].compute(ctx)?);
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    if modifiers.is_plain() {
                        return Ok(plain(&s, &search));
                    }
                    Ok(with_regex(&cache.literal(&search, modifiers)?, &s))
                })))
            },
        )
}

fn anchored_start(regex: &Regex, s: &str) -> bool {
    regex.find(s).is_some_and(|m| m.start() == 0)
}

fn anchored_end(regex: &Regex, s: &str) -> bool {
    regex.find_iter(s).any(|m| m.end() == s.len())
}

/// Translates a LIKE pattern: `%` any run, `_` any character, `[c]` a literal `c`.
fn like_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::from("^(?s:");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' if i + 2 < chars.len() && chars[i + 2] == ']' => {
                out.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 3;
                continue;
            }
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push_str(")$");
    out
}

/// `name(string, pattern, ..., modifiers?)` on a user regex; invalid patterns give MISSING.
fn regex_function(
    name: &'static str,
    description: &'static str,
    extra: Vec<Param>,
    base: BaseType,
    implementation: fn(RegexCall) -> eval::Result<Computer>,
) -> Function {
    let mut params = vec![
        arg("string", is_string_or_opt()),
        arg("pattern", is_string_or_opt()),
    ];
    params.extend(extra);
    params.push(modifiers_param());
    Function::new(name, Category::String, description)
        .keywords(&["regex", "regular expression", "pattern"])
        .overload(params, returns_exactly(ValueType::of(base, true)), move |args, _| {
            let (inputs, strings) = string_inputs(args, &["string", "pattern"])?;
            implementation(RegexCall {
                args,
                inputs,
                string: strings[0].clone(),
                pattern: strings[1].clone(),
                modifiers: modifiers_of(args)?,
            })
        })
}

struct RegexCall<'a> {
    args: &'a Arguments<Computer>,
    inputs: Vec<Computer>,
    string: Typed<String>,
    pattern: Typed<String>,
    modifiers: Option<Typed<String>>,
}

impl RegexCall<'_> {
    /// Builds a computer that compiles the row's pattern and hands it to `apply`.
    fn build<T: 'static>(
        self,
        translate: fn(&str) -> String,
        apply: impl Fn(&Regex, &str, &dyn EvaluationContext) -> eval::Result<Option<T>>
        + Send
        + Sync
        + 'static,
    ) -> Typed<T> {
        let Self {
            inputs,
            string,
            pattern,
            modifiers,
            ..
        } = self;
        let cache = RegexCache::default();
        partial(inputs, move |ctx| {
            let raw = pattern.compute(ctx)?;
            let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
            let Some(regex) = cache.user_pattern(&translate(&raw), &raw, modifiers, ctx) else {
                return Ok(None);
            };
            apply(&regex, &string.compute(ctx)?, ctx)
        })
    }
}

fn whole_input(pattern: &str) -> String {
    format!("^(?:{pattern})$")
}

fn matching() -> Vec<Function> {
    vec![
        search_predicate(
            "contains",
            "TRUE if `string` contains `search`.",
            |s, search| s.contains(search),
            |r, s| r.is_match(s),
        ),
        search_predicate(
            "starts_with",
            "TRUE if `string` starts with `search`.",
            |s, search| s.starts_with(search),
            anchored_start,
        ),
        search_predicate(
            "ends_with",
            "TRUE if `string` ends with `search`.",
            |s, search| s.ends_with(search),
            anchored_end,
        ),
        Function::new(
            "compare",
            Category::String,
            "-1, 0 or 1 as `string_1` sorts before, equal to or after `string_2`.",
        )
        .keywords(&["order", "sort"])
        .overload(
            vec![arg("string_1", is_string_or_opt()), arg("string_2", is_string_or_opt())],
            returns_if(BaseType::Integer, &["string_1", "string_2"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string_1", "string_2"])?;
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    let (a, b) = (strings[0].compute(ctx)?, strings[1].compute(ctx)?);
                    Ok(a.cmp(&b) as i64)
                })))
            },
        ),
        regex_function(
            "like",
            "TRUE if `string` matches the LIKE `pattern`: `%` matches any run of \
             characters, `_` one character and `[c]` the literal `c`.",
            Vec::new(),
            BaseType::Boolean,
            |call| {
                Ok(Computer::Boolean(
                    call.build(like_to_regex, |r, s, _| Ok(Some(r.is_match(s)))),
                ))
            },
        ),
        regex_function(
            "regex_match",
            "TRUE if the whole of `string` matches the regular expression `pattern`.",
            Vec::new(),
            BaseType::Boolean,
            |call| {
                Ok(Computer::Boolean(
                    call.build(whole_input, |r, s, _| Ok(Some(r.is_match(s)))),
                ))
            },
        ),
        regex_function(
            "regex_extract",
            "The text matched by capture `group` of the first match of `pattern` \
             in `string`; group 0 is the whole match. MISSING without a match.",
            vec![arg("group", is_integer_or_opt())],
            BaseType::String,
            |call| {
                let group_input = required(call.args, "group")?.clone();
                let group = group_input.integer()?;
                let mut call = call;
                call.inputs.push(group_input);
                Ok(Computer::String(call.build(str::to_string, move |r, s, ctx| {
                    let group = group.compute(ctx)?;
                    let Ok(group) = usize::try_from(group) else {
                        return Ok(None);
                    };
                    Ok(r.captures(s)
                        .and_then(|c| c.get(group))
                        .map(|m| m.as_str().to_string()))
                })))
            },
        ),
        regex_function(
            "regex_replace",
            "`string` with every match of `pattern` replaced by `replacement`, \
             which may refer to groups as `$1`.",
            vec![arg("replacement", is_string_or_opt())],
            BaseType::String,
            |call| {
                let input = required(call.args, "replacement")?.clone();
                let replacement = input.string()?;
                let mut call = call;
                call.inputs.push(input);
                Ok(Computer::String(call.build(str::to_string, move |r, s, ctx| {
                    let replacement = replacement.compute(ctx)?;
                    Ok(Some(r.replace_all(s, replacement.as_str()).into_owned()))
                })))
            },
        ),
    ]
}

// ============ Slicing ============

fn substring(
    s: &str,
    start: Option<i64>,
    length: Option<i64>,
    ctx: &dyn EvaluationContext,
) -> String {
    let mut start = start.unwrap_or(1);
    if start < 1 {
        ctx.add_warning(
            "The start index is set to 1 because the index must be 1 or higher.".to_string(),
        );
        start = 1;
    }
    let length = match length {
        Some(l) if l < 0 => {
            ctx.add_warning(
                "The length of a substring cannot be negative. The length will be set to 0."
                    .to_string(),
            );
            0
        }
        Some(l) => clamp_count(l),
        None => usize::MAX,
    };
    s.chars().skip(clamp_count(start - 1)).take(length).collect()
}

fn chars_function(
    name: &'static str,
    description: &'static str,
    take: fn(&str, usize) -> String,
) -> Function {
    Function::new(name, Category::String, description)
        .keywords(&["substring", "prefix", "suffix"])
        .overload(
            vec![arg("string", is_string_or_opt()), arg("n", is_integer_or_opt())],
            returns_if(BaseType::String, &["string", "n"]),
            move |args, _| {
                let (mut inputs, strings) = string_inputs(args, &["string"])?;
                let n = required(args, "n")?;
                inputs.push(n.clone());
                let n = n.integer()?;
                let s = strings[0].clone();
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    Ok(take(&s.compute(ctx)?, clamp_count(n.compute(ctx)?)))
                })))
            },
        )
}

fn slicing() -> Vec<Function> {
    vec![
        Function::new(
            "substring",
            Category::String,
            "The part of `string` starting at the 1-based `start` with at most \
             `length` characters. A MISSING `start` means 1 and a MISSING \
             `length` means the rest of the string.",
        )
        .keywords(&["slice", "part"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                optarg("start", is_integer_or_opt()),
                optarg("length", is_integer_or_opt()),
            ],
            returns_if(BaseType::String, &["string"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string"])?;
                let start = args.get("start").map(Computer::integer).transpose()?;
                let length = args.get("length").map(Computer::integer).transpose()?;
                let s = strings[0].clone();
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let start = optional_value(start.as_ref(), ctx)?;
                    let length = optional_value(length.as_ref(), ctx)?;
                    Ok(substring(&s.compute(ctx)?, start, length, ctx))
                })))
            },
        ),
        chars_function(
            "first_chars",
            "The first `n` characters of `string`.",
            |s, n| s.chars().take(n).collect(),
        ),
        chars_function("last_chars", "The last `n` characters of `string`.", |s, n| {
            let skip = s.chars().count().saturating_sub(n);
            s.chars().skip(skip).collect()
        }),
        Function::new(
            "find",
            Category::String,
            "The 1-based character position of the first occurrence of `search` in \
             `string`, or of the last one with the `b` modifier. 0 if not found.",
        )
        .keywords(&["index", "position", "search"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("search", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::Integer, &["string", "search"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string", "search"])?;
                let modifiers = modifiers_of(args)?;
                let cache = RegexCache::default();
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    let (s, search) = (strings[0].compute(ctx)?, strings[1].compute(ctx)?);
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    let regex = cache.literal(&search, modifiers)?;
                    let found = if modifiers.backwards {
                        regex.find_iter(&s).last()
                    } else {
                        regex.find(&s)
                    };
                    Ok(found.map_or(0, |m| s[..m.start()].chars().count() as i64 + 1))
                })))
            },
        ),
        Function::new(
            "count",
            Category::String,
            "The number of non-overlapping occurrences of `search` in `string`.",
        )
        .keywords(&["occurrences", "frequency"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("search", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::Integer, &["string", "search"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string", "search"])?;
                let modifiers = modifiers_of(args)?;
                let cache = RegexCache::default();
                Ok(Computer::Integer(propagating(inputs, move |ctx| {
                    let (s, search) = (strings[0].compute(ctx)?, strings[1].compute(ctx)?);
                    if search.is_empty() {
                        return Ok(0);
                    }
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    Ok(cache.literal(&search, modifiers)?.find_iter(&s).count() as i64)
                })))
            },
        ),
        Function::new("length", Category::String, "The number of characters in `string`.")
            .keywords(&["size", "characters"])
            .overload(
                vec![arg("string", is_string_or_opt())],
                returns_if(BaseType::Integer, &["string"]),
                |args, _| {
                    let s = required(args, "string")?.string()?;
                    Ok(Computer::Integer(s.map(|s| s.chars().count() as i64)))
                },
            ),
    ]
}

// ============ Editing ============

fn char_matches(a: char, b: char, ignore_case: bool) -> bool {
    a == b || (ignore_case && a.to_lowercase().eq(b.to_lowercase()))
}

/// Replaces each char of `chars` by the char at the same position of
/// `replacement`, or removes it when `replacement` is shorter.
fn replace_chars(s: &str, chars: &str, replacement: &str, ignore_case: bool) -> String {
    let from: Vec<char> = chars.chars().collect();
    let to: Vec<char> = replacement.chars().collect();
    s.chars()
        .filter_map(|c| match from.iter().position(|f| char_matches(c, *f, ignore_case)) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect()
}

fn editing() -> Vec<Function> {
    vec![
        Function::new(
            "replace",
            Category::String,
            "`string` with every occurrence of `search` replaced by `replacement`.",
        )
        .keywords(&["substitute", "exchange"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("search", is_string_or_opt()),
                arg("replacement", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::String, &["string", "search", "replacement"]),
            |args, _| {
                let (inputs, strings) =
                    string_inputs(args, &["string", "search", "replacement"])?;
                let modifiers = modifiers_of(args)?;
                let cache = RegexCache::default();
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let s = strings[0].compute(ctx)?;
                    let search = strings[1].compute(ctx)?;
                    let replacement = strings[2].compute(ctx)?;
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    if modifiers.is_plain() {
                        return Ok(s.replace(&search, &replacement));
                    }
                    let regex = cache.literal(&search, modifiers)?;
                    Ok(regex
                        .replace_all(&s, regex::NoExpand(&replacement))
                        .into_owned())
                })))
            },
        ),
        Function::new(
            "replace_chars",
            Category::String,
            "`string` with each character of `chars` replaced by the character at \
             the same position in `replacement`, or removed if `replacement` is shorter.",
        )
        .keywords(&["translate", "substitute"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("chars", is_string_or_opt()),
                arg("replacement", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::String, &["string", "chars", "replacement"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string", "chars", "replacement"])?;
                let modifiers = modifiers_of(args)?;
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    Ok(replace_chars(
                        &strings[0].compute(ctx)?,
                        &strings[1].compute(ctx)?,
                        &strings[2].compute(ctx)?,
                        modifiers.ignore_case,
                    ))
                })))
            },
        ),
        Function::new(
            "remove_chars",
            Category::String,
            "`string` without any of the characters in `chars`.",
        )
        .keywords(&["delete", "strip"])
        .overload(
            vec![
                arg("string", is_string_or_opt()),
                arg("chars", is_string_or_opt()),
                modifiers_param(),
            ],
            returns_if(BaseType::String, &["string", "chars"]),
            |args, _| {
                let (inputs, strings) = string_inputs(args, &["string", "chars"])?;
                let modifiers = modifiers_of(args)?;
                Ok(Computer::String(propagating(inputs, move |ctx| {
                    let modifiers = read_modifiers(modifiers.as_ref(), ctx)?;
                    Ok(replace_chars(
                        &strings[0].compute(ctx)?,
                        &strings[1].compute(ctx)?,
                        "",
                        modifiers.ignore_case,
                    ))
                })))
            },
        ),
    ]
}
