//! Control flow: `if` and `switch`

use crate::computer::{Computer, Typed};
use crate::eval::{self, select, values_equal, zip_kinds};
use crate::signature::{Arguments, arg, is_anything, is_integer, is_string, vararg};
use crate::value_type::{BaseType, ValueType};

use super::{Category, Function, required};

pub fn functions() -> Vec<Function> {
    vec![if_function(), switch_function()]
}

/// Chains `(condition, value)` pairs into nested selections, last pair innermost.
fn chain_conditions(
    pairs: Vec<(Typed<bool>, Computer)>,
    otherwise: Computer,
) -> eval::Result<Computer> {
    pairs
        .into_iter()
        .rev()
        .try_fold(otherwise, |acc, (condition, value)| {
            zip_kinds!(value, acc, |a, b| select(condition.clone(), a, b))
        })
}

// ============ if ============

fn if_function() -> Function {
    Function::new(
        "if",
        Category::Control,
        "Returns the value of the first condition that is TRUE, or the final \
         `else` value if none is. A MISSING condition counts as FALSE.",
    )
    .keywords(&["conditional", "else", "when"])
    .overload(
        vec![vararg("arguments", is_anything())],
        if_return_type,
        |args, out| {
            let all = args.all("arguments");
            let Some((otherwise, pairs)) = all.split_last() else {
                return Err(eval::EvalError::Implementation(
                    "'if' called without arguments".to_string(),
                ));
            };
            let pairs = pairs
                .chunks(2)
                .map(|pair| match pair {
                    [condition, value] => {
                        Ok((condition.boolean()?, value.clone().coerce(out.base())?))
                    }
                    _ => Err(eval::EvalError::Implementation(
                        "'if' called with an unpaired condition".to_string(),
                    )),
                })
                .collect::<eval::Result<Vec<_>>>()?;
            chain_conditions(pairs, otherwise.clone().coerce(out.base())?)
        },
    )
}

fn if_return_type(args: &Arguments<ValueType>) -> Result<ValueType, String> {
    let types = args.all("arguments");
    if types.len() < 3 || types.len() % 2 == 0 {
        return Err(format!(
            "Expected condition and value pairs followed by an else value, but got {} arguments.",
            types.len()
        ));
    }
    let mut optional = false;
    for (i, condition) in types.iter().step_by(2).take(types.len() / 2).enumerate() {
        if condition.base() != BaseType::Boolean {
            return Err(format!(
                "Condition {} must be BOOLEAN, but got {condition}.",
                i + 1
            ));
        }
        optional |= condition.is_optional();
    }
    let values: Vec<ValueType> = types
        .iter()
        .skip(1)
        .step_by(2)
        .chain(types.last())
        .copied()
        .collect();
    let joined = ValueType::join_all(&values).ok_or_else(|| {
        let names: Vec<String> = values.iter().map(|t| t.name()).collect();
        format!("All values must have a common type, but got {}.", names.join(", "))
    })?;
    Ok(if optional { joined.optional_type() } else { joined })
}

// ============ switch ============

fn switch_function() -> Function {
    Function::new(
        "switch",
        Category::Control,
        "Compares `value` against each case in order and returns the result of \
         the first matching case. Without a match, returns the trailing default \
         or MISSING if there is none. A MISSING value matches no case.",
    )
    .keywords(&["case", "match", "select"])
    .overload(
        vec![
            arg("value", is_integer().or(is_string()).or_missing()),
            vararg("cases", is_anything()),
        ],
        switch_return_type,
        |args, out| {
            let value = required(args, "value")?.clone();
            let cases = args.all("cases");
            let (pairs, default) = if cases.len() % 2 == 1 {
                (&cases[..cases.len() - 1], cases.last().cloned())
            } else {
                (cases, None)
            };
            let pairs = pairs
                .chunks(2)
                .map(|pair| match pair {
                    [case, result] => Ok((
                        matches_case(value.clone(), case.clone()),
                        result.clone().coerce(out.base())?,
                    )),
                    _ => Err(eval::EvalError::Implementation(
                        "'switch' called with an unpaired case".to_string(),
                    )),
                })
                .collect::<eval::Result<Vec<_>>>()?;
            let otherwise = match default {
                Some(d) => d.coerce(out.base())?,
                None => Computer::missing_of(out.base()),
            };
            chain_conditions(pairs, otherwise)
        },
    )
}

fn matches_case(value: Computer, case: Computer) -> Typed<bool> {
    Typed::present(move |ctx| {
        if value.is_missing(ctx)? || case.is_missing(ctx)? {
            return Ok(false);
        }
        Ok(values_equal(&value.value(ctx)?, &case.value(ctx)?))
    })
}

fn switch_return_type(args: &Arguments<ValueType>) -> Result<ValueType, String> {
    let value = args
        .get("value")
        .copied()
        .ok_or_else(|| "Missing required argument 'value'.".to_string())?;
    if value.is_missing() {
        return Err("The value to switch on must not be MISSING.".to_string());
    }
    let cases = args.all("cases");
    if cases.len() < 2 {
        return Err("Expected at least one case and its result.".to_string());
    }
    let has_default = cases.len() % 2 == 1;
    let mut results = Vec::new();
    for (i, pair) in cases.chunks(2).enumerate() {
        match pair {
            [case, result] => {
                if *case != value.base_type() {
                    return Err(format!(
                        "Case {} must be {}, but got {case}.",
                        i + 1,
                        value.base_type()
                    ));
                }
                results.push(*result);
            }
            [default] => results.push(*default),
            _ => {}
        }
    }
    let joined = ValueType::join_all(&results).ok_or_else(|| {
        let names: Vec<String> = results.iter().map(|t| t.name()).collect();
        format!("All results must have a common type, but got {}.", names.join(", "))
    })?;
    Ok(if has_default { joined } else { joined.optional_type() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Arg, Ast};
    use crate::functions::testing::{type_of, value};
    use crate::value::Value;

    #[test]
    fn if_picks_first_true_condition() {
        assert_eq!(value("if(FALSE, 1, TRUE, 2, 3)"), Value::Integer(2));
        assert_eq!(value("if(FALSE, 1, FALSE, 2, 3.5)"), Value::Float(3.5));
        assert_eq!(value("if(MISSING == 1, \"a\", \"b\")"), Value::String("b".into()));
    }

    fn positional(args: impl IntoIterator<Item = Ast>) -> Vec<Arg<Ast>> {
        args.into_iter().map(Arg::pos).collect()
    }

    #[test]
    fn if_typing() {
        let args = positional([Ast::boolean(true), Ast::boolean(true), Ast::missing()]);
        assert_eq!(type_of("if", args), Ok(ValueType::OPT_BOOLEAN));

        let args = positional([Ast::integer(1), Ast::integer(1), Ast::integer(2)]);
        assert!(type_of("if", args).unwrap_err().contains("Condition 1 must be BOOLEAN"));

        let args = positional([Ast::boolean(true), Ast::integer(1)]);
        assert!(type_of("if", args).is_err());

        let args = positional([Ast::boolean(true), Ast::string("a"), Ast::integer(2)]);
        assert!(type_of("if", args).unwrap_err().contains("common type"));
    }

    #[test]
    fn switch_matches_cases() {
        let string = |s: &str| Value::String(s.into());
        assert_eq!(value("switch(2, 1, \"one\", 2, \"two\", \"many\")"), string("two"));
        assert_eq!(value("switch(9, 1, \"one\", 2, \"two\", \"many\")"), string("many"));
        assert_eq!(value("switch(\"b\", \"a\", 1, \"b\", 2.5)"), Value::Float(2.5));
        assert_eq!(value("switch(3, 1, 10)"), Value::Missing);
        assert_eq!(value("switch(4, 2 + 2, \"computed\", \"other\")"), string("computed"));
    }

    #[test]
    fn switch_typing() {
        let args = positional([Ast::integer(1), Ast::integer(1), Ast::string("x")]);
        assert_eq!(type_of("switch", args), Ok(ValueType::OPT_STRING));

        let args = positional([
            Ast::integer(1),
            Ast::integer(1),
            Ast::string("x"),
            Ast::string("y"),
        ]);
        assert_eq!(type_of("switch", args), Ok(ValueType::STRING));

        let args = positional([Ast::integer(1), Ast::string("1"), Ast::integer(0)]);
        assert!(type_of("switch", args).unwrap_err().contains("Case 1 must be INTEGER"));
    }
}
