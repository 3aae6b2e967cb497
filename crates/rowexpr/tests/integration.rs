//! Black-box integration tests for rowexpr
//!
//! These tests exercise the full parse → infer → evaluate pipeline.

use pretty_assertions::assert_eq;
use rowexpr::functions::{Category, Function, Registry};
use rowexpr::signature::{arg, is_anything};
use rowexpr::{
    BaseType, ColumnId, CompileErrorKind, Computer, EvalContext, ExpressionRunner, FlowVariables,
    Table, TypingContext, Value, ValueType, compile, evaluate, filter_rows,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Types and evaluates an expression that reads no columns.
fn eval(source: &str) -> (ValueType, Value) {
    let ast = compile(source, &TypingContext::new()).unwrap();
    let computer = evaluate(&ast, |_| None, |_| None, |_| None).unwrap();
    let value = computer.value(&EvalContext::new()).unwrap();
    (ast.ty().unwrap(), value)
}

fn people() -> Table {
    Table::new(["alice", "bob", "carol"])
        .with_column(
            "age",
            ValueType::OPT_INTEGER,
            vec![31.into(), Value::Missing, 45.into()],
        )
        .unwrap()
        .with_column(
            "name",
            ValueType::STRING,
            vec!["Alice".into(), "Bob".into(), "Carol".into()],
        )
        .unwrap()
        .with_column(
            "score",
            ValueType::FLOAT,
            vec![0.5.into(), 2.0.into(), f64::NAN.into()],
        )
        .unwrap()
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn column(table: &Table, name: &str) -> Vec<Value> {
    table.column(name).unwrap().values().to_vec()
}

// ============ Typing and evaluation ============

#[test]
fn arithmetic_follows_operand_types() {
    assert_eq!(eval("1 + 2"), (ValueType::INTEGER, Value::Integer(3)));
    assert_eq!(eval("1 + 2.0"), (ValueType::FLOAT, Value::Float(3.0)));
    assert_eq!(eval("7 / 2"), (ValueType::FLOAT, Value::Float(3.5)));
    assert_eq!(eval("7 // 2"), (ValueType::INTEGER, Value::Integer(3)));
    assert_eq!(eval("2 ** 10"), (ValueType::INTEGER, Value::Integer(1024)));
}

#[test]
fn division_by_zero_never_fails() {
    assert_eq!(eval("10 // 0").1, Value::Integer(0));
    assert_eq!(eval("10 % 0").1, Value::Integer(0));
    assert_eq!(eval("10.0 / 0.0").1, Value::Float(f64::INFINITY));
    let (_, nan) = eval("0.0 / 0.0");
    assert!(matches!(nan, Value::Float(x) if x.is_nan()));
}

#[test]
fn missing_semantics() {
    assert_eq!(eval("\"a\" + MISSING"), (ValueType::STRING, Value::String("aMISSING".into())));
    assert_eq!(eval("MISSING == MISSING").1, Value::Boolean(true));
    assert_eq!(eval("MISSING == 5").1, Value::Boolean(false));
    assert_eq!(eval("MISSING ?? 3"), (ValueType::INTEGER, Value::Integer(3)));
    assert_eq!(eval("if(TRUE, TRUE, MISSING)").0, ValueType::OPT_BOOLEAN);
    assert_eq!(eval("-if(FALSE, 1, MISSING) + 1").1, Value::Missing);
}

#[test]
fn kleene_logic() {
    let unknown = "if(FALSE, TRUE, MISSING)";
    assert_eq!(eval(&format!("{unknown} and FALSE")).1, Value::Boolean(false));
    assert_eq!(eval(&format!("{unknown} or TRUE")).1, Value::Boolean(true));
    assert_eq!(
        eval(&format!("{unknown} and TRUE")),
        (ValueType::OPT_BOOLEAN, Value::Missing)
    );
    assert_eq!(eval(&format!("not {unknown}")).1, Value::Missing);
}

#[test]
fn built_in_functions() {
    assert_eq!(
        eval("upper_case(\"abc\") + length(\"four\")").1,
        Value::String("ABC4".into())
    );
    assert_eq!(eval("max(1, 5, 3)"), (ValueType::INTEGER, Value::Integer(5)));
    assert_eq!(eval("max(1, 5.5)"), (ValueType::FLOAT, Value::Float(5.5)));
    assert_eq!(eval("abs(-4)").1, Value::Integer(4));
}

#[test]
fn custom_resolvers() {
    let row = Arc::new(AtomicI64::new(0));
    let ctx = TypingContext::new().with_columns(|id: &ColumnId| match id {
        ColumnId::Named { name, .. } if name == "x" => Ok(ValueType::INTEGER),
        ColumnId::RowIndex => Ok(ValueType::INTEGER),
        _ => Err("No such column."),
    });
    let ast = compile("$x * 2 + $[ROW_INDEX]", &ctx).unwrap();
    assert_eq!(ast.ty(), Some(ValueType::INTEGER));

    let source = Arc::clone(&row);
    let computer = evaluate(
        &ast,
        |id| match id {
            ColumnId::Named { .. } => {
                let source = Arc::clone(&source);
                Some(Computer::from_source(BaseType::Integer, move || {
                    Value::Integer(source.load(Ordering::Relaxed) * 10)
                }))
            }
            ColumnId::RowIndex => Some(Computer::constant(Value::Integer(0))),
            _ => None,
        },
        |_| None,
        |_| None,
    )
    .unwrap();

    let eval_ctx = EvalContext::new();
    let values: Vec<Value> = (1..=3)
        .map(|i| {
            row.store(i, Ordering::Relaxed);
            computer.value(&eval_ctx).unwrap()
        })
        .collect();
    assert_eq!(values, [Value::Integer(20), Value::Integer(40), Value::Integer(60)]);
}

#[test]
fn computers_are_reusable() {
    let ast = compile("if (1 < 2) { \"yes\" } else { \"no\" }", &TypingContext::new()).unwrap();
    let computer = evaluate(&ast, |_| None, |_| None, |_| None).unwrap();
    let ctx = EvalContext::new();
    let first = computer.value(&ctx).unwrap();
    assert_eq!(first, computer.value(&ctx).unwrap());
    assert_eq!(first, Value::String("yes".into()));
}

// ============ Compile errors ============

#[test]
fn compile_errors_are_collected() {
    let errors = compile("$nope + $$gone + foo(1)", &TypingContext::new()).unwrap_err();
    let kinds: Vec<CompileErrorKind> = errors.errors().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            CompileErrorKind::MissingColumn,
            CompileErrorKind::MissingFlowVariable,
            CompileErrorKind::UnknownFunction,
        ]
    );
    assert!(errors.to_string().starts_with("3 errors:"));
}

#[test]
fn syntax_errors_are_compile_errors() {
    let errors = compile("1 + (2", &TypingContext::new()).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.errors()[0].kind, CompileErrorKind::Syntax);
}

#[test]
fn unknown_names_suggest_registered_ones() {
    let functions = Registry::new([Function::new(
        "fn_with_no_args",
        Category::Control,
        "Always 1.",
    )
    .overload(
        vec![],
        |_| Ok(ValueType::INTEGER),
        |_, _| Ok(Computer::constant(Value::Integer(1))),
    )
    .overload(
        vec![arg("x", is_anything())],
        |_| Ok(ValueType::INTEGER),
        |_, _| Ok(Computer::constant(Value::Integer(1))),
    )]);
    let ctx = TypingContext::new().with_functions(&functions);

    let ast = compile("fn_with_no_args() + fn_with_no_args(\"x\")", &ctx).unwrap();
    let computer = evaluate(&ast, |_| None, |_| None, |_| None).unwrap();
    assert_eq!(computer.value(&EvalContext::new()).unwrap(), Value::Integer(2));

    let errors = compile("fn_with_no_argz()", &ctx).unwrap_err();
    assert_eq!(errors.errors()[0].kind, CompileErrorKind::UnknownFunction);
    assert!(errors.errors()[0].message.contains("'fn_with_no_args'"));
}

// ============ Tables ============

#[test]
fn runner_appends_and_replaces() {
    init_logging();
    let output = ExpressionRunner::new()
        .append("greeting", "\"Hi \" + $name + \" (\" + $[ROW_NUMBER] + \")\"")
        .replace("age", "$age ?? -1")
        .append("adult", "$age >= 18")
        .run(&people(), &FlowVariables::new())
        .unwrap();

    let table = &output.table;
    assert_eq!(column(table, "greeting")[1], Value::String("Hi Bob (2)".into()));
    assert_eq!(
        column(table, "age"),
        [Value::Integer(31), Value::Integer(-1), Value::Integer(45)]
    );
    assert_eq!(
        column(table, "adult"),
        [Value::Boolean(true), Value::Boolean(false), Value::Boolean(true)]
    );
    let names: Vec<&str> = table.column_names().collect();
    assert_eq!(names, ["age", "name", "score", "greeting", "adult"]);
}

#[test]
fn runner_uses_flow_variables_and_aggregations() {
    init_logging();
    let vars = FlowVariables::new().with("bonus", Value::Float(1.5)).unwrap();
    let output = ExpressionRunner::new()
        .append("adjusted", "$score + $$bonus")
        .append("oldest", "$age == COLUMN_MAX(\"age\")")
        .append("top", "COLUMN_MAX(\"score\", ignore_nan=TRUE)")
        .run(&people(), &vars)
        .unwrap();

    let table = &output.table;
    assert_eq!(column(table, "adjusted")[0], Value::Float(2.0));
    assert_eq!(
        column(table, "oldest"),
        [Value::Boolean(false), Value::Boolean(false), Value::Boolean(true)]
    );
    assert_eq!(column(table, "top"), vec![Value::Float(2.0); 3]);
}

#[test]
fn filter_keeps_true_rows_only() {
    let source = "$age > 40 or $name == \"Alice\"";
    let output = filter_rows(source, &people(), &FlowVariables::new()).unwrap();
    let ids: Vec<&str> = (0..output.table.row_count())
        .filter_map(|i| output.table.row_id(i))
        .collect();
    assert_eq!(ids, ["alice", "carol"]);
}

#[test]
fn execution_start_is_fixed() {
    let start = chrono::DateTime::parse_from_rfc3339("2024-03-01T12:00:00+01:00").unwrap();
    let output = ExpressionRunner::new()
        .with_execution_start(start)
        .append("day", "today()")
        .evaluate_flow_variables(&FlowVariables::new());
    // LOCAL_DATE cannot be a flow variable.
    assert!(output.is_err());

    let output = ExpressionRunner::new()
        .with_execution_start(start)
        .append("day", "to_string(today())")
        .evaluate_flow_variables(&FlowVariables::new())
        .unwrap();
    assert_eq!(
        output.flow_variables.get("day"),
        Some(&Value::String("2024-03-01".into()))
    );
}
