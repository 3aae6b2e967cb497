use proptest::prelude::*;
use rowexpr::{
    BaseType, ColumnId, EvalContext, TypingContext, Value, ValueType, compile, evaluate, parse,
};

fn arb_atom() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("$x".to_string()),
        Just("$$v".to_string()),
        Just("$[\"two words\", -1]".to_string()),
        Just("$[ROW_INDEX]".to_string()),
        Just("MISSING".to_string()),
        Just("TRUE".to_string()),
        Just("\"text\"".to_string()),
        (0i64..1000).prop_map(|n| n.to_string()),
        (0i64..1000).prop_map(|n| format!("-{n}")),
        (0u32..100).prop_map(|n| format!("{n}.25")),
    ]
}

fn arb_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("+"),
        Just("-"),
        Just("*"),
        Just("/"),
        Just("//"),
        Just("%"),
        Just("**"),
        Just("<"),
        Just(">="),
        Just("=="),
        Just("!="),
        Just("and"),
        Just("or"),
        Just("??"),
    ]
}

fn arb_expr(depth: u32) -> BoxedStrategy<String> {
    if depth == 0 {
        return arb_atom().boxed();
    }

    let leaf = arb_atom();
    let binary = (arb_expr(depth - 1), arb_op(), arb_expr(depth - 1))
        .prop_map(|(lhs, op, rhs)| format!("({lhs} {op} {rhs})"));
    let unary = arb_expr(depth - 1).prop_map(|e| format!("not ({e})"));
    let conditional = (arb_expr(depth - 1), arb_expr(depth - 1), arb_expr(depth - 1))
        .prop_map(|(c, t, e)| format!("if ({c}) {{ {t} }} else {{ {e} }}"));
    let call = (arb_expr(depth - 1), arb_expr(depth - 1))
        .prop_map(|(a, b)| format!("max({a}, {b})"));
    prop_oneof![4 => leaf, 4 => binary, 1 => unary, 1 => conditional, 1 => call].boxed()
}

fn arb_type() -> impl Strategy<Value = ValueType> {
    (prop::sample::select(BaseType::ALL.to_vec()), any::<bool>())
        .prop_map(|(base, optional)| ValueType::of(base, optional || base == BaseType::Missing))
}

fn arb_numeric() -> impl Strategy<Value = ValueType> {
    prop::sample::select(vec![
        ValueType::INTEGER,
        ValueType::OPT_INTEGER,
        ValueType::FLOAT,
        ValueType::OPT_FLOAT,
    ])
}

fn two_columns(a: ValueType, b: ValueType) -> TypingContext<'static> {
    TypingContext::new().with_columns(move |id: &ColumnId| match id.name() {
        Some("a") => Ok(a),
        Some("b") => Ok(b),
        _ => Err("No such column."),
    })
}

proptest! {
    #[test]
    fn parse_pretty_roundtrip(expr in arb_expr(3)) {
        let parsed = parse(&expr).expect("generated expression should parse");
        let rendered = parsed.to_string();
        let reparsed = parse(&rendered).expect("pretty output should reparse");
        prop_assert_eq!(parsed, reparsed);
    }

    #[test]
    fn join_is_a_least_upper_bound(a in arb_type(), b in arb_type()) {
        prop_assert_eq!(a.join(b), b.join(a));
        prop_assert_eq!(a.join(a), Some(a));
        if let Some(joined) = a.join(b) {
            prop_assert!(a.is_subtype_of(joined));
            prop_assert!(b.is_subtype_of(joined));
            prop_assert_eq!(joined.is_optional(), a.is_optional() || b.is_optional());
        }
    }

    #[test]
    fn missing_joins_with_everything(a in arb_type()) {
        prop_assert_eq!(ValueType::MISSING.join(a), Some(a.optional_type()));
    }

    #[test]
    fn arithmetic_optionality_is_the_or_of_its_operands(
        a in arb_numeric(),
        b in arb_numeric(),
        op in prop::sample::select(vec!["+", "-", "*", "%"]),
    ) {
        let ast = compile(&format!("$a {op} $b"), &two_columns(a, b)).unwrap();
        let ty = ast.ty().unwrap();
        prop_assert_eq!(ty.is_optional(), a.is_optional() || b.is_optional());
        prop_assert_eq!(ty.base(), a.base_type().join(b.base_type()).unwrap().base());
    }

    #[test]
    fn integer_arithmetic_matches_rust(
        a in -1_000_000i64..1_000_000,
        b in -1_000_000i64..1_000_000,
    ) {
        let source = format!("({a}) * 3 + ({b}) - ({a})");
        let ast = compile(&source, &TypingContext::new()).unwrap();
        let computer = evaluate(&ast, |_| None, |_| None, |_| None).unwrap();
        let value = computer.value(&EvalContext::new()).unwrap();
        prop_assert_eq!(value, Value::Integer(a * 3 + b - a));
    }

    #[test]
    fn typing_is_deterministic(expr in arb_expr(2)) {
        let ctx = two_columns(ValueType::INTEGER, ValueType::OPT_STRING);
        let first = compile(&expr, &ctx).map(|ast| ast.ty());
        let second = compile(&expr, &ctx).map(|ast| ast.ty());
        prop_assert_eq!(first, second);
    }
}
