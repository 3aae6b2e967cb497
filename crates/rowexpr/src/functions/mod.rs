//! Built-in functions
//!
//! A [`Function`] owns one or more [`Overload`]s. Type inference binds a call
//! to the first overload whose parameters accept the argument types and
//! whose return-type rule succeeds; evaluation hands the bound argument
//! computers to that overload's implementation.

pub mod control;
pub mod math;
pub mod string;
pub mod temporal;

use std::fmt;
use std::sync::{Arc, LazyLock};

use indexmap::IndexMap;
use serde::Serialize;

use crate::computer::{Computer, Typed, any_missing};
use crate::eval::{self, EvalError, EvaluationContext};
use crate::signature::{Arguments, Param, describe};
use crate::value::format_float;
use crate::value_type::{BaseType, ValueType};

pub type ReturnTypeFn =
    Arc<dyn Fn(&Arguments<ValueType>) -> Result<ValueType, String> + Send + Sync>;
pub type ImplementationFn =
    Arc<dyn Fn(&Arguments<Computer>, ValueType) -> eval::Result<Computer> + Send + Sync>;

pub struct Overload {
    pub params: Vec<Param>,
    pub return_type: ReturnTypeFn,
    pub implementation: ImplementationFn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Control,
    MathGeneral,
    MathRound,
    MathAggregate,
    MathTrigonometry,
    MathDistributions,
    String,
    Temporal,
    Aggregation,
}

impl Category {
    pub fn name(self) -> &'static str {
        match self {
            Category::Control => "Control",
            Category::MathGeneral => "Math: General",
            Category::MathRound => "Math: Round",
            Category::MathAggregate => "Math: Aggregate",
            Category::MathTrigonometry => "Math: Trigonometry",
            Category::MathDistributions => "Math: Distributions",
            Category::String => "String",
            Category::Temporal => "Temporal",
            Category::Aggregation => "Column Aggregations",
        }
    }
}

pub struct Function {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
    pub keywords: Vec<&'static str>,
    pub overloads: Vec<Overload>,
}

impl Function {
    pub fn new(name: &'static str, category: Category, description: &'static str) -> Self {
        Self {
            name,
            category,
            description,
            keywords: Vec::new(),
            overloads: Vec::new(),
        }
    }

    pub fn keywords(mut self, keywords: &[&'static str]) -> Self {
        self.keywords.extend_from_slice(keywords);
        self
    }

    pub fn overload(
        mut self,
        params: Vec<Param>,
        return_type: impl Fn(&Arguments<ValueType>) -> Result<ValueType, String>
        + Send
        + Sync
        + 'static,
        implementation: impl Fn(&Arguments<Computer>, ValueType) -> eval::Result<Computer>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.overloads.push(Overload {
            params,
            return_type: Arc::new(return_type),
            implementation: Arc::new(implementation),
        });
        self
    }

    /// One line per overload, e.g. `round(x: INTEGER or FLOAT (or MISSING), precision?: ..)`.
    pub fn signatures(&self) -> Vec<String> {
        self.overloads
            .iter()
            .map(|o| format!("{}{}", self.name, describe(&o.params)))
            .collect()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("overloads", &self.overloads.len())
            .finish()
    }
}

// ============ Registry ============

pub trait Named {
    fn name(&self) -> &str;
}

impl Named for Function {
    fn name(&self) -> &str {
        self.name
    }
}

/// Immutable name lookup for functions or aggregations.
#[derive(Debug)]
pub struct Registry<T> {
    entries: IndexMap<String, Arc<T>>,
}

impl<T: Named> Registry<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        let entries = items
            .into_iter()
            .map(|item| (item.name().to_string(), Arc::new(item)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Known names that look like `name`, closest first.
    pub fn suggest(&self, name: &str) -> Vec<&str> {
        let wanted = name.to_lowercase();
        let mut scored: Vec<(f64, &str)> = self
            .names()
            .filter_map(|candidate| {
                let lower = candidate.to_lowercase();
                let score = strsim::jaro_winkler(&wanted, &lower);
                let close = strsim::levenshtein(&wanted, &lower) <= 3 || score > 0.8;
                close.then_some((score, candidate))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.into_iter().map(|(_, n)| n).take(3).collect()
    }
}

pub static BUILT_IN_FUNCTIONS: LazyLock<Registry<Function>> = LazyLock::new(|| {
    let registry = Registry::new(
        control::functions()
            .into_iter()
            .chain(math::functions())
            .chain(string::functions())
            .chain(temporal::functions()),
    );
    log::debug!("registered {} built-in functions", registry.len());
    registry
});

// ============ Helpers shared by the implementations ============

pub(crate) fn any_optional(args: &Arguments<ValueType>) -> bool {
    args.values().any(|t| t.is_optional())
}

pub(crate) fn all_integer(args: &Arguments<ValueType>) -> bool {
    args.values().all(|t| t.base() == BaseType::Integer)
}

/// Return type `base`, optional if any argument is.
pub(crate) fn returns(
    base: BaseType,
) -> impl Fn(&Arguments<ValueType>) -> Result<ValueType, String> + Send + Sync + 'static {
    move |args| Ok(ValueType::of(base, any_optional(args)))
}

/// Return type `ty` regardless of the arguments.
pub(crate) fn returns_exactly(
    ty: ValueType,
) -> impl Fn(&Arguments<ValueType>) -> Result<ValueType, String> + Send + Sync + 'static {
    move |_| Ok(ty)
}

pub(crate) fn required<'a>(
    args: &'a Arguments<Computer>,
    name: &str,
) -> eval::Result<&'a Computer> {
    args.get(name)
        .ok_or_else(|| EvalError::Implementation(format!("argument '{name}' is not bound")))
}

/// Present iff every input is present.
pub(crate) fn propagating<T: 'static>(
    inputs: Vec<Computer>,
    compute: impl Fn(&dyn EvaluationContext) -> eval::Result<T> + Send + Sync + 'static,
) -> Typed<T> {
    Typed::new(compute, move |ctx| any_missing(&inputs, ctx))
}

/// Like [`propagating`], but `compute` may itself decide the result is missing.
pub(crate) fn partial<T: 'static>(
    inputs: Vec<Computer>,
    compute: impl Fn(&dyn EvaluationContext) -> eval::Result<Option<T>> + Send + Sync + 'static,
) -> Typed<T> {
    let compute = Arc::new(compute);
    let peek = Arc::clone(&compute);
    Typed::new(
        move |ctx| {
            compute(ctx)?.ok_or_else(|| {
                EvalError::Implementation("compute called on a missing value".to_string())
            })
        },
        move |ctx| Ok(any_missing(&inputs, ctx)? || peek(ctx)?.is_none()),
    )
}

/// The value of an optional argument, or `None` if absent or not given.
pub(crate) fn optional_value<T: 'static>(
    arg: Option<&Typed<T>>,
    ctx: &dyn EvaluationContext,
) -> eval::Result<Option<T>> {
    match arg {
        Some(c) if !c.is_missing(ctx)? => c.compute(ctx).map(Some),
        _ => Ok(None),
    }
}

/// Floats in warnings use the constant names: NaN, INFINITY, -INFINITY.
pub(crate) fn render_float(x: f64) -> String {
    format_float(x).replace("Infinity", "INFINITY")
}

/// Emits "`function` returned `result` because `reason`."
pub(crate) fn warn(ctx: &dyn EvaluationContext, function: &str, result: &str, reason: &str) {
    ctx.add_warning(format!("{function} returned {result} because {reason}."));
}

#[cfg(test)]
pub(crate) mod testing {
    //! Runs a single call through typing and evaluation.

    use crate::ast::{Arg, Ast, ColumnId};
    use crate::computer::Computer;
    use crate::eval::{EvalContext, Result, evaluate};
    use crate::typing::{TypingContext, infer};
    use crate::value::Value;
    use crate::value_type::ValueType;

    /// Evaluates `name(args...)` with constant arguments.
    pub fn call(name: &str, args: Vec<Arg<Ast>>) -> (Result<Value>, Vec<String>) {
        let ast = Ast::function(name, args);
        infer(&ast, &TypingContext::new()).unwrap();
        run(&ast)
    }

    /// Type of `name(args...)`, or the first typing error message.
    pub fn type_of(name: &str, args: Vec<Arg<Ast>>) -> std::result::Result<ValueType, String> {
        let ast = Ast::function(name, args);
        infer(&ast, &TypingContext::new()).map_err(|e| e.errors()[0].message.clone())
    }

    /// Evaluates parsed `source`, which must not access columns.
    pub fn eval(source: &str) -> (Result<Value>, Vec<String>) {
        let ast = crate::parse::parse(source).unwrap();
        infer(&ast, &TypingContext::new()).unwrap();
        run(&ast)
    }

    pub fn value(source: &str) -> Value {
        eval(source).0.unwrap()
    }

    fn run(ast: &Ast) -> (Result<Value>, Vec<String>) {
        let computer = evaluate(
            ast,
            |_: &ColumnId| None::<Computer>,
            |_: &str| None,
            |_: &Ast| None,
        )
        .unwrap();
        let ctx = EvalContext::new();
        let value = computer.value(&ctx);
        (value, ctx.warnings())
    }
}
