//! Editor diagnostics for expression hosts
//!
//! Typing only sees one expression at a time. The checks here add the
//! context of sibling expressions that run in order: reading an output before
//! the expression producing it, reading an output whose expression is broken,
//! and the result types each kind of host accepts.

use indexmap::IndexMap;
use serde::Serialize;

use crate::ast::{Ast, AstKind, ColumnId, Span};
use crate::parse::parse;
use crate::table::{ColumnType, FlowVariables, Table, access_type, no_rows};
use crate::typing::{
    CompileError, CompileErrorKind, CompileErrors, TypingContext, Unresolved, infer,
};
use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

/// One marker in an expression editor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    /// Shown on hover.
    pub message: String,
    /// Shown below the editor.
    pub short_message: String,
    pub severity: Severity,
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, span: Option<Span>) -> Self {
        let message = message.into();
        Self {
            short_message: message.clone(),
            message,
            severity: Severity::Error,
            span,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            short_message: message.clone(),
            message,
            severity: Severity::Warning,
            span: None,
        }
    }

    pub fn from_compile_error(error: &CompileError) -> Self {
        let mut diagnostic = Self::error(error.message.clone(), Some(error.span));
        if error.kind == CompileErrorKind::Syntax {
            diagnostic.short_message = "The expression has a syntax error.".into();
        }
        diagnostic
    }

    fn from_compile_errors(errors: &CompileErrors) -> Vec<Self> {
        errors.errors().iter().map(Self::from_compile_error).collect()
    }
}

/// Diagnostics of one row-mapper expression and the base name of its type,
/// or `"UNKNOWN"` when it could not be typed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapperDiagnostics {
    pub diagnostics: Vec<Diagnostic>,
    pub inferred_type: String,
}

const UNKNOWN_TYPE: &str = "UNKNOWN";
const NO_INPUT_TABLE: &str = "No input table available. Connect a node first.";
const MUST_NOT_BE_MISSING: &str = "The full expression must not evaluate to MISSING.";
const MUST_BE_BOOLEAN: &str = "The full expression must return the value type BOOLEAN in order to \
     filter out rows for which the filter expression evaluates to false.";

// ============ Row mapper ============

/// Checks expressions that compute `outputs` in order, each appending a new
/// column or replacing an existing one of `table`.
pub fn row_mapper_diagnostics(
    table: Option<&Table>,
    flow_variables: &FlowVariables,
    expressions: &[&str],
    outputs: &[&str],
) -> Vec<MapperDiagnostics> {
    let Some(table) = table else {
        return expressions
            .iter()
            .map(|_| MapperDiagnostics {
                diagnostics: vec![Diagnostic::error(NO_INPUT_TABLE, None)],
                inferred_type: UNKNOWN_TYPE.into(),
            })
            .collect();
    };

    let mut columns: IndexMap<String, Result<ColumnType, String>> = table
        .schema()
        .into_iter()
        .map(|(name, ty)| (name, Ok(ty)))
        .collect();
    let appended = appended_names(outputs, |name| columns.contains_key(name));

    let mut results = Vec::with_capacity(expressions.len());
    for (i, source) in expressions.iter().enumerate() {
        let output = outputs.get(i).copied().unwrap_or_default();
        let invalid = || Err(invalid_output(i, "column", output));
        let mut diagnostics = Vec::new();
        let mut inferred_type = UNKNOWN_TYPE.to_string();

        let ast = match parse(source) {
            Ok(ast) => ast,
            Err(err) => {
                let error = CompileError::syntax(&err, source);
                diagnostics.push(Diagnostic::from_compile_error(&error));
                columns.insert(output.to_string(), invalid());
                results.push(MapperDiagnostics {
                    diagnostics,
                    inferred_type,
                });
                continue;
            }
        };

        let premature = premature_accesses(&ast, i, &appended, Access::Column);
        if !premature.is_empty() {
            columns.insert(output.to_string(), invalid());
            results.push(MapperDiagnostics {
                diagnostics: premature,
                inferred_type,
            });
            continue;
        }

        let typed = {
            let ctx = TypingContext::new()
                .with_columns(|id: &ColumnId| overlay_type(&columns, id))
                .with_flow_variables(|name: &str| flow_variables.type_of(name));
            infer(&ast, &ctx)
        };
        match typed {
            Ok(ty) => {
                if ty.is_missing() {
                    diagnostics.push(Diagnostic::error(MUST_NOT_BE_MISSING, Some(ast.span)));
                }
                inferred_type = ty.base().name().to_string();
                columns.insert(output.to_string(), Ok(ColumnType::Supported(ty)));
            }
            Err(errors) => {
                diagnostics.extend(Diagnostic::from_compile_errors(&errors));
                columns.insert(output.to_string(), invalid());
            }
        }
        results.push(MapperDiagnostics {
            diagnostics,
            inferred_type,
        });
    }
    results
}

fn overlay_type(
    columns: &IndexMap<String, Result<ColumnType, String>>,
    id: &ColumnId,
) -> Result<ValueType, Unresolved> {
    match id.name().and_then(|name| columns.get(name)) {
        Some(Err(message)) => Err(Unresolved::Missing(message.clone())),
        Some(Ok(ty)) => access_type(Some(ty), id),
        None => access_type(None, id),
    }
}

// ============ Row filter ============

/// Checks a filter expression; it must type to BOOLEAN.
pub fn row_filter_diagnostics(
    table: Option<&Table>,
    flow_variables: &FlowVariables,
    expression: &str,
) -> Vec<Diagnostic> {
    let Some(table) = table else {
        return vec![Diagnostic::error(NO_INPUT_TABLE, None)];
    };
    let ctx = TypingContext::new()
        .with_columns(|id: &ColumnId| table.column_type(id))
        .with_flow_variables(|name: &str| flow_variables.type_of(name));
    let ast = match crate::compile(expression, &ctx) {
        Ok(ast) => ast,
        Err(errors) => return Diagnostic::from_compile_errors(&errors),
    };

    let ty = ast.ty().unwrap_or(ValueType::MISSING);
    if ty == ValueType::BOOLEAN {
        return Vec::new();
    }
    let message = if ty.base() == BaseType::Boolean {
        format!(
            "{MUST_BE_BOOLEAN} The expression evaluates to a type that can be MISSING. \
             Use the missing coalescing operator '??' to define a default value."
        )
    } else {
        format!("{MUST_BE_BOOLEAN} The expression evaluates to {ty}.")
    };
    vec![Diagnostic::error(message, Some(ast.span))]
}

// ============ Flow variables ============

/// Checks expressions that compute the flow variables `outputs` in order.
pub fn flow_variable_diagnostics(
    flow_variables: &FlowVariables,
    expressions: &[&str],
    outputs: &[&str],
) -> Vec<Vec<Diagnostic>> {
    let mut variables: IndexMap<String, Result<ValueType, Unresolved>> = flow_variables
        .names()
        .map(|name| (name.to_string(), flow_variables.type_of(name)))
        .collect();
    let appended = appended_names(outputs, |name| variables.contains_key(name));

    let mut results = Vec::with_capacity(expressions.len());
    for (i, source) in expressions.iter().enumerate() {
        let output = outputs.get(i).copied().unwrap_or_default();
        let invalid = || Err(Unresolved::Missing(invalid_output(i, "flow variable", output)));

        let ast = match parse(source) {
            Ok(ast) => ast,
            Err(err) => {
                variables.insert(output.to_string(), invalid());
                let error = CompileError::syntax(&err, source);
                results.push(vec![Diagnostic::from_compile_error(&error)]);
                continue;
            }
        };

        let premature = premature_accesses(&ast, i, &appended, Access::FlowVariable);
        if !premature.is_empty() {
            variables.insert(output.to_string(), invalid());
            results.push(premature);
            continue;
        }

        let typed = {
            let ctx = TypingContext::new()
                .with_columns(no_rows)
                .with_flow_variables(|name: &str| {
                    variables.get(name).cloned().unwrap_or_else(|| {
                        Err(Unresolved::Missing(format!(
                            "No flow variable with the name '{name}' is available."
                        )))
                    })
                });
            infer(&ast, &ctx)
        };
        match typed {
            Ok(ty) if ty.is_optional() => {
                variables.insert(output.to_string(), invalid());
                results.push(vec![Diagnostic::error(MUST_NOT_BE_MISSING, Some(ast.span))]);
            }
            Ok(ty) => {
                variables.insert(output.to_string(), Ok(ty));
                results.push(Vec::new());
            }
            Err(errors) => {
                variables.insert(output.to_string(), invalid());
                results.push(Diagnostic::from_compile_errors(&errors));
            }
        }
    }
    results
}

// ============ Sibling checks ============

#[derive(Debug, Clone, Copy)]
enum Access {
    Column,
    FlowVariable,
}

/// Output names that do not exist before the first expression runs; `None`
/// for outputs that replace something.
fn appended_names<'a>(outputs: &[&'a str], exists: impl Fn(&str) -> bool) -> Vec<Option<&'a str>> {
    outputs
        .iter()
        .map(|name| (!exists(*name)).then_some(*name))
        .collect()
}

fn invalid_output(index: usize, what: &str, name: &str) -> String {
    let n = index + 1;
    format!("Expression {n} that outputs {what} '{name}' has errors. Fix Expression {n}.")
}

/// Accesses in expression `index` of names only a later expression appends.
fn premature_accesses(
    ast: &Ast,
    index: usize,
    appended: &[Option<&str>],
    access: Access,
) -> Vec<Diagnostic> {
    let earlier = &appended[..index.min(appended.len())];
    let mut diagnostics = Vec::new();
    ast.walk(&mut |node| {
        let name = match (&node.kind, access) {
            (AstKind::ColumnAccess(ColumnId::Named { name, .. }), Access::Column) => name,
            (AstKind::FlowVarAccess(name), Access::FlowVariable) => name,
            _ => return,
        };
        let Some(owner) = appended.iter().position(|n| *n == Some(name.as_str())) else {
            return;
        };
        if earlier.contains(&Some(name.as_str())) {
            return;
        }
        let what = match access {
            Access::Column => "column",
            Access::FlowVariable => "flow variable",
        };
        diagnostics.push(Diagnostic::error(
            format!(
                "The {what} '{name}' was used before it was appended by Expression {}. \
                 Try reordering your expressions.",
                owner + 1
            ),
            Some(node.span),
        ));
    });
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn table() -> Table {
        Table::with_rows(1)
            .with_column("int", ValueType::INTEGER, vec![Value::Integer(1)])
            .unwrap()
            .with_column("flag", ValueType::OPT_BOOLEAN, vec![Value::Missing])
            .unwrap()
    }

    fn messages(diagnostics: &[Diagnostic]) -> Vec<&str> {
        diagnostics.iter().map(|d| d.message.as_str()).collect()
    }

    #[test]
    fn syntax_errors_get_a_short_message() {
        let results =
            row_mapper_diagnostics(Some(&table()), &FlowVariables::new(), &["1 +"], &["x"]);
        let [diagnostic] = results[0].diagnostics.as_slice() else {
            panic!("expected one diagnostic");
        };
        assert_eq!(diagnostic.short_message, "The expression has a syntax error.");
        assert_ne!(diagnostic.message, diagnostic.short_message);
        assert_eq!(results[0].inferred_type, "UNKNOWN");
    }

    #[test]
    fn premature_access_names_the_owner() {
        let results = row_mapper_diagnostics(
            Some(&table()),
            &FlowVariables::new(),
            &["$out2 + $int", "100"],
            &["out1", "out2"],
        );
        assert_eq!(
            messages(&results[0].diagnostics),
            [
                "The column 'out2' was used before it was appended by Expression 2. \
                 Try reordering your expressions."
            ]
        );
        assert_eq!(results[0].diagnostics[0].span, Some(Span::new(0, 5)));
        assert!(results[1].diagnostics.is_empty());
        assert_eq!(results[1].inferred_type, "INTEGER");
    }

    #[test]
    fn later_expressions_see_earlier_outputs() {
        let results = row_mapper_diagnostics(
            Some(&table()),
            &FlowVariables::new(),
            &["$int * 2.5", "$a + 1", "$int + \"x\""],
            &["a", "b", "int"],
        );
        assert!(results.iter().all(|r| r.diagnostics.is_empty()));
        let types: Vec<&str> = results.iter().map(|r| r.inferred_type.as_str()).collect();
        assert_eq!(types, ["FLOAT", "FLOAT", "STRING"]);
    }

    #[test]
    fn broken_outputs_are_reported_once() {
        let results = row_mapper_diagnostics(
            Some(&table()),
            &FlowVariables::new(),
            &["$nope", "$a + 1"],
            &["a", "b"],
        );
        assert!(matches!(results[0].diagnostics.as_slice(), [d] if d.message.contains("'nope'")));
        assert_eq!(
            messages(&results[1].diagnostics),
            ["Expression 1 that outputs column 'a' has errors. Fix Expression 1."]
        );
    }

    #[test]
    fn mapper_rejects_missing_and_needs_a_table() {
        let results =
            row_mapper_diagnostics(Some(&table()), &FlowVariables::new(), &["MISSING"], &["m"]);
        assert_eq!(messages(&results[0].diagnostics), [MUST_NOT_BE_MISSING]);
        assert_eq!(results[0].inferred_type, "MISSING");

        let results = row_mapper_diagnostics(None, &FlowVariables::new(), &["1", "2"], &["a", "b"]);
        assert_eq!(results.len(), 2);
        assert_eq!(messages(&results[1].diagnostics), [NO_INPUT_TABLE]);
    }

    #[test]
    fn filters_must_be_boolean() {
        let vars = FlowVariables::new();
        assert!(row_filter_diagnostics(Some(&table()), &vars, "$int > 0").is_empty());

        let diagnostics = row_filter_diagnostics(Some(&table()), &vars, "$int");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.ends_with("The expression evaluates to INTEGER."));

        let diagnostics = row_filter_diagnostics(Some(&table()), &vars, "$flag");
        assert!(diagnostics[0].message.contains("'??'"));
        assert!(row_filter_diagnostics(Some(&table()), &vars, "$flag ?? FALSE").is_empty());
    }

    #[test]
    fn flow_variable_checks() {
        let vars = FlowVariables::new().with("base", Value::Integer(1)).unwrap();
        let results = flow_variable_diagnostics(
            &vars,
            &[
                "$$later",
                "$$base + 1",
                "$$next * 2",
                "$col",
                "if ($$base > 0) { 1 } else { MISSING }",
            ],
            &["first", "next", "later", "x", "y"],
        );
        assert!(messages(&results[0])[0].contains("by Expression 3"));
        assert!(results[1].is_empty());
        assert!(results[2].is_empty());
        assert!(messages(&results[3])[0].contains("Use '$$'"));
        assert_eq!(messages(&results[4]), [MUST_NOT_BE_MISSING]);
    }
}
