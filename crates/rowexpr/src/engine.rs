//! Expression runner over in-memory tables
//!
//! Runs an ordered list of expressions against a [`Table`]: each one appends
//! or replaces a column, and later expressions see the columns earlier ones
//! produced. Column aggregations are computed before the row pass.
//!
//! # Example
//!
//! ```ignore
//! let output = ExpressionRunner::new()
//!     .append("total", "$price * $quantity")
//!     .replace("name", "upper_case($name)")
//!     .run(&table, &FlowVariables::new())?;
//! ```

use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::{Ast, AstKind, Resolution};
use crate::computer::Computer;
use crate::eval::{EvalContext, EvalError, evaluate};
use crate::table::{FlowVariables, RowCursor, Table, TableError, no_rows};
use crate::typing::{CompileErrors, TypingContext};
use crate::value::Value;
use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Expression {index}: {source}")]
    Compile {
        index: usize,
        #[source]
        source: CompileErrors,
    },
    #[error("Expression {index}: {source}")]
    Evaluation {
        index: usize,
        #[source]
        source: EvalError,
    },
    #[error("Expression {index}: {message}")]
    InvalidResult { index: usize, message: String },
    #[error("Expression {index} replaces the column '{name}', which does not exist.")]
    UnknownColumn { index: usize, name: String },
    #[error("Expression {index} appends the column '{name}', which already exists.")]
    ColumnExists { index: usize, name: String },
    #[error(transparent)]
    Table(#[from] TableError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Whether an expression's output is a new column or overwrites one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionMode {
    Append,
    Replace,
}

#[derive(Debug, Clone)]
struct Output {
    source: String,
    mode: InsertionMode,
}

/// A table produced by [`ExpressionRunner::run`] or [`filter_rows`].
#[derive(Debug, Clone)]
pub struct TableOutput {
    pub table: Table,
    /// The first warning of each expression, in expression order.
    pub warnings: Vec<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct FlowVariableOutput {
    pub flow_variables: FlowVariables,
    pub warnings: Vec<Option<String>>,
}

/// Ordered expressions keyed by the column or flow variable they produce.
#[derive(Debug, Clone, Default)]
pub struct ExpressionRunner {
    outputs: IndexMap<String, Output>,
    execution_start: Option<DateTime<FixedOffset>>,
}

impl ExpressionRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.with_output(name, source, InsertionMode::Append)
    }

    pub fn replace(self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.with_output(name, source, InsertionMode::Replace)
    }

    pub fn with_output(
        mut self,
        name: impl Into<String>,
        source: impl Into<String>,
        mode: InsertionMode,
    ) -> Self {
        self.outputs.insert(
            name.into(),
            Output {
                source: source.into(),
                mode,
            },
        );
        self
    }

    /// Fixes what `now()` and `today()` return.
    pub fn with_execution_start(mut self, start: DateTime<FixedOffset>) -> Self {
        self.execution_start = Some(start);
        self
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    fn eval_context(&self) -> EvalContext {
        match self.execution_start {
            Some(start) => EvalContext::new().with_execution_start(start),
            None => EvalContext::new(),
        }
    }

    /// Computes every output column in order.
    pub fn run(&self, table: &Table, flow_variables: &FlowVariables) -> Result<TableOutput> {
        let mut table = table.clone();
        let mut warnings = Vec::with_capacity(self.outputs.len());

        for (i, (name, output)) in self.outputs.iter().enumerate() {
            let index = i + 1;
            match output.mode {
                InsertionMode::Replace if !table.has_column(name) => {
                    return Err(EngineError::UnknownColumn {
                        index,
                        name: name.clone(),
                    });
                }
                InsertionMode::Append if table.has_column(name) => {
                    return Err(EngineError::ColumnExists {
                        index,
                        name: name.clone(),
                    });
                }
                _ => {}
            }
            log::debug!("expression {index}: computing column '{name}'");

            let (ast, ty) = compile_for_rows(index, &output.source, &table, flow_variables)?;
            if ty.is_missing() {
                return Err(EngineError::InvalidResult {
                    index,
                    message: "The full expression must not evaluate to MISSING.".into(),
                });
            }
            let ctx = self.eval_context();
            let values = evaluate_rows(index, &ast, ty, &table, flow_variables, &ctx)?;
            table.set_column(name.clone(), ty, values)?;
            warnings.push(first_warning(index, &ctx));
        }

        log::debug!("computed {} column(s) over {} row(s)", self.len(), table.row_count());
        Ok(TableOutput { table, warnings })
    }

    /// Computes every output as a flow variable, in order. Expressions cannot
    /// read rows and must not evaluate to MISSING.
    pub fn evaluate_flow_variables(
        &self,
        flow_variables: &FlowVariables,
    ) -> Result<FlowVariableOutput> {
        let mut flow_variables = flow_variables.clone();
        let mut warnings = Vec::with_capacity(self.outputs.len());

        for (i, (name, output)) in self.outputs.iter().enumerate() {
            let index = i + 1;
            log::debug!("expression {index}: computing flow variable '{name}'");

            let (ast, ty) = compile_for_flow_variables(index, &output.source, &flow_variables)?;
            if ty.is_optional() {
                return Err(EngineError::InvalidResult {
                    index,
                    message: "The full expression must not evaluate to MISSING.".into(),
                });
            }

            let eval_ctx = self.eval_context();
            let value = evaluate(
                &ast,
                |_| None,
                |name| flow_variables.computer(name),
                |_| None,
            )
            .and_then(|computer| computer.coerce(ty.base()))
            .and_then(|computer| computer.value(&eval_ctx))
            .map_err(|source| EngineError::Evaluation { index, source })?;
            flow_variables.insert(name.clone(), value)?;
            warnings.push(first_warning(index, &eval_ctx));
        }

        Ok(FlowVariableOutput {
            flow_variables,
            warnings,
        })
    }
}

/// Keeps the rows for which `source` is present and true.
pub fn filter_rows(
    source: &str,
    table: &Table,
    flow_variables: &FlowVariables,
) -> Result<TableOutput> {
    let (ast, ty) = compile_for_rows(1, source, table, flow_variables)?;
    if ty.base() != BaseType::Boolean {
        return Err(EngineError::InvalidResult {
            index: 1,
            message: format!("A row filter must evaluate to BOOLEAN, but it evaluates to {ty}."),
        });
    }
    let ctx = EvalContext::new();
    let keep: Vec<bool> = evaluate_rows(1, &ast, ty, table, flow_variables, &ctx)?
        .into_iter()
        .map(|value| value == Value::Boolean(true))
        .collect();
    log::debug!(
        "row filter kept {} of {} row(s)",
        keep.iter().filter(|k| **k).count(),
        table.row_count()
    );
    Ok(TableOutput {
        table: table.filter(&keep),
        warnings: vec![first_warning(1, &ctx)],
    })
}

// ============ Helpers ============

fn compile_for_rows(
    index: usize,
    source: &str,
    table: &Table,
    flow_variables: &FlowVariables,
) -> Result<(Ast, ValueType)> {
    let ctx = TypingContext::new()
        .with_columns(|id| table.column_type(id))
        .with_flow_variables(|name: &str| flow_variables.type_of(name));
    let ast =
        crate::compile(source, &ctx).map_err(|source| EngineError::Compile { index, source })?;
    let ty = ast.ty().unwrap_or(ValueType::MISSING);
    Ok((ast, ty))
}

fn compile_for_flow_variables(
    index: usize,
    source: &str,
    flow_variables: &FlowVariables,
) -> Result<(Ast, ValueType)> {
    let ctx = TypingContext::new()
        .with_columns(no_rows)
        .with_flow_variables(|name: &str| flow_variables.type_of(name));
    let ast =
        crate::compile(source, &ctx).map_err(|source| EngineError::Compile { index, source })?;
    let ty = ast.ty().unwrap_or(ValueType::MISSING);
    Ok((ast, ty))
}

/// Computes every aggregation call in `ast` over its whole column.
fn aggregate<'a>(ast: &'a Ast, table: &Table) -> Vec<(&'a Ast, Computer)> {
    let mut results = Vec::new();
    ast.walk(&mut |node| {
        let AstKind::AggregationCall(call) = &node.kind else {
            return;
        };
        let Some(Resolution::Aggregation(resolved)) = call.resolution() else {
            return;
        };
        let Some(column) = resolved
            .aggregation
            .column_name(&resolved.arguments)
            .and_then(|name| table.column(name))
        else {
            return;
        };
        let mut accumulator = resolved
            .aggregation
            .accumulator(&resolved.arguments, resolved.column_type);
        for value in column.values() {
            accumulator.add_row(value);
        }
        results.push((node, accumulator.result_computer()));
    });
    results
}

fn evaluate_rows(
    index: usize,
    ast: &Ast,
    ty: ValueType,
    table: &Table,
    flow_variables: &FlowVariables,
    ctx: &EvalContext,
) -> Result<Vec<Value>> {
    let failed = |source| EngineError::Evaluation { index, source };
    let aggregations = aggregate(ast, table);
    let cursor = RowCursor::new();
    let computer = evaluate(
        ast,
        |id| table.computer(id, &cursor),
        |name| flow_variables.computer(name),
        |node| {
            aggregations
                .iter()
                .find(|(call, _)| std::ptr::eq(*call, node))
                .map(|(_, computer)| computer.clone())
        },
    )
    .and_then(|computer| computer.coerce(ty.base()))
    .map_err(failed)?;

    let mut values = Vec::with_capacity(table.row_count());
    for row in 0..table.row_count() {
        cursor.set(row);
        values.push(computer.value(ctx).map_err(failed)?);
    }
    Ok(values)
}

fn first_warning(index: usize, ctx: &EvalContext) -> Option<String> {
    let warnings = ctx.warnings();
    for warning in &warnings {
        log::warn!("expression {index}: {warning}");
    }
    warnings.into_iter().next()
}
