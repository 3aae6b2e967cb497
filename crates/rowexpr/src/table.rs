//! In-memory tables and flow variables
//!
//! A [`Table`] holds named, typed columns of equal length plus one row id per
//! row. It types column accesses for inference and builds the computers that
//! read them. Computers read the row a shared [`RowCursor`] points at, so a
//! single computer tree serves every row.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;
use thiserror::Error;

use crate::ast::ColumnId;
use crate::computer::Computer;
use crate::typing::{Unresolved, row_column_type};
use crate::value::Value;
use crate::value_type::{BaseType, ValueType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TableError {
    #[error("Column '{name}' has {got} values, but the table has {expected} rows.")]
    LengthMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("Column '{name}' is {declared}, but row {row} holds a {found} value.")]
    TypeMismatch {
        name: String,
        declared: ValueType,
        row: usize,
        found: ValueType,
    },
    #[error("A column with the name '{0}' already exists.")]
    DuplicateColumn(String),
    #[error("Flow variables of the type '{0}' are not supported.")]
    UnsupportedFlowVariable(ValueType),
}

// ============ Row cursor ============

/// The row computers read. Cloning shares the position.
#[derive(Debug, Clone, Default)]
pub struct RowCursor(Arc<AtomicUsize>);

impl RowCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, row: usize) {
        self.0.store(row, Ordering::Relaxed);
    }
}

// ============ Columns ============

/// A column's type as the host sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Supported(ValueType),
    /// A host type expressions cannot read, by its display name.
    Unsupported(String),
}

#[derive(Debug, Clone)]
pub struct Column {
    ty: ColumnType,
    values: Arc<Vec<Value>>,
}

impl Column {
    pub fn ty(&self) -> &ColumnType {
        &self.ty
    }

    pub fn value_type(&self) -> Option<ValueType> {
        match self.ty {
            ColumnType::Supported(ty) => Some(ty),
            ColumnType::Unsupported(_) => None,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Types a column access against a column of type `column`, if one exists.
///
/// Accesses with a row offset may run past either end of the table, so they
/// are always optional.
pub(crate) fn access_type(
    column: Option<&ColumnType>,
    id: &ColumnId,
) -> Result<ValueType, Unresolved> {
    if let Some(ty) = row_column_type(id) {
        return Ok(ty);
    }
    let (name, offset) = match id {
        ColumnId::Named { name, offset } => (name.as_str(), *offset),
        _ => ("", 0),
    };
    match column {
        Some(ColumnType::Supported(ty)) if offset != 0 => Ok(ty.optional_type()),
        Some(ColumnType::Supported(ty)) => Ok(*ty),
        Some(ColumnType::Unsupported(host)) => Err(Unresolved::UnsupportedType(format!(
            "Columns of the type '{host}' are not supported in expressions."
        ))),
        None => Err(Unresolved::Missing(format!(
            "No column with the name '{name}' is available."
        ))),
    }
}

// ============ Table ============

#[derive(Debug, Clone, Default)]
pub struct Table {
    row_ids: Arc<Vec<String>>,
    columns: IndexMap<String, Column>,
}

impl Table {
    /// An empty table with the given row ids.
    pub fn new(row_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            row_ids: Arc::new(row_ids.into_iter().map(Into::into).collect()),
            columns: IndexMap::new(),
        }
    }

    /// An empty table with `count` rows named `Row0`, `Row1`, ...
    pub fn with_rows(count: usize) -> Self {
        Self::new((0..count).map(|i| format!("Row{i}")))
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        ty: ValueType,
        values: Vec<Value>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        if self.columns.contains_key(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        self.set_column(name, ty, values)?;
        Ok(self)
    }

    /// Adds a column of a host type that expressions cannot read.
    pub fn with_unsupported_column(
        mut self,
        name: impl Into<String>,
        host_type: impl Into<String>,
    ) -> Self {
        let values = vec![Value::Missing; self.row_count()];
        self.columns.insert(
            name.into(),
            Column {
                ty: ColumnType::Unsupported(host_type.into()),
                values: Arc::new(values),
            },
        );
        self
    }

    /// Replaces the column `name` in place, or appends it.
    pub fn set_column(
        &mut self,
        name: impl Into<String>,
        ty: ValueType,
        values: Vec<Value>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if values.len() != self.row_count() {
            return Err(TableError::LengthMismatch {
                name,
                expected: self.row_count(),
                got: values.len(),
            });
        }
        for (row, value) in values.iter().enumerate() {
            let found = value.value_type();
            let fits = match value {
                Value::Missing => ty.is_optional(),
                _ => found.base() == ty.base(),
            };
            if !fits {
                return Err(TableError::TypeMismatch {
                    name,
                    declared: ty,
                    row,
                    found,
                });
            }
        }
        self.columns.insert(
            name,
            Column {
                ty: ColumnType::Supported(ty),
                values: Arc::new(values),
            },
        );
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.row_ids.len()
    }

    pub fn row_id(&self, row: usize) -> Option<&str> {
        self.row_ids.get(row).map(String::as_str)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn value(&self, name: &str, row: usize) -> Option<&Value> {
        self.columns.get(name)?.values.get(row)
    }

    /// The host types of all columns, in order.
    pub fn schema(&self) -> IndexMap<String, ColumnType> {
        self.columns
            .iter()
            .map(|(name, column)| (name.clone(), column.ty.clone()))
            .collect()
    }

    /// Type of a column access, for
    /// [`TypingContext::with_columns`](crate::typing::TypingContext::with_columns).
    pub fn column_type(&self, id: &ColumnId) -> Result<ValueType, Unresolved> {
        let column = id.name().and_then(|name| self.columns.get(name));
        access_type(column.map(|c| &c.ty), id)
    }

    /// A computer reading the access `id` at the row `cursor` points to.
    pub fn computer(&self, id: &ColumnId, cursor: &RowCursor) -> Option<Computer> {
        let cursor = cursor.clone();
        match id {
            ColumnId::RowId => {
                let ids = Arc::clone(&self.row_ids);
                Some(Computer::from_source(BaseType::String, move || {
                    ids.get(cursor.get())
                        .map_or(Value::Missing, |id| Value::String(id.clone()))
                }))
            }
            ColumnId::RowIndex => Some(Computer::from_source(BaseType::Integer, move || {
                Value::Integer(cursor.get() as i64)
            })),
            ColumnId::RowNumber => Some(Computer::from_source(BaseType::Integer, move || {
                Value::Integer(cursor.get() as i64 + 1)
            })),
            ColumnId::Named { name, offset } => {
                let column = self.columns.get(name)?;
                let ty = column.value_type()?;
                let values = Arc::clone(&column.values);
                let offset = *offset;
                Some(Computer::from_source(ty.base(), move || {
                    (cursor.get() as i64)
                        .checked_add(offset)
                        .and_then(|row| usize::try_from(row).ok())
                        .and_then(|row| values.get(row))
                        .cloned()
                        .unwrap_or(Value::Missing)
                }))
            }
        }
    }

    /// The rows whose flag in `keep` is set.
    pub fn filter(&self, keep: &[bool]) -> Table {
        let kept = |i: &usize| keep.get(*i).copied().unwrap_or(false);
        let row_ids = self
            .row_ids
            .iter()
            .enumerate()
            .filter(|(i, _)| kept(i))
            .map(|(_, id)| id.clone())
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| {
                let values = column
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| kept(i))
                    .map(|(_, v)| v.clone())
                    .collect();
                let column = Column {
                    ty: column.ty.clone(),
                    values: Arc::new(values),
                };
                (name.clone(), column)
            })
            .collect();
        Table {
            row_ids: Arc::new(row_ids),
            columns,
        }
    }
}

// ============ Flow variables ============

#[derive(Debug, Clone, PartialEq)]
enum FlowVariable {
    Value(Value),
    Unsupported(String),
}

/// Named scalar values shared by all rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowVariables {
    variables: IndexMap<String, FlowVariable>,
}

impl FlowVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Result<Self, TableError> {
        self.insert(name, value)?;
        Ok(self)
    }

    /// Adds a variable of a host type that expressions cannot read.
    pub fn with_unsupported(
        mut self,
        name: impl Into<String>,
        host_type: impl Into<String>,
    ) -> Self {
        self.variables
            .insert(name.into(), FlowVariable::Unsupported(host_type.into()));
        self
    }

    /// Sets `name`; only BOOLEAN, INTEGER, FLOAT and STRING values are allowed.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> Result<(), TableError> {
        if !matches!(
            value,
            Value::Boolean(_) | Value::Integer(_) | Value::Float(_) | Value::String(_)
        ) {
            return Err(TableError::UnsupportedFlowVariable(value.value_type()));
        }
        self.variables.insert(name.into(), FlowVariable::Value(value));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.variables.get(name)? {
            FlowVariable::Value(value) => Some(value),
            FlowVariable::Unsupported(_) => None,
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Type of `$$name`, for
    /// [`TypingContext::with_flow_variables`](crate::typing::TypingContext::with_flow_variables).
    pub fn type_of(&self, name: &str) -> Result<ValueType, Unresolved> {
        match self.variables.get(name) {
            Some(FlowVariable::Value(value)) => Ok(value.value_type()),
            Some(FlowVariable::Unsupported(host)) => Err(Unresolved::UnsupportedType(format!(
                "Flow variables of the type '{host}' are not supported."
            ))),
            None => Err(Unresolved::Missing(format!(
                "No flow variable with the name '{name}' is available."
            ))),
        }
    }

    pub fn computer(&self, name: &str) -> Option<Computer> {
        self.get(name).cloned().map(Computer::constant)
    }
}

/// Column typing where no rows exist, as for flow-variable expressions.
pub fn no_rows(id: &ColumnId) -> Result<ValueType, Unresolved> {
    Err(Unresolved::Missing(match id {
        ColumnId::Named { .. } => {
            "No row values are available. Use '$$' to access flow variables.".to_string()
        }
        _ => "No rows are available.".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalContext;

    fn table() -> Table {
        Table::with_rows(3)
            .with_column(
                "n",
                ValueType::OPT_INTEGER,
                vec![Value::Integer(1), Value::Missing, Value::Integer(3)],
            )
            .unwrap()
            .with_column(
                "s",
                ValueType::STRING,
                vec!["a".into(), "b".into(), "c".into()],
            )
            .unwrap()
            .with_unsupported_column("bits", "Bit vector")
    }

    #[test]
    fn rejects_malformed_columns() {
        let err = Table::with_rows(2)
            .with_column("x", ValueType::INTEGER, vec![Value::Integer(1)])
            .unwrap_err();
        assert!(matches!(err, TableError::LengthMismatch { expected: 2, got: 1, .. }));

        let err = Table::with_rows(1)
            .with_column("x", ValueType::INTEGER, vec![Value::Missing])
            .unwrap_err();
        assert!(matches!(err, TableError::TypeMismatch { row: 0, .. }));

        let err = table()
            .with_column("n", ValueType::INTEGER, vec![Value::Integer(0); 3])
            .unwrap_err();
        assert_eq!(err, TableError::DuplicateColumn("n".into()));
    }

    #[test]
    fn types_accesses() {
        let t = table();
        assert_eq!(t.column_type(&ColumnId::named("s")), Ok(ValueType::STRING));
        assert_eq!(
            t.column_type(&ColumnId::Named {
                name: "s".into(),
                offset: -1
            }),
            Ok(ValueType::OPT_STRING)
        );
        assert_eq!(t.column_type(&ColumnId::RowNumber), Ok(ValueType::INTEGER));
        assert!(matches!(
            t.column_type(&ColumnId::named("bits")),
            Err(Unresolved::UnsupportedType(m)) if m.contains("'Bit vector'")
        ));
        assert!(matches!(
            t.column_type(&ColumnId::named("zzz")),
            Err(Unresolved::Missing(m)) if m == "No column with the name 'zzz' is available."
        ));
    }

    #[test]
    fn computers_follow_the_cursor() {
        let t = table();
        let cursor = RowCursor::new();
        let ctx = EvalContext::new();
        let n = t.computer(&ColumnId::named("n"), &cursor).unwrap();
        let prev = t
            .computer(
                &ColumnId::Named {
                    name: "s".into(),
                    offset: -1,
                },
                &cursor,
            )
            .unwrap();
        let id = t.computer(&ColumnId::RowId, &cursor).unwrap();
        let number = t.computer(&ColumnId::RowNumber, &cursor).unwrap();

        assert_eq!(n.value(&ctx).unwrap(), Value::Integer(1));
        assert_eq!(prev.value(&ctx).unwrap(), Value::Missing);
        assert_eq!(id.value(&ctx).unwrap(), Value::String("Row0".into()));

        cursor.set(1);
        assert_eq!(n.value(&ctx).unwrap(), Value::Missing);
        assert_eq!(prev.value(&ctx).unwrap(), Value::String("a".into()));
        assert_eq!(number.value(&ctx).unwrap(), Value::Integer(2));

        assert!(t.computer(&ColumnId::named("bits"), &cursor).is_none());
    }

    #[test]
    fn extreme_offsets_read_as_missing() {
        let t = table();
        let cursor = RowCursor::new();
        let ctx = EvalContext::new();
        cursor.set(2);
        for offset in [i64::MAX, i64::MIN] {
            let id = ColumnId::Named {
                name: "s".into(),
                offset,
            };
            let computer = t.computer(&id, &cursor).unwrap();
            assert_eq!(computer.value(&ctx).unwrap(), Value::Missing);
        }
    }

    #[test]
    fn filter_keeps_flagged_rows() {
        let t = table().filter(&[true, false, true]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.row_id(1), Some("Row2"));
        assert_eq!(t.value("s", 1), Some(&Value::String("c".into())));
    }

    #[test]
    fn flow_variables() {
        let vars = FlowVariables::new()
            .with("limit", Value::Integer(10))
            .unwrap()
            .with_unsupported("ids", "INTARRAY");
        assert_eq!(vars.type_of("limit"), Ok(ValueType::INTEGER));
        assert!(matches!(vars.type_of("ids"), Err(Unresolved::UnsupportedType(_))));
        assert!(matches!(vars.type_of("nope"), Err(Unresolved::Missing(_))));
        assert!(vars.computer("ids").is_none());

        let err = FlowVariables::new().with("m", Value::Missing).unwrap_err();
        assert!(matches!(err, TableError::UnsupportedFlowVariable(_)));
    }

    #[test]
    fn no_rows_messages() {
        assert!(matches!(
            no_rows(&ColumnId::named("x")),
            Err(Unresolved::Missing(m)) if m.contains("Use '$$'")
        ));
        assert_eq!(
            no_rows(&ColumnId::RowIndex),
            Err(Unresolved::Missing("No rows are available.".into()))
        );
    }
}
