use super::{DataType, Value};

/// Description of a single table column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name (identifiers are case-folded unless quoted).
    pub name: String,
    /// Declared type.
    pub data_type: DataType,
    /// Whether `NULL` is accepted.
    pub nullable: bool,
    /// Whether this column is the table's primary key.
    pub primary_key: bool,
    /// Whether values must be unique across rows.
    pub unique: bool,
    /// Value used when an insert omits the column.
    pub default: Value,
}

impl Column {
    /// A nullable column without constraints.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
            default: Value::Null,
        }
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: Vec<Column>,
}

impl TableSchema {
    pub(crate) fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Position of `name` in the column list.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    /// Column at `index`.
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }
}
