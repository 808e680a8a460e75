use std::sync::Arc;

use serde::{ser::SerializeMap, Serialize, Serializer};

use super::Value;

/// A result row: values keyed by output column name, in projection order.
///
/// Rows of one result set share their column list.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Value of the column named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|idx| &self.values[idx])
    }

    /// Output column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Consume the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Row;
    use crate::record::Value;

    #[test]
    fn serializes_in_column_order() {
        let columns: Arc<[String]> = vec!["id".to_string(), "v".to_string()].into();
        let row = Row::new(columns, vec![Value::Integer(1), Value::from("a")]);

        assert_eq!(row.get("v"), Some(&Value::from("a")));
        assert_eq!(row.get("missing"), None);
        assert_eq!(
            serde_json::to_string(&row).unwrap(),
            r#"{"id":1,"v":"a"}"#
        );
    }
}
