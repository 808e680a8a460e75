use std::collections::{BTreeMap, BTreeSet};

use super::RowId;
use crate::{
    query::QueryError,
    record::{TableSchema, Value},
};

/// Secondary index over one or more columns, maintained on every write.
///
/// Keys hold the column values in index order; each key maps to the rows
/// that carry it. Unique indexes ignore keys containing `NULL`.
#[derive(Debug, Clone)]
pub(crate) struct Index {
    pub(crate) name: String,
    pub(crate) columns: Vec<usize>,
    pub(crate) unique: bool,
    /// Backs a `PRIMARY KEY` or `UNIQUE` column and cannot be dropped.
    pub(crate) constraint: bool,
    entries: BTreeMap<Vec<Value>, BTreeSet<RowId>>,
}

impl Index {
    /// Build an index over the existing `rows`.
    pub(crate) fn build<'a>(
        name: String,
        columns: Vec<usize>,
        unique: bool,
        constraint: bool,
        schema: &TableSchema,
        rows: impl IntoIterator<Item = (RowId, &'a [Value])>,
    ) -> Result<Self, QueryError> {
        let mut index = Self {
            name,
            columns,
            unique,
            constraint,
            entries: BTreeMap::new(),
        };
        for (id, row) in rows {
            let key = index.key(row);
            if index.conflicts(&key, |_| false) {
                return Err(index.violation(schema, &key));
            }
            index.insert(key, id);
        }
        Ok(index)
    }

    /// Extract this index's key from a stored row.
    pub(crate) fn key(&self, row: &[Value]) -> Vec<Value> {
        self.columns.iter().map(|idx| row[*idx].clone()).collect()
    }

    fn enforced(&self, key: &[Value]) -> bool {
        self.unique && !key.iter().any(Value::is_null)
    }

    /// Whether inserting `key` would break uniqueness. Rows for which
    /// `ignore` returns true are treated as already gone.
    pub(crate) fn conflicts(&self, key: &[Value], ignore: impl Fn(RowId) -> bool) -> bool {
        self.enforced(key)
            && self
                .entries
                .get(key)
                .is_some_and(|ids| ids.iter().any(|id| !ignore(*id)))
    }

    pub(crate) fn violation(&self, schema: &TableSchema, key: &[Value]) -> QueryError {
        let columns = self
            .columns
            .iter()
            .map(|idx| schema.column(*idx).name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let values = key
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        QueryError::constraint(format!(
            "duplicate key ({values}) for ({columns}) violates unique index {}",
            self.name
        ))
    }

    pub(crate) fn insert(&mut self, key: Vec<Value>, id: RowId) {
        self.entries.entry(key).or_default().insert(id);
    }

    pub(crate) fn remove(&mut self, key: &[Value], id: RowId) {
        if let Some(ids) = self.entries.get_mut(key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.entries.remove(key);
            }
        }
    }

    /// Rows whose key equals `key`.
    pub(crate) fn lookup(&self, key: &[Value]) -> Option<&BTreeSet<RowId>> {
        self.entries.get(key)
    }

    /// Number of distinct keys.
    pub(crate) fn cardinality(&self) -> usize {
        self.entries.len()
    }
}
