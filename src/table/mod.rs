//! Row storage for a single table.
//!
//! Rows live in a `BTreeMap` keyed by a monotonically increasing [`RowId`],
//! so an unordered scan returns rows in insertion order. Every index is kept
//! in step with the rows on each write. Writes validate the whole statement
//! before touching storage: a statement either applies to every target row
//! or to none of them.

mod index;

use std::collections::{BTreeMap, BTreeSet};

pub(crate) use index::Index;

use crate::{
    query::{
        ast::{BinaryOp, ColumnDef, Expression},
        expression::{eval_constant, resolve, ResolvedExpr},
        QueryError,
    },
    record::{Column, TableSchema, Value},
};

pub(crate) type RowId = u64;

/// Smallest magnitude at which distinct integers share one `f64`.
const EXACT_FLOAT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// How the rows matching a filter are located.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AccessPath {
    /// Visit every row.
    Scan,
    /// Visit the rows stored under `key` in `indexes[index]`. `exact` is set
    /// when the filter consists only of the equalities forming `key`.
    Lookup {
        index: usize,
        key: Vec<Value>,
        exact: bool,
    },
}

#[derive(Debug)]
pub(crate) struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowId, Vec<Value>>,
    indexes: Vec<Index>,
    next_row_id: RowId,
}

impl Table {
    /// Create an empty table from `CREATE TABLE` column definitions.
    pub(crate) fn create(name: &str, defs: &[ColumnDef]) -> Result<Self, QueryError> {
        let mut columns: Vec<Column> = Vec::with_capacity(defs.len());
        for def in defs {
            if columns.iter().any(|column| column.name == def.name) {
                return Err(QueryError::semantic(format!(
                    "column {} specified more than once in table {name}",
                    def.name
                )));
            }
            let default = match &def.default {
                None => Value::Null,
                Some(expr) => {
                    let value = eval_constant(expr)?;
                    let found = value.data_type();
                    value.coerce(def.data_type).ok_or_else(|| {
                        QueryError::semantic(format!(
                            "default for column {} must be {}, found {}",
                            def.name,
                            def.data_type,
                            found.map_or("NULL".to_string(), |t| t.to_string())
                        ))
                    })?
                }
            };
            columns.push(Column {
                name: def.name.clone(),
                data_type: def.data_type,
                nullable: !def.not_null && !def.primary_key,
                primary_key: def.primary_key,
                unique: def.unique,
                default,
            });
        }

        let schema = TableSchema::new(name, columns);
        let mut table = Self {
            schema,
            rows: BTreeMap::new(),
            indexes: Vec::new(),
            next_row_id: 0,
        };

        let primary_key = table
            .schema
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, column)| column.primary_key)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        if !primary_key.is_empty() {
            table.push_index(format!("{name}_pkey"), primary_key.clone(), true, true)?;
        }
        for idx in 0..table.schema.columns().len() {
            let column = table.schema.column(idx);
            if column.unique && primary_key != [idx] {
                let index_name = format!("{name}_{}_key", column.name);
                table.push_index(index_name, vec![idx], true, true)?;
            }
        }
        Ok(table)
    }

    pub(crate) fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn row(&self, id: RowId) -> Option<&[Value]> {
        self.rows.get(&id).map(Vec::as_slice)
    }

    pub(crate) fn indexes(&self) -> &[Index] {
        &self.indexes
    }

    fn push_index(
        &mut self,
        name: String,
        columns: Vec<usize>,
        unique: bool,
        constraint: bool,
    ) -> Result<(), QueryError> {
        let rows = self.rows.iter().map(|(id, row)| (*id, row.as_slice()));
        let index = Index::build(name, columns, unique, constraint, &self.schema, rows)?;
        self.indexes.push(index);
        Ok(())
    }

    /// Add a secondary index over `columns`, indexing existing rows.
    pub(crate) fn create_index(
        &mut self,
        name: String,
        columns: &[String],
        unique: bool,
    ) -> Result<(), QueryError> {
        let positions = self.positions(columns)?;
        self.push_index(name, positions, unique, false)
    }

    /// Remove the index called `name`. Constraint indexes cannot be dropped.
    pub(crate) fn drop_index(&mut self, name: &str) -> Result<(), QueryError> {
        let Some(pos) = self.indexes.iter().position(|index| index.name == name) else {
            return Err(QueryError::semantic(format!("index {name} does not exist")));
        };
        if self.indexes[pos].constraint {
            return Err(QueryError::constraint(format!(
                "index {name} enforces a table constraint and cannot be dropped"
            )));
        }
        self.indexes.remove(pos);
        Ok(())
    }

    /// Resolve column names to positions, rejecting unknown and repeated
    /// names.
    fn positions(&self, names: &[String]) -> Result<Vec<usize>, QueryError> {
        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            let pos = self.schema.position(name).ok_or_else(|| {
                QueryError::semantic(format!(
                    "unknown column {name} in table {}",
                    self.schema.name()
                ))
            })?;
            if positions.contains(&pos) {
                return Err(QueryError::semantic(format!(
                    "column {name} specified more than once"
                )));
            }
            positions.push(pos);
        }
        Ok(positions)
    }

    /// Coerce `value` for storage in column `idx`, enforcing `NOT NULL`.
    /// Values that do not convert to the column type violate the schema.
    fn store_value(&self, idx: usize, value: Value) -> Result<Value, QueryError> {
        let column = self.schema.column(idx);
        if value.is_null() {
            if !column.nullable {
                return Err(QueryError::constraint(format!(
                    "null value in column {} of table {} violates not-null constraint",
                    column.name,
                    self.schema.name()
                )));
            }
            return Ok(Value::Null);
        }
        let found = value.data_type();
        value.coerce(column.data_type).ok_or_else(|| {
            QueryError::constraint(format!(
                "column {} is {}, found {}",
                column.name,
                column.data_type,
                found.map_or("NULL".to_string(), |t| t.to_string())
            ))
        })
    }

    /// Check unique indexes for `new_rows`, ignoring the keys currently held
    /// by `replaced`.
    fn check_unique(
        &self,
        new_rows: &[Vec<Value>],
        replaced: &BTreeSet<RowId>,
    ) -> Result<(), QueryError> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let mut batch = BTreeSet::new();
            for row in new_rows {
                let key = index.key(row);
                let has_null = key.iter().any(Value::is_null);
                if index.conflicts(&key, |id| replaced.contains(&id))
                    || (!has_null && !batch.insert(key.clone()))
                {
                    return Err(index.violation(&self.schema, &key));
                }
            }
        }
        Ok(())
    }

    fn store_row(&mut self, id: RowId, row: Vec<Value>) {
        for index in &mut self.indexes {
            let key = index.key(&row);
            index.insert(key, id);
        }
        self.rows.insert(id, row);
    }

    fn remove_row(&mut self, id: RowId) -> Option<Vec<Value>> {
        let row = self.rows.remove(&id)?;
        for index in &mut self.indexes {
            let key = index.key(&row);
            index.remove(&key, id);
        }
        Some(row)
    }

    /// `INSERT INTO`: returns the number of rows added.
    pub(crate) fn insert(
        &mut self,
        columns: Option<&[String]>,
        values: &[Vec<Expression>],
    ) -> Result<u64, QueryError> {
        let targets = match columns {
            Some(names) => self.positions(names)?,
            None => (0..self.schema.columns().len()).collect(),
        };

        let mut new_rows = Vec::with_capacity(values.len());
        for exprs in values {
            if exprs.len() != targets.len() {
                return Err(QueryError::semantic(format!(
                    "INSERT has {} values for {} columns",
                    exprs.len(),
                    targets.len()
                )));
            }
            let mut row = self
                .schema
                .columns()
                .iter()
                .map(|column| column.default.clone())
                .collect::<Vec<_>>();
            for (pos, expr) in targets.iter().zip(exprs) {
                row[*pos] = eval_constant(expr)?;
            }
            let row = row
                .into_iter()
                .enumerate()
                .map(|(idx, value)| self.store_value(idx, value))
                .collect::<Result<Vec<_>, _>>()?;
            new_rows.push(row);
        }
        self.check_unique(&new_rows, &BTreeSet::new())?;

        let inserted = new_rows.len() as u64;
        for row in new_rows {
            let id = self.next_row_id;
            self.next_row_id += 1;
            self.store_row(id, row);
        }
        Ok(inserted)
    }

    /// `UPDATE`: returns the number of rows matched by `filter`.
    pub(crate) fn update(
        &mut self,
        set: &[(String, Expression)],
        filter: Option<&Expression>,
    ) -> Result<u64, QueryError> {
        let names = set.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
        let positions = self.positions(&names)?;
        let assignments = positions
            .into_iter()
            .zip(set)
            .map(|(pos, (_, expr))| Ok((pos, resolve(expr, Some(&self.schema))?)))
            .collect::<Result<Vec<(usize, ResolvedExpr)>, QueryError>>()?;

        let ids = self.matching(filter)?;
        let mut new_rows = Vec::with_capacity(ids.len());
        for id in &ids {
            let old = &self.rows[id];
            let mut row = old.clone();
            for (pos, expr) in &assignments {
                let value = expr.eval(old)?;
                row[*pos] = self.store_value(*pos, value)?;
            }
            new_rows.push(row);
        }
        let replaced = ids.iter().copied().collect::<BTreeSet<_>>();
        self.check_unique(&new_rows, &replaced)?;

        for (id, row) in ids.iter().zip(new_rows) {
            self.remove_row(*id);
            self.store_row(*id, row);
        }
        Ok(ids.len() as u64)
    }

    /// `DELETE`: returns the number of rows removed.
    pub(crate) fn delete(&mut self, filter: Option<&Expression>) -> Result<u64, QueryError> {
        let ids = self.matching(filter)?;
        for id in &ids {
            self.remove_row(*id);
        }
        Ok(ids.len() as u64)
    }

    /// Pick an index lookup for the `column = constant` terms of `filter`.
    ///
    /// The index covering the most equality columns wins; ties go to the
    /// index created first.
    pub(crate) fn plan(&self, filter: Option<&Expression>) -> AccessPath {
        let Some(filter) = filter else {
            return AccessPath::Scan;
        };
        let conjuncts = filter.conjuncts();
        let mut equalities: BTreeMap<usize, Value> = BTreeMap::new();
        let mut only_equalities = true;
        for term in &conjuncts {
            match self.equality(term) {
                Some((pos, value)) if !equalities.contains_key(&pos) => {
                    equalities.insert(pos, value);
                }
                _ => only_equalities = false,
            }
        }

        let mut best: Option<(usize, &Index)> = None;
        for (idx, index) in self.indexes.iter().enumerate() {
            if !index.columns.iter().all(|col| equalities.contains_key(col)) {
                continue;
            }
            if best.map_or(true, |(_, b)| index.columns.len() > b.columns.len()) {
                best = Some((idx, index));
            }
        }
        match best {
            None => AccessPath::Scan,
            Some((idx, index)) => AccessPath::Lookup {
                index: idx,
                key: index.columns.iter().map(|col| equalities[col].clone()).collect(),
                exact: only_equalities && index.columns.len() == equalities.len(),
            },
        }
    }

    /// Recognise `column = constant` (either side), with the constant coerced
    /// to the column's type. `NULL` and uncoercible constants never match.
    ///
    /// The coerced constant is only used as an index key when exactly the
    /// rows stored under it compare equal to the original constant. Floats at
    /// or beyond 2^53 equal several integers and NaN equals nothing, so those
    /// terms fall back to a scan.
    fn equality(&self, term: &Expression) -> Option<(usize, Value)> {
        let Expression::Binary(BinaryOp::Equal, lhs, rhs) = term else {
            return None;
        };
        let (name, constant) = match (lhs.as_ref(), rhs.as_ref()) {
            (Expression::Column(name), other) | (other, Expression::Column(name)) => {
                (name, other)
            }
            _ => return None,
        };
        let pos = self.schema.position(name)?;
        let value = eval_constant(constant).ok()?;
        if value.is_null() {
            return None;
        }
        let key = value.clone().coerce(self.schema.column(pos).data_type)?;
        match (&value, &key) {
            (Value::Float(f), Value::Integer(_)) if f.abs() >= EXACT_FLOAT_INTEGER => None,
            (_, Value::Float(f)) if f.is_nan() => None,
            _ => Some((pos, key)),
        }
    }

    /// Ids of the rows satisfying `filter`, in insertion order.
    pub(crate) fn matching(&self, filter: Option<&Expression>) -> Result<Vec<RowId>, QueryError> {
        let Some(expr) = filter else {
            return Ok(self.rows.keys().copied().collect());
        };
        let predicate = resolve(expr, Some(&self.schema))?;
        let mut ids = Vec::new();
        match self.plan(filter) {
            AccessPath::Scan => {
                for (id, row) in &self.rows {
                    if predicate.matches(row)? {
                        ids.push(*id);
                    }
                }
            }
            AccessPath::Lookup { index, key, .. } => {
                let candidates = self.indexes[index].lookup(&key).into_iter().flatten();
                for id in candidates {
                    if predicate.matches(&self.rows[id])? {
                        ids.push(*id);
                    }
                }
            }
        }
        Ok(ids)
    }

    /// Number of rows satisfying `filter`.
    pub(crate) fn count(&self, filter: Option<&Expression>) -> Result<u64, QueryError> {
        let Some(expr) = filter else {
            return Ok(self.rows.len() as u64);
        };
        if let AccessPath::Lookup {
            index,
            key,
            exact: true,
        } = self.plan(filter)
        {
            // Binding still reports unknown columns and type errors.
            resolve(expr, Some(&self.schema))?;
            return Ok(self.indexes[index].lookup(&key).map_or(0, |ids| ids.len()) as u64);
        }
        Ok(self.matching(filter)?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessPath, Table};
    use crate::{
        query::{
            ast::{Expression, Statement},
            parser::Parser,
            QueryError,
        },
        record::Value,
    };

    fn create(sql: &str) -> Table {
        let Statement::CreateTable { name, columns, .. } =
            Parser::parse(sql).unwrap().remove(0).statement
        else {
            panic!("expected CREATE TABLE");
        };
        Table::create(&name, &columns).unwrap()
    }

    fn insert(table: &mut Table, sql: &str) -> Result<u64, QueryError> {
        let Statement::Insert {
            columns, values, ..
        } = Parser::parse(sql).unwrap().remove(0).statement
        else {
            panic!("expected INSERT");
        };
        table.insert(columns.as_deref(), &values)
    }

    fn filter(text: &str) -> Expression {
        Parser::parse_expression_text(text).unwrap()
    }

    fn users() -> Table {
        let mut table = create(
            "CREATE TABLE users (id INT PRIMARY KEY, email TEXT UNIQUE, age INT NOT NULL \
             DEFAULT 0, score FLOAT)",
        );
        insert(
            &mut table,
            "INSERT INTO users VALUES (1, 'a@x', 30, 1.5), (2, 'b@x', 40, NULL), (3, NULL, 30, 2)",
        )
        .unwrap();
        table
    }

    #[test]
    fn create_builds_constraint_indexes() {
        let table = users();
        let names = table
            .indexes()
            .iter()
            .map(|index| index.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["users_pkey", "users_email_key"]);
        assert!(!table.schema().column(0).nullable);
        assert_eq!(table.schema().column(2).default, Value::Integer(0));
        assert_eq!(table.row(2).unwrap()[3], Value::Float(2.0));
    }

    #[test]
    fn insert_is_all_or_nothing() {
        let mut table = users();
        let err = insert(&mut table, "INSERT INTO users (id, age) VALUES (4, 1), (1, 2)");
        assert!(matches!(err, Err(QueryError::Constraint(_))));
        assert_eq!(table.len(), 3);

        let err = insert(&mut table, "INSERT INTO users (id, age) VALUES (5, 1), (5, 2)");
        assert!(matches!(err, Err(QueryError::Constraint(_))));
        let err = insert(&mut table, "INSERT INTO users (id, age) VALUES (6, NULL)");
        assert!(matches!(err, Err(QueryError::Constraint(_))));
        let err = insert(&mut table, "INSERT INTO users (id, age) VALUES ('x', 1)");
        assert!(matches!(err, Err(QueryError::Constraint(_))));
        let err = insert(&mut table, "INSERT INTO users (nope) VALUES (1)");
        assert!(matches!(err, Err(QueryError::Semantic(_))));
        assert_eq!(table.len(), 3);

        assert_eq!(insert(&mut table, "INSERT INTO users (id) VALUES (4)"), Ok(1));
        assert_eq!(table.count(Some(&filter("age = 0"))), Ok(1));
    }

    #[test]
    fn update_checks_uniqueness_against_final_state() {
        let mut table = users();
        // Shifting every key is fine even though intermediate states collide.
        assert_eq!(table.update(&[("id".into(), filter("id + 1"))], None), Ok(3));
        assert_eq!(table.count(Some(&filter("id = 1"))), Ok(0));
        assert_eq!(table.count(Some(&filter("id = 4"))), Ok(1));

        let err = table.update(&[("id".into(), filter("2"))], Some(&filter("age = 30")));
        assert!(matches!(err, Err(QueryError::Constraint(_))));
        assert_eq!(table.count(Some(&filter("id = 2"))), Ok(1));

        let err = table.update(&[("age".into(), filter("NULL"))], Some(&filter("id = 2")));
        assert!(matches!(err, Err(QueryError::Constraint(_))));
    }

    #[test]
    fn delete_maintains_indexes() {
        let mut table = users();
        assert_eq!(table.delete(Some(&filter("age = 30"))), Ok(2));
        assert_eq!(table.len(), 1);
        assert_eq!(insert(&mut table, "INSERT INTO users VALUES (1, 'a@x', 1, 0)"), Ok(1));
        assert_eq!(table.delete(None), Ok(2));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn planner_prefers_widest_covering_index() {
        let mut table = users();
        table
            .create_index("users_age_score".into(), &["age".into(), "score".into()], false)
            .unwrap();
        table
            .create_index("users_age".into(), &["age".into()], false)
            .unwrap();

        assert_eq!(
            table.plan(Some(&filter("30 = age"))),
            AccessPath::Lookup {
                index: 3,
                key: vec![Value::Integer(30)],
                exact: true
            }
        );
        assert_eq!(
            table.plan(Some(&filter("age = 30 AND score = 1"))),
            AccessPath::Lookup {
                index: 2,
                key: vec![Value::Integer(30), Value::Float(1.0)],
                exact: true
            }
        );
        assert!(matches!(
            table.plan(Some(&filter("age = 30 AND email LIKE 'a%'"))),
            AccessPath::Lookup { exact: false, .. }
        ));
        assert_eq!(table.plan(Some(&filter("age = NULL"))), AccessPath::Scan);
        assert_eq!(table.plan(Some(&filter("age > 1"))), AccessPath::Scan);
        assert_eq!(table.plan(Some(&filter("age = 1 OR id = 2"))), AccessPath::Scan);
    }

    #[test]
    fn count_agrees_with_matching() {
        let table = users();
        for text in [
            "id = 2",
            "age = 30",
            "age = 30 AND id = 3",
            "age = 30 AND id = 2",
            "email = 'a@x'",
            "email IS NULL",
            "score > 1",
            "age = 30.0",
        ] {
            let expr = filter(text);
            assert_eq!(
                table.count(Some(&expr)).unwrap(),
                table.matching(Some(&expr)).unwrap().len() as u64,
                "{text}"
            );
        }
    }

    #[test]
    fn inexact_float_constants_scan() {
        let mut table = create("CREATE TABLE t (a INT PRIMARY KEY, b INT)");
        insert(
            &mut table,
            "INSERT INTO t VALUES (9007199254740993, 9007199254740993), (7, 7)",
        )
        .unwrap();

        for text in ["a = 9007199254740993.0", "9007199254740992.0 = a"] {
            let expr = filter(text);
            assert_eq!(table.plan(Some(&expr)), AccessPath::Scan, "{text}");
            assert_eq!(table.count(Some(&expr)), Ok(1), "{text}");
            assert_eq!(
                table.count(Some(&expr)),
                table.count(Some(&filter(&text.replace('a', "b")))),
                "{text}"
            );
        }
        assert_eq!(
            table.plan(Some(&filter("a = 7.0"))),
            AccessPath::Lookup {
                index: 0,
                key: vec![Value::Integer(7)],
                exact: true
            }
        );
        assert_eq!(table.count(Some(&filter("a = 7.5"))), Ok(0));
    }

    #[test]
    fn unknown_columns_fail_on_empty_tables() {
        let table = create("CREATE TABLE t (id INT PRIMARY KEY)");
        assert!(matches!(
            table.count(Some(&filter("missing = 1"))),
            Err(QueryError::Semantic(_))
        ));
        assert!(matches!(
            table.count(Some(&filter("id = 1 AND missing = 1"))),
            Err(QueryError::Semantic(_))
        ));
    }

    #[test]
    fn constraint_indexes_cannot_be_dropped() {
        let mut table = users();
        assert!(matches!(
            table.drop_index("users_pkey"),
            Err(QueryError::Constraint(_))
        ));
        table
            .create_index("users_age".into(), &["age".into()], false)
            .unwrap();
        assert!(table.drop_index("users_age").is_ok());
        assert!(matches!(
            table.create_index("dup".into(), &["age".into()], true),
            Err(QueryError::Constraint(_))
        ));
    }
}
