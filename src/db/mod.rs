//! One named database: a catalog of tables and the statement executor.
//!
//! Locking: DDL takes the catalog write lock (and the table lock it
//! touches). DML holds the catalog read lock and the table write lock until
//! the statement has been handed to `on_applied`, so hooks observe mutations
//! in commit order. Reads take the catalog read lock only long enough to
//! clone the table handle. Locks are always taken catalog first, table
//! second.

mod error;

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::Duration,
};

pub use error::TdbError;

use crate::{
    id::StatementId,
    mutation::MutationResult,
    observability::log_debug,
    privacy::PrivacyGate,
    query::{
        ast::Statement,
        parser::{Parsed, Parser},
        select, QueryError, QueryResult,
    },
    record::Row,
    scheduler::{AsyncTicket, Scheduler},
    table::Table,
};

/// Identity of a database inside a node: cluster id and database name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatabaseKey {
    pub(crate) cluster: String,
    pub(crate) database: String,
}

impl DatabaseKey {
    pub fn new(cluster: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            database: database.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.database)
    }
}

type TableRef = Arc<RwLock<Table>>;

#[derive(Default)]
struct Catalog {
    tables: BTreeMap<String, TableRef>,
    /// Index name to owning table name.
    indexes: BTreeMap<String, String>,
}

fn read(table: &RwLock<Table>) -> RwLockReadGuard<'_, Table> {
    table.read().expect("table lock should not be poisoned")
}

fn write(table: &RwLock<Table>) -> RwLockWriteGuard<'_, Table> {
    table.write().expect("table lock should not be poisoned")
}

/// Fold an identifier passed outside query text the way the lexer does:
/// `"quoted"` keeps its case, anything else is lower-cased.
fn identifier(name: &str) -> String {
    let name = name.trim();
    match name
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => name.to_lowercase(),
    }
}

pub(crate) struct Database {
    key: DatabaseKey,
    catalog: RwLock<Catalog>,
    /// Checks replicated statements arriving for this database.
    inbound_gate: Arc<PrivacyGate>,
    scheduler: Mutex<Option<Scheduler>>,
    destroyed: AtomicBool,
}

impl Database {
    pub(crate) fn new(key: DatabaseKey, inbound_gate: Arc<PrivacyGate>) -> Self {
        Self {
            key,
            catalog: RwLock::new(Catalog::default()),
            inbound_gate,
            scheduler: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> &DatabaseKey {
        &self.key
    }

    pub(crate) fn inbound_gate(&self) -> &PrivacyGate {
        &self.inbound_gate
    }

    pub(crate) fn table_count(&self) -> usize {
        self.catalog_read().tables.len()
    }

    fn catalog_read(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog
            .read()
            .expect("catalog lock should not be poisoned")
    }

    fn catalog_write(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog
            .write()
            .expect("catalog lock should not be poisoned")
    }

    pub(crate) fn attach_scheduler(&self, scheduler: Scheduler) {
        *self
            .scheduler
            .lock()
            .expect("scheduler slot mutex should not be poisoned") = Some(scheduler);
    }

    /// Queue `query` on this database's scheduling loop.
    pub(crate) fn submit(
        &self,
        id: StatementId,
        query: String,
        publish: bool,
        gate: Arc<PrivacyGate>,
        delay: Duration,
    ) -> Result<AsyncTicket, TdbError> {
        let slot = self
            .scheduler
            .lock()
            .expect("scheduler slot mutex should not be poisoned");
        match slot.as_ref() {
            Some(scheduler) => scheduler.submit(id, query, publish, gate, delay),
            None => Err(TdbError::NotOpen),
        }
    }

    /// Mark the database destroyed and stop its scheduling loop; statements
    /// still waiting are discarded.
    pub(crate) fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.scheduler
            .lock()
            .expect("scheduler slot mutex should not be poisoned")
            .take();
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn table(&self, name: &str) -> QueryResult<TableRef> {
        self.catalog_read()
            .tables
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::semantic(format!("table {name} does not exist")))
    }

    /// Parse and run `query`. `on_applied` sees the source text of every
    /// mutating statement once it commits, before its locks are released.
    /// Statements before a failing one stay applied.
    pub(crate) fn execute_with(
        &self,
        query: &str,
        on_applied: impl FnMut(&str),
    ) -> QueryResult<MutationResult> {
        let statements = Parser::parse(query)?;
        if statements.is_empty() {
            return Err(QueryError::syntax("empty query"));
        }
        self.run(statements, on_applied)
    }

    /// Run an init query; empty text is allowed.
    pub(crate) fn initialize(&self, init_query: &str) -> QueryResult<MutationResult> {
        self.run(Parser::parse(init_query)?, |_| {})
    }

    /// Run an index query: only `CREATE INDEX` statements are accepted.
    pub(crate) fn build_indexes(&self, index_query: &str) -> QueryResult<()> {
        let statements = Parser::parse(index_query)?;
        if let Some(other) = statements
            .iter()
            .find(|parsed| !matches!(parsed.statement, Statement::CreateIndex { .. }))
        {
            return Err(QueryError::semantic(format!(
                "index query may only contain CREATE INDEX statements, found: {}",
                other.text
            )));
        }
        self.run(statements, |_| {})?;
        Ok(())
    }

    fn run(
        &self,
        statements: Vec<Parsed>,
        mut on_applied: impl FnMut(&str),
    ) -> QueryResult<MutationResult> {
        statements
            .iter()
            .map(|parsed| self.apply(parsed, &mut on_applied))
            .sum()
    }

    /// Run a single `SELECT`.
    pub(crate) fn select(&self, query: &str) -> QueryResult<Vec<Row>> {
        let mut statements = Parser::parse(query)?;
        if statements.len() > 1 {
            return Err(QueryError::semantic(
                "select expects exactly one statement",
            ));
        }
        let Some(parsed) = statements.pop() else {
            return Err(QueryError::syntax("empty query"));
        };
        let Statement::Select(query) = parsed.statement else {
            return Err(QueryError::semantic(format!(
                "select expects a SELECT statement, found: {}",
                parsed.text
            )));
        };
        let table = self.table(&query.from)?;
        let table = read(&table);
        select::execute(&query, &table)
    }

    /// Count rows of `table` matching `where_clause`; blank counts all rows.
    pub(crate) fn count(&self, table: &str, where_clause: &str) -> QueryResult<u64> {
        let filter = if where_clause.trim().is_empty() {
            None
        } else {
            Some(Parser::parse_expression_text(where_clause)?)
        };
        let table = self.table(&identifier(table))?;
        let table = read(&table);
        table.count(filter.as_ref())
    }

    /// Apply one statement. Mutations are reported to `on_applied` while the
    /// locks guarding the change are still held.
    fn apply(
        &self,
        parsed: &Parsed,
        on_applied: &mut impl FnMut(&str),
    ) -> QueryResult<MutationResult> {
        let text = parsed.text.as_str();
        let rows_affected = match &parsed.statement {
            Statement::CreateTable {
                name,
                columns,
                if_not_exists,
            } => {
                let mut catalog = self.catalog_write();
                if catalog.tables.contains_key(name) {
                    if *if_not_exists {
                        on_applied(text);
                        return Ok(MutationResult::default());
                    }
                    return Err(QueryError::semantic(format!("table {name} already exists")));
                }
                let table = Table::create(name, columns)?;
                for index in table.indexes() {
                    if catalog.indexes.contains_key(&index.name) {
                        return Err(QueryError::semantic(format!(
                            "index {} already exists",
                            index.name
                        )));
                    }
                }
                for index in table.indexes() {
                    catalog.indexes.insert(index.name.clone(), name.clone());
                }
                catalog
                    .tables
                    .insert(name.clone(), Arc::new(RwLock::new(table)));
                on_applied(text);
                0
            }
            Statement::DropTable { name, if_exists } => {
                let mut catalog = self.catalog_write();
                if catalog.tables.remove(name).is_none() {
                    if *if_exists {
                        on_applied(text);
                        return Ok(MutationResult::default());
                    }
                    return Err(QueryError::semantic(format!("table {name} does not exist")));
                }
                catalog.indexes.retain(|_, table| table != name);
                on_applied(text);
                0
            }
            Statement::CreateIndex {
                name,
                table,
                columns,
                unique,
                if_not_exists,
            } => {
                let name = name
                    .clone()
                    .unwrap_or_else(|| format!("{table}_{}_idx", columns.join("_")));
                let mut catalog = self.catalog_write();
                if catalog.indexes.contains_key(&name) {
                    if *if_not_exists {
                        on_applied(text);
                        return Ok(MutationResult::default());
                    }
                    return Err(QueryError::semantic(format!("index {name} already exists")));
                }
                let table_ref = catalog.tables.get(table).cloned().ok_or_else(|| {
                    QueryError::semantic(format!("table {table} does not exist"))
                })?;
                let mut table_guard = write(&table_ref);
                table_guard.create_index(name.clone(), columns, *unique)?;
                log_debug!(
                    component = "db",
                    event = "index_created",
                    database = %self.key,
                    index = %name,
                    rows = table_guard.len(),
                    keys = table_guard.indexes().last().map_or(0, |index| index.cardinality()),
                );
                drop(table_guard);
                catalog.indexes.insert(name, table.clone());
                on_applied(text);
                0
            }
            Statement::DropIndex { name, if_exists } => {
                let mut catalog = self.catalog_write();
                let Some(table) = catalog.indexes.get(name).cloned() else {
                    if *if_exists {
                        on_applied(text);
                        return Ok(MutationResult::default());
                    }
                    return Err(QueryError::semantic(format!("index {name} does not exist")));
                };
                if let Some(table_ref) = catalog.tables.get(&table) {
                    write(table_ref).drop_index(name)?;
                }
                catalog.indexes.remove(name);
                on_applied(text);
                0
            }
            Statement::Insert {
                table,
                columns,
                values,
            } => self.mutate(table, text, on_applied, |table| {
                table.insert(columns.as_deref(), values)
            })?,
            Statement::Update { table, set, filter } => {
                self.mutate(table, text, on_applied, |table| {
                    table.update(set, filter.as_ref())
                })?
            }
            Statement::Delete { table, filter } => {
                self.mutate(table, text, on_applied, |table| {
                    table.delete(filter.as_ref())
                })?
            }
            Statement::Select(query) => {
                let table = self.table(&query.from)?;
                select::execute(query, &read(&table))?;
                0
            }
        };
        Ok(MutationResult { rows_affected })
    }

    /// Run `change` on `name` under the catalog read lock and the table write
    /// lock, reporting `text` before either is released.
    fn mutate(
        &self,
        name: &str,
        text: &str,
        on_applied: &mut impl FnMut(&str),
        change: impl FnOnce(&mut Table) -> QueryResult<u64>,
    ) -> QueryResult<u64> {
        let catalog = self.catalog_read();
        let table = catalog
            .tables
            .get(name)
            .ok_or_else(|| QueryError::semantic(format!("table {name} does not exist")))?;
        let mut table = write(table.as_ref());
        let rows_affected = change(&mut *table)?;
        on_applied(text);
        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{identifier, Database, DatabaseKey};
    use crate::{
        privacy::{PrivacyConfig, PrivacyGate},
        query::QueryError,
        record::Value,
    };

    fn database() -> Database {
        let gate = Arc::new(PrivacyGate::new(&PrivacyConfig::default()).unwrap());
        let db = Database::new(DatabaseKey::new("c1", "orders"), gate);
        db.initialize(
            "CREATE TABLE t (id INT PRIMARY KEY, v TEXT);
             -- seed rows
             INSERT INTO t VALUES (1, 'a'), (2, 'b');",
        )
        .unwrap();
        db
    }

    #[test]
    fn execute_reports_applied_mutations() {
        let db = database();
        let mut applied = Vec::new();
        let result = db
            .execute_with(
                "INSERT INTO t VALUES (3, 'c'); SELECT * FROM t; UPDATE t SET v = 'z' WHERE id < 3",
                |text| applied.push(text.to_string()),
            )
            .unwrap();
        assert_eq!(result.rows_affected, 3);
        assert_eq!(
            applied,
            [
                "INSERT INTO t VALUES (3, 'c')",
                "UPDATE t SET v = 'z' WHERE id < 3"
            ]
        );
    }

    #[test]
    fn failing_statement_keeps_earlier_ones() {
        let db = database();
        let mut applied = Vec::new();
        let err = db
            .execute_with(
                "INSERT INTO t VALUES (3, 'c'); INSERT INTO t VALUES (1, 'dup')",
                |text| applied.push(text.to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, QueryError::Constraint(_)));
        assert_eq!(applied.len(), 1);
        assert_eq!(db.count("t", "").unwrap(), 3);
    }

    #[test]
    fn mutations_are_reported_before_locks_release() {
        let db = database();
        let mut locked = Vec::new();
        db.execute_with(
            "INSERT INTO t VALUES (3, 'c');
             CREATE TABLE u (id INT);
             UPDATE t SET v = 'z' WHERE id = 3;
             CREATE INDEX u_id ON u (id);
             DELETE FROM t WHERE id = 1",
            |text| locked.push((text.to_string(), db.catalog.try_write().is_err())),
        )
        .unwrap();
        assert_eq!(locked.len(), 5);
        assert!(locked.iter().all(|(_, held)| *held), "{locked:?}");
        assert!(db.catalog.try_write().is_ok());
    }

    #[test]
    fn ddl_maintains_catalog() {
        let db = database();
        db.execute_with("CREATE INDEX ON t (v)", |_| {}).unwrap();
        assert!(matches!(
            db.execute_with("CREATE INDEX t_v_idx ON t (v)", |_| {}),
            Err(QueryError::Semantic(_))
        ));
        db.execute_with("CREATE INDEX IF NOT EXISTS t_v_idx ON t (v)", |_| {})
            .unwrap();
        assert!(matches!(
            db.execute_with("DROP INDEX t_pkey", |_| {}),
            Err(QueryError::Constraint(_))
        ));
        db.execute_with("DROP INDEX t_v_idx; DROP TABLE t", |_| {})
            .unwrap();
        assert_eq!(db.table_count(), 0);

        // Constraint index names are free again once the table is gone.
        db.execute_with("CREATE TABLE t (id INT PRIMARY KEY)", |_| {})
            .unwrap();
        assert!(matches!(
            db.execute_with("CREATE TABLE t (id INT)", |_| {}),
            Err(QueryError::Semantic(_))
        ));
        db.execute_with("CREATE TABLE IF NOT EXISTS t (id INT)", |_| {})
            .unwrap();
    }

    #[test]
    fn index_query_accepts_only_create_index() {
        let db = database();
        db.build_indexes("CREATE INDEX t_v ON t (v);").unwrap();
        assert!(matches!(
            db.build_indexes("CREATE INDEX t_v2 ON t (v); DELETE FROM t"),
            Err(QueryError::Semantic(_))
        ));
        assert_eq!(db.count("t", "").unwrap(), 2);
        assert!(matches!(
            db.build_indexes("CREATE INDEX t_x ON t (missing)"),
            Err(QueryError::Semantic(_))
        ));
    }

    #[test]
    fn select_and_count_validate_input() {
        let db = database();
        let rows = db.select("SELECT v FROM t WHERE id = 2").unwrap();
        assert_eq!(rows[0].get("v"), Some(&Value::from("b")));
        assert!(matches!(db.select(""), Err(QueryError::Syntax(_))));
        assert!(matches!(
            db.select("DELETE FROM t"),
            Err(QueryError::Semantic(_))
        ));
        assert!(matches!(
            db.select("SELECT * FROM t; SELECT * FROM t"),
            Err(QueryError::Semantic(_))
        ));
        assert!(matches!(
            db.select("SELECT * FROM missing"),
            Err(QueryError::Semantic(_))
        ));
        assert!(matches!(
            db.execute_with("  ;  ", |_| {}),
            Err(QueryError::Syntax(_))
        ));

        assert_eq!(db.count("T", "v = 'a'").unwrap(), 1);
        assert!(matches!(db.count("t", "v = "), Err(QueryError::Syntax(_))));
        assert!(matches!(
            db.count("missing", ""),
            Err(QueryError::Semantic(_))
        ));
    }

    #[test]
    fn identifiers_fold_like_the_lexer() {
        assert_eq!(identifier(" Orders "), "orders");
        assert_eq!(identifier("\"Orders\""), "Orders");
    }
}
