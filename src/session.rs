use std::{sync::Arc, time::Duration};

use crate::{
    db::{Database, DatabaseKey, TdbError},
    executor::{tokio::TokioExecutor, Executor},
    mutation::MutationResult,
    node::Node,
    privacy::{PrivacyConfig, PrivacyGate, PrivacyLevel},
    query::{parser::Parser, QueryError},
    record::Row,
    scheduler::AsyncTicket,
};

/// A caller's handle on one database of a cluster.
///
/// A session carries the cluster id, the privacy configuration and the
/// default publish flag. [`Tdb::open`] binds it to a database; every other
/// operation fails with [`TdbError::NotOpen`] until then, and after the
/// database has been destroyed.
///
/// ```no_run
/// use tdb::Tdb;
///
/// let mut tdb = Tdb::new("c1");
/// tdb.open("orders", "CREATE TABLE t (id INT, v TEXT)", "")?;
/// tdb.execute("INSERT INTO t VALUES (1, 'a')", None)?;
/// assert_eq!(tdb.count("t", "")?, 1);
/// # Ok::<(), tdb::TdbError>(())
/// ```
pub struct Tdb<E: Executor = TokioExecutor> {
    node: Node<E>,
    cluster_id: String,
    privacy: PrivacyConfig,
    publish_changes: bool,
    opened: Option<Opened>,
}

struct Opened {
    key: DatabaseKey,
    gate: Arc<PrivacyGate>,
}

impl Tdb<TokioExecutor> {
    /// Session on the process-wide node with privacy `none` and publishing
    /// on.
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self::builder(cluster_id).build()
    }

    pub fn builder(cluster_id: impl Into<String>) -> TdbBuilder<TokioExecutor> {
        TdbBuilder {
            node: Node::global(),
            cluster_id: cluster_id.into(),
            privacy: PrivacyConfig::default(),
            publish_changes: true,
        }
    }
}

impl<E: Executor> Tdb<E> {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Name of the database this session was last opened on.
    pub fn database_name(&self) -> Option<&str> {
        self.opened.as_ref().map(|opened| opened.key.database())
    }

    pub fn privacy_level(&self) -> PrivacyLevel {
        self.privacy.level
    }

    pub fn publish_changes(&self) -> bool {
        self.publish_changes
    }

    pub fn node(&self) -> &Node<E> {
        &self.node
    }

    /// Attach to `database_name`, creating it when no session of this node
    /// has opened it yet. A new database runs `init_query` and then
    /// `index_query`, which may only hold `CREATE INDEX` statements. Both are
    /// ignored when the database already exists.
    pub fn open(
        &mut self,
        database_name: impl Into<String>,
        init_query: &str,
        index_query: &str,
    ) -> Result<&mut Self, TdbError> {
        let gate = Arc::new(PrivacyGate::new(&self.privacy)?);
        let key = DatabaseKey::new(self.cluster_id.clone(), database_name);
        self.node
            .open_database(key.clone(), gate.clone(), init_query, index_query)?;
        self.opened = Some(Opened { key, gate });
        Ok(self)
    }

    fn database(&self) -> Result<(Arc<Database>, &Arc<PrivacyGate>), TdbError> {
        let opened = self.opened.as_ref().ok_or(TdbError::NotOpen)?;
        let database = self
            .node
            .database(&opened.key)
            .ok_or(TdbError::NotOpen)?;
        Ok((database, &opened.gate))
    }

    /// Run one `SELECT` and return its rows.
    pub fn select(&self, query: &str) -> Result<Vec<Row>, TdbError> {
        let (database, _) = self.database()?;
        Ok(database.select(query)?)
    }

    /// Run one `SELECT` and return its rows as a JSON array of objects.
    pub fn select_json(&self, query: &str) -> Result<String, TdbError> {
        let rows = self.select(query)?;
        Ok(serde_json::to_string(&rows)?)
    }

    /// Run `query` now. Each statement commits on its own; on error the
    /// statements before the failing one stay applied. Mutations are
    /// published when `publish` (or the session default) is set.
    pub fn execute(&self, query: &str, publish: Option<bool>) -> Result<MutationResult, TdbError> {
        let (database, gate) = self.database()?;
        self.node.execute(
            &database,
            query,
            publish.unwrap_or(self.publish_changes),
            gate,
        )
    }

    /// Queue `query` to run no earlier than `execute_after_ms` from now.
    ///
    /// Malformed text is rejected here; any later failure is only logged.
    pub fn execute_async(
        &self,
        query: &str,
        publish: Option<bool>,
        execute_after_ms: u64,
    ) -> Result<AsyncTicket, TdbError> {
        let (database, gate) = self.database()?;
        if Parser::parse(query)?.is_empty() {
            return Err(QueryError::syntax("empty query").into());
        }
        database.submit(
            self.node.next_statement_id(),
            query.to_string(),
            publish.unwrap_or(self.publish_changes),
            gate.clone(),
            Duration::from_millis(execute_after_ms),
        )
    }

    /// Number of rows of `table` matching `where_clause`. An empty clause
    /// counts every row.
    pub fn count(&self, table: &str, where_clause: &str) -> Result<u64, TdbError> {
        let (database, _) = self.database()?;
        Ok(database.count(table, where_clause)?)
    }

    /// Destroy the local copy of the open database. Other nodes keep theirs
    /// and nothing is published. Statements queued by `execute_async` are
    /// discarded.
    pub fn destroy_local(&mut self) -> Result<(), TdbError> {
        let opened = self.opened.as_ref().ok_or(TdbError::NotOpen)?;
        self.node.destroy_database(&opened.key);
        Ok(())
    }
}

/// Builder of a [`Tdb`] session.
pub struct TdbBuilder<E: Executor = TokioExecutor> {
    node: Node<E>,
    cluster_id: String,
    privacy: PrivacyConfig,
    publish_changes: bool,
}

impl<E: Executor> TdbBuilder<E> {
    /// Run the session on `node` instead of the process-wide one.
    pub fn node<E2: Executor>(self, node: Node<E2>) -> TdbBuilder<E2> {
        TdbBuilder {
            node,
            cluster_id: self.cluster_id,
            privacy: self.privacy,
            publish_changes: self.publish_changes,
        }
    }

    pub fn privacy_level(mut self, level: PrivacyLevel) -> Self {
        self.privacy.level = level;
        self
    }

    /// Base64 Ed25519 public key and 32-byte private seed.
    pub fn keys(mut self, public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        self.privacy.public_key = public_key.into();
        self.privacy.private_key = private_key.into();
        self
    }

    pub fn privacy(mut self, privacy: PrivacyConfig) -> Self {
        self.privacy = privacy;
        self
    }

    /// Default for the per-call publish flag.
    pub fn publish_changes(mut self, publish_changes: bool) -> Self {
        self.publish_changes = publish_changes;
        self
    }

    pub fn build(self) -> Tdb<E> {
        Tdb {
            node: self.node,
            cluster_id: self.cluster_id,
            privacy: self.privacy,
            publish_changes: self.publish_changes,
            opened: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::Tdb;
    use crate::{
        db::TdbError,
        executor::tokio::TokioExecutor,
        node::Node,
        option::NodeOption,
        privacy::{PrivacyError, PrivacyLevel},
        replication::LocalTransport,
    };

    fn node() -> Node {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        Node::new(
            NodeOption::default(),
            TokioExecutor::new(runtime),
            Arc::new(LocalTransport),
        )
    }

    #[test]
    fn defaults() {
        let tdb = Tdb::builder("c1").node(node()).build();
        assert_eq!(tdb.cluster_id(), "c1");
        assert_eq!(tdb.privacy_level(), PrivacyLevel::None);
        assert!(tdb.publish_changes());
        assert_eq!(tdb.database_name(), None);
    }

    #[test]
    fn operations_require_open() {
        let mut tdb = Tdb::builder("c1").node(node()).build();
        assert!(matches!(tdb.select("SELECT 1 FROM t"), Err(TdbError::NotOpen)));
        assert!(matches!(tdb.execute("DELETE FROM t", None), Err(TdbError::NotOpen)));
        assert!(matches!(
            tdb.execute_async("DELETE FROM t", None, 0),
            Err(TdbError::NotOpen)
        ));
        assert!(matches!(tdb.count("t", ""), Err(TdbError::NotOpen)));
        assert!(matches!(tdb.destroy_local(), Err(TdbError::NotOpen)));
    }

    #[test]
    fn privacy_keys_checked_before_create() {
        let node = node();
        let mut tdb = Tdb::builder("c1")
            .node(node.clone())
            .privacy_level(PrivacyLevel::Signed)
            .build();
        let err = tdb
            .open("orders", "CREATE TABLE t (id INT)", "")
            .err()
            .unwrap();
        assert!(matches!(
            err,
            TdbError::PrivacyConfig(PrivacyError::MissingKey { .. })
        ));
        assert!(!node.contains("c1", "orders"));
    }

    #[test]
    fn destroy_then_reopen_is_fresh() {
        let mut tdb = Tdb::builder("c1").node(node()).build();
        let init = "CREATE TABLE t (id INT PRIMARY KEY, v TEXT)";
        tdb.open("orders", init, "").unwrap();
        tdb.execute("INSERT INTO t VALUES (1, 'a')", None).unwrap();
        tdb.destroy_local().unwrap();
        assert!(matches!(tdb.count("t", ""), Err(TdbError::NotOpen)));
        // A second destroy is a no-op.
        tdb.destroy_local().unwrap();

        tdb.open("orders", init, "").unwrap();
        assert_eq!(tdb.count("t", "").unwrap(), 0);
        assert_eq!(tdb.database_name(), Some("orders"));
    }
}
