//! The node-wide database registry.
//!
//! A [`Node`] owns every database opened in this process under any cluster,
//! the executor running their background loops, and one replication
//! publisher. Sessions resolve their database through the node on every
//! call, so a database destroyed by one session is gone for all of them.

use std::{
    io,
    sync::{Arc, Mutex, Weak},
};

use crossbeam_skiplist::SkipMap;
use once_cell::sync::Lazy;
use ulid::Ulid;

use crate::{
    db::{Database, DatabaseKey, TdbError},
    executor::{tokio::TokioExecutor, Executor},
    id::StatementIdGenerator,
    mutation::MutationResult,
    observability::{log_debug, log_info, log_warn},
    option::NodeOption,
    privacy::PrivacyGate,
    replication::{frame::Envelope, LocalTransport, Publisher, ReplicationMetrics, Transport},
    scheduler::{PendingStatement, RunOutcome, Runner, Scheduler, SchedulerMetrics},
};

static GLOBAL: Lazy<Node> = Lazy::new(|| {
    Node::with_option(NodeOption::default()).expect("default tdb runtime should start")
});

/// Handle to a node. Clones share the same registry.
pub struct Node<E: Executor = TokioExecutor> {
    inner: Arc<NodeInner<E>>,
}

impl<E: Executor> Clone for Node<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct NodeInner<E: Executor> {
    id: Ulid,
    executor: E,
    databases: SkipMap<DatabaseKey, Arc<Database>>,
    /// Serializes create and destroy; lookups go straight to the map.
    registry_lock: Mutex<()>,
    publisher: Arc<Publisher>,
    statement_ids: StatementIdGenerator,
    replication_metrics: Arc<Mutex<ReplicationMetrics>>,
    scheduler_metrics: Arc<Mutex<SchedulerMetrics>>,
    transport: Arc<dyn Transport>,
}

impl<E: Executor> Drop for NodeInner<E> {
    fn drop(&mut self) {
        for entry in self.databases.iter() {
            entry.value().destroy();
        }
        // Closes the inbox, which stops the inbound loop.
        self.transport.detach(self.id);
    }
}

impl Node<TokioExecutor> {
    /// Node on a fresh multi-threaded runtime, without peers.
    pub fn with_option(option: NodeOption) -> io::Result<Self> {
        Self::with_transport(option, Arc::new(LocalTransport))
    }

    /// Node on a fresh multi-threaded runtime joined to `transport`.
    pub fn with_transport(option: NodeOption, transport: Arc<dyn Transport>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(option.worker_threads)
            .thread_name(option.thread_name.clone())
            .enable_all()
            .build()?;
        Ok(Self::new(option, TokioExecutor::new(runtime), transport))
    }

    /// The process-wide node used by [`crate::Tdb::new`]. Created on first
    /// use.
    pub fn global() -> Self {
        GLOBAL.clone()
    }
}

impl<E: Executor> Node<E> {
    pub fn new(option: NodeOption, executor: E, transport: Arc<dyn Transport>) -> Self {
        let id = Ulid::new();
        let replication_metrics = Arc::new(Mutex::new(ReplicationMetrics::default()));
        let publisher = Publisher::spawn(
            &executor,
            transport.clone(),
            id,
            option.publish_queue_capacity,
            replication_metrics.clone(),
        );
        let inbox = transport.attach(id);
        let inner = Arc::new(NodeInner {
            id,
            executor,
            databases: SkipMap::new(),
            registry_lock: Mutex::new(()),
            publisher: Arc::new(publisher),
            statement_ids: StatementIdGenerator::new(),
            replication_metrics,
            scheduler_metrics: Arc::new(Mutex::new(SchedulerMetrics::default())),
            transport,
        });

        let weak: Weak<NodeInner<E>> = Arc::downgrade(&inner);
        inner.executor.spawn(async move {
            while let Ok(frame) = inbox.recv_async().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.receive(&frame);
            }
            log_debug!(component = "node", event = "inbound_stopped", node = %id);
        });
        log_debug!(component = "node", event = "node_started", node = %id);

        Self { inner }
    }

    /// Identifier of this node on the transport.
    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn replication_metrics(&self) -> ReplicationMetrics {
        self.inner
            .replication_metrics
            .lock()
            .expect("replication metrics mutex should not be poisoned")
            .clone()
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.inner
            .scheduler_metrics
            .lock()
            .expect("scheduler metrics mutex should not be poisoned")
            .clone()
    }

    /// Whether `cluster`/`database` is open on this node.
    pub fn contains(&self, cluster: &str, database: &str) -> bool {
        self.inner
            .databases
            .contains_key(&DatabaseKey::new(cluster, database))
    }

    /// Number of databases open on this node.
    pub fn len(&self) -> usize {
        self.inner.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.databases.is_empty()
    }

    pub(crate) fn database(&self, key: &DatabaseKey) -> Option<Arc<Database>> {
        self.inner.database(key)
    }

    pub(crate) fn next_statement_id(&self) -> Ulid {
        self.inner.statement_ids.generate()
    }

    /// Attach to the database under `key`, creating and initializing it when
    /// it does not exist yet. A failed creation registers nothing.
    pub(crate) fn open_database(
        &self,
        key: DatabaseKey,
        gate: Arc<PrivacyGate>,
        init_query: &str,
        index_query: &str,
    ) -> Result<Arc<Database>, TdbError> {
        if let Some(database) = self.inner.database(&key) {
            log_debug!(component = "node", event = "database_attached", database = %key);
            return Ok(database);
        }
        let _guard = self
            .inner
            .registry_lock
            .lock()
            .expect("registry mutex should not be poisoned");
        if let Some(database) = self.inner.database(&key) {
            log_debug!(component = "node", event = "database_attached", database = %key);
            return Ok(database);
        }

        let database = Arc::new(Database::new(key.clone(), gate));
        database.initialize(init_query).map_err(TdbError::InitQuery)?;
        database
            .build_indexes(index_query)
            .map_err(TdbError::IndexBuild)?;

        let (scheduler, event_loop) = Scheduler::new(
            key.clone(),
            self.runner(&database),
            self.inner.scheduler_metrics.clone(),
        );
        database.attach_scheduler(scheduler);
        self.inner.executor.spawn(event_loop.listen());

        self.inner.databases.insert(key.clone(), database.clone());
        log_info!(
            component = "node",
            event = "database_opened",
            database = %key,
            privacy = %database.inbound_gate().level(),
            tables = database.table_count(),
        );
        Ok(database)
    }

    /// Drop the local database under `key`. Pending asynchronous statements
    /// are discarded. Returns whether a database was removed.
    pub(crate) fn destroy_database(&self, key: &DatabaseKey) -> bool {
        let _guard = self
            .inner
            .registry_lock
            .lock()
            .expect("registry mutex should not be poisoned");
        let Some(entry) = self.inner.databases.remove(key) else {
            return false;
        };
        entry.value().destroy();
        log_info!(component = "node", event = "database_destroyed", database = %key);
        true
    }

    /// Run `query` on `database` now, publishing each applied mutation when
    /// `publish` is set.
    pub(crate) fn execute(
        &self,
        database: &Database,
        query: &str,
        publish: bool,
        gate: &PrivacyGate,
    ) -> Result<MutationResult, TdbError> {
        let publisher = &self.inner.publisher;
        let result = database.execute_with(query, |statement| {
            if publish {
                publisher.publish(database.key(), gate, statement);
            }
        })?;
        Ok(result)
    }

    fn runner(&self, database: &Arc<Database>) -> Runner {
        let database = Arc::downgrade(database);
        let publisher = self.inner.publisher.clone();
        Arc::new(move |statement: &PendingStatement| {
            let Some(database) = database.upgrade() else {
                return RunOutcome::Discarded;
            };
            if database.is_destroyed() {
                return RunOutcome::Discarded;
            }
            let result = database.execute_with(&statement.query, |text| {
                if statement.publish {
                    publisher.publish(database.key(), &statement.gate, text);
                }
            });
            match result {
                Ok(result) => RunOutcome::Executed(result),
                Err(err) => RunOutcome::Failed(err.into()),
            }
        })
    }
}

impl<E: Executor> NodeInner<E> {
    fn database(&self, key: &DatabaseKey) -> Option<Arc<Database>> {
        self.databases
            .get(key)
            .map(|entry| entry.value().clone())
            .filter(|database| !database.is_destroyed())
    }

    fn reject(&self, cluster: &str, database: &str, reason: &dyn std::fmt::Display) {
        self.replication_metrics
            .lock()
            .expect("replication metrics mutex should not be poisoned")
            .record_rejected();
        log_warn!(
            component = "replication",
            event = "replication_rejected",
            cluster = cluster,
            database = database,
            reason = %reason,
        );
    }

    /// Apply one inbound frame. Nothing here is reported to callers.
    fn receive(&self, frame: &[u8]) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reject("", "", &err);
                return;
            }
        };
        if envelope.origin == self.id {
            return;
        }
        let key = DatabaseKey::new(envelope.cluster, envelope.database);
        let Some(database) = self.database(&key) else {
            log_debug!(
                component = "replication",
                event = "replication_ignored",
                database = %key,
                seq = envelope.seq,
            );
            return;
        };
        let statement = match database.inbound_gate().unprotect(&envelope.payload) {
            Ok(statement) => statement,
            Err(err) => {
                self.reject(key.cluster(), key.database(), &err);
                return;
            }
        };
        let statement = match String::from_utf8(statement) {
            Ok(statement) => statement,
            Err(err) => {
                self.reject(key.cluster(), key.database(), &err);
                return;
            }
        };
        match database.execute_with(&statement, |_| {}) {
            Ok(_) => {
                self.replication_metrics
                    .lock()
                    .expect("replication metrics mutex should not be poisoned")
                    .record_applied();
                log_debug!(
                    component = "replication",
                    event = "replication_applied",
                    database = %key,
                    origin = %envelope.origin,
                    seq = envelope.seq,
                );
            }
            Err(err) => {
                log_warn!(
                    component = "replication",
                    event = "replication_apply_failed",
                    database = %key,
                    origin = %envelope.origin,
                    seq = envelope.seq,
                    error = %err,
                );
            }
        }
    }
}
