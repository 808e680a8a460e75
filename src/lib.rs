//! A transient, cluster-replicated, in-memory SQL database.
//!
//! Databases live only as long as the process. A [`Tdb`] session opens a
//! database by (cluster id, name) on a [`Node`], runs queries against it, and
//! can publish every committed mutation to the other nodes of the cluster.
//! Published statements are signed or encrypted according to the session's
//! [`PrivacyLevel`].
//!
//! ```no_run
//! use tdb::{PrivacyLevel, Tdb};
//!
//! let mut tdb = Tdb::builder("c1")
//!     .privacy_level(PrivacyLevel::None)
//!     .publish_changes(false)
//!     .build();
//! tdb.open(
//!     "orders",
//!     "CREATE TABLE t (id INT PRIMARY KEY, v TEXT); INSERT INTO t VALUES (1, 'a')",
//!     "CREATE INDEX t_v ON t (v)",
//! )?;
//! println!("{}", tdb.select_json("SELECT * FROM t")?);
//! # Ok::<(), tdb::TdbError>(())
//! ```

mod observability;

mod db;
pub mod executor;
mod id;
mod mutation;
mod node;
mod option;
mod privacy;
mod query;
pub mod record;
mod replication;
mod scheduler;
mod session;
mod table;

pub use ulid::Ulid;

pub use crate::{
    db::TdbError,
    executor::{tokio::TokioExecutor, Executor},
    id::StatementId,
    mutation::MutationResult,
    node::Node,
    option::NodeOption,
    privacy::{PrivacyConfig, PrivacyError, PrivacyGate, PrivacyLevel},
    query::QueryError,
    record::{DataType, Row, Value},
    replication::{
        FrameError, LocalTransport, MemoryTransport, ReplicationError, ReplicationMetrics,
        Transport,
    },
    scheduler::{AsyncTicket, SchedulerMetrics},
    session::{Tdb, TdbBuilder},
};
