//! Statement replication between nodes of a cluster.
//!
//! A committed mutating statement is protected by the session's privacy gate,
//! wrapped in an [`frame::Envelope`] and pushed onto a bounded outbound queue.
//! A pump task drains the queue into the [`Transport`]. Everything after the
//! local commit is best effort: failures are logged and counted, never
//! returned to the caller.

pub(crate) mod frame;
mod metrics;

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use flume::TrySendError;
pub use frame::FrameError;
pub use metrics::ReplicationMetrics;
use ulid::Ulid;

use crate::{
    db::DatabaseKey,
    executor::Executor,
    observability::{log_debug, log_warn},
    privacy::{PrivacyError, PrivacyGate},
};

/// Replication failures. Only ever logged and counted.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("privacy error: {0}")]
    Privacy(#[from] PrivacyError),
    #[error("outbound queue is full")]
    QueueFull,
    #[error("outbound queue is closed")]
    QueueClosed,
    #[error("delivered to {delivered} peers, {failed} inboxes rejected the frame")]
    Delivery { delivered: usize, failed: usize },
}

/// Moves encoded envelopes between the nodes of a process or network.
///
/// Frames are opaque to the transport; receivers decode and filter them.
pub trait Transport: Send + Sync + 'static {
    /// Register `node` and return the receiving end of its inbox.
    fn attach(&self, node: Ulid) -> flume::Receiver<Vec<u8>>;

    /// Unregister `node`; its inbox closes.
    fn detach(&self, node: Ulid);

    /// Offer `frame` to every attached node except `from`. Returns the number
    /// of peers that accepted it.
    fn broadcast(&self, from: Ulid, frame: &[u8]) -> Result<usize, ReplicationError>;
}

/// Transport of a node without peers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn attach(&self, _node: Ulid) -> flume::Receiver<Vec<u8>> {
        // The sender is dropped at once, so the inbox reports closed.
        flume::bounded(1).1
    }

    fn detach(&self, _node: Ulid) {}

    fn broadcast(&self, _from: Ulid, _frame: &[u8]) -> Result<usize, ReplicationError> {
        Ok(0)
    }
}

/// In-process transport joining several nodes; each inbox is bounded.
#[derive(Debug)]
pub struct MemoryTransport {
    inbox_capacity: usize,
    inboxes: Mutex<BTreeMap<Ulid, flume::Sender<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            inbox_capacity: inbox_capacity.max(1),
            inboxes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of attached nodes.
    pub fn peers(&self) -> usize {
        self.inboxes
            .lock()
            .expect("transport inbox mutex should not be poisoned")
            .len()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Transport for MemoryTransport {
    fn attach(&self, node: Ulid) -> flume::Receiver<Vec<u8>> {
        let (tx, rx) = flume::bounded(self.inbox_capacity);
        self.inboxes
            .lock()
            .expect("transport inbox mutex should not be poisoned")
            .insert(node, tx);
        rx
    }

    fn detach(&self, node: Ulid) {
        self.inboxes
            .lock()
            .expect("transport inbox mutex should not be poisoned")
            .remove(&node);
    }

    fn broadcast(&self, from: Ulid, frame: &[u8]) -> Result<usize, ReplicationError> {
        let inboxes = self
            .inboxes
            .lock()
            .expect("transport inbox mutex should not be poisoned");
        let mut delivered = 0;
        let mut failed = 0;
        for (node, inbox) in inboxes.iter() {
            if *node == from {
                continue;
            }
            match inbox.try_send(frame.to_vec()) {
                Ok(()) => delivered += 1,
                Err(_) => failed += 1,
            }
        }
        if failed > 0 {
            return Err(ReplicationError::Delivery { delivered, failed });
        }
        Ok(delivered)
    }
}

struct Outbound {
    key: DatabaseKey,
    frame: Vec<u8>,
}

/// Outbound side of replication for one node.
pub(crate) struct Publisher {
    origin: Ulid,
    seq: AtomicU64,
    queue: flume::Sender<Outbound>,
    metrics: Arc<Mutex<ReplicationMetrics>>,
}

impl Publisher {
    /// Create the publisher and spawn its pump on `executor`.
    pub(crate) fn spawn<E: Executor>(
        executor: &E,
        transport: Arc<dyn Transport>,
        origin: Ulid,
        capacity: usize,
        metrics: Arc<Mutex<ReplicationMetrics>>,
    ) -> Self {
        let (queue, outbound) = flume::bounded::<Outbound>(capacity);
        let pump_metrics = metrics.clone();
        executor.spawn(async move {
            while let Ok(Outbound { key, frame }) = outbound.recv_async().await {
                let result = transport.broadcast(origin, &frame);
                let mut metrics = pump_metrics
                    .lock()
                    .expect("replication metrics mutex should not be poisoned");
                match result {
                    Ok(peers) => metrics.record_delivered(peers as u64),
                    Err(err) => {
                        if let ReplicationError::Delivery { delivered, failed } = &err {
                            metrics.record_delivered(*delivered as u64);
                            metrics.record_publish_failures(*failed as u64);
                        } else {
                            metrics.record_publish_failures(1);
                        }
                        log_warn!(
                            component = "replication",
                            event = "replication_delivery_failed",
                            database = %key,
                            error = %err,
                        );
                    }
                }
            }
            log_debug!(component = "replication", event = "publisher_stopped");
        });
        Self {
            origin,
            seq: AtomicU64::new(1),
            queue,
            metrics,
        }
    }

    /// Protect `statement` with `gate` and queue it for every peer. Failures
    /// are logged and counted.
    pub(crate) fn publish(&self, key: &DatabaseKey, gate: &PrivacyGate, statement: &str) {
        let result = self.enqueue(key, gate, statement);
        let mut metrics = self
            .metrics
            .lock()
            .expect("replication metrics mutex should not be poisoned");
        match result {
            Ok(()) => metrics.record_published(),
            Err(err) => {
                metrics.record_publish_failures(1);
                log_warn!(
                    component = "replication",
                    event = "replication_publish_failed",
                    database = %key,
                    error = %err,
                );
            }
        }
    }

    fn enqueue(
        &self,
        key: &DatabaseKey,
        gate: &PrivacyGate,
        statement: &str,
    ) -> Result<(), ReplicationError> {
        let envelope = frame::Envelope {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            origin: self.origin,
            cluster: key.cluster.clone(),
            database: key.database.clone(),
            payload: gate.protect(statement.as_bytes())?,
        };
        let frame = envelope.encode()?;
        self.queue
            .try_send(Outbound {
                key: key.clone(),
                frame,
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => ReplicationError::QueueFull,
                TrySendError::Disconnected(_) => ReplicationError::QueueClosed,
            })
    }
}

#[cfg(test)]
mod tests {
    use ulid::Ulid;

    use super::{LocalTransport, MemoryTransport, ReplicationError, Transport};

    #[test]
    fn memory_transport_skips_sender() {
        let transport = MemoryTransport::new(4);
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let inbox_a = transport.attach(a);
        let inbox_b = transport.attach(b);
        let inbox_c = transport.attach(c);
        assert_eq!(transport.peers(), 3);

        assert_eq!(transport.broadcast(a, b"frame").unwrap(), 2);
        assert!(inbox_a.try_recv().is_err());
        assert_eq!(inbox_b.try_recv().unwrap(), b"frame");
        assert_eq!(inbox_c.try_recv().unwrap(), b"frame");

        transport.detach(c);
        assert!(inbox_c.try_recv().is_err());
        assert_eq!(transport.broadcast(a, b"again").unwrap(), 1);
    }

    #[test]
    fn full_inbox_reports_partial_delivery() {
        let transport = MemoryTransport::new(1);
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let _inbox_a = transport.attach(a);
        let inbox_b = transport.attach(b);
        let _inbox_c = transport.attach(c);
        transport.broadcast(a, b"1").unwrap();
        inbox_b.try_recv().unwrap();

        let err = transport.broadcast(a, b"2").unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::Delivery {
                delivered: 1,
                failed: 1
            }
        ));
    }

    #[test]
    fn local_transport_has_no_peers() {
        let inbox = LocalTransport.attach(Ulid::new());
        assert!(inbox.is_disconnected());
        assert_eq!(LocalTransport.broadcast(Ulid::new(), b"x").unwrap(), 0);
    }
}
