pub mod tokio;

use std::future::Future;

/// Spawns the node's background work: scheduler loops, the replication
/// pump and the inbound receiver.
pub trait Executor: Send + Sync + 'static {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
