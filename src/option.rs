/// Node-wide configuration.
#[derive(Debug, Clone)]
pub struct NodeOption {
    pub(crate) publish_queue_capacity: usize,
    pub(crate) worker_threads: usize,
    pub(crate) thread_name: String,
}

impl Default for NodeOption {
    fn default() -> Self {
        NodeOption {
            publish_queue_capacity: 1024,
            worker_threads: 2,
            thread_name: "tdb-worker".to_string(),
        }
    }
}

impl NodeOption {
    /// Outbound replication frames buffered before new ones are dropped.
    pub fn publish_queue_capacity(self, publish_queue_capacity: usize) -> Self {
        NodeOption {
            publish_queue_capacity: publish_queue_capacity.max(1),
            ..self
        }
    }

    /// Worker threads of a runtime built by [`crate::Node::with_option`].
    pub fn worker_threads(self, worker_threads: usize) -> Self {
        NodeOption {
            worker_threads: worker_threads.max(1),
            ..self
        }
    }

    pub fn thread_name(self, thread_name: impl Into<String>) -> Self {
        NodeOption {
            thread_name: thread_name.into(),
            ..self
        }
    }
}
