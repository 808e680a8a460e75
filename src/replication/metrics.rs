//! Replication counters.

/// Counters for outbound and inbound replication on one node.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct ReplicationMetrics {
    /// Statements accepted into the outbound queue.
    pub published: u64,
    /// Frames handed to peer inboxes.
    pub delivered: u64,
    /// Statements or deliveries that failed (queue full, closed, encoding, or a
    /// peer inbox rejecting the frame).
    pub publish_failures: u64,
    /// Inbound frames dropped because they failed decoding or the privacy
    /// check.
    pub rejected: u64,
    /// Inbound statements applied to a local database.
    pub applied: u64,
}

impl ReplicationMetrics {
    pub fn record_published(&mut self) {
        self.published = self.published.saturating_add(1);
    }

    pub fn record_delivered(&mut self, peers: u64) {
        self.delivered = self.delivered.saturating_add(peers);
    }

    pub fn record_publish_failures(&mut self, failures: u64) {
        self.publish_failures = self.publish_failures.saturating_add(failures);
    }

    pub fn record_rejected(&mut self) {
        self.rejected = self.rejected.saturating_add(1);
    }

    pub fn record_applied(&mut self) {
        self.applied = self.applied.saturating_add(1);
    }
}
