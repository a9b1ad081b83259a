//! Request-id correlation table.
//!
//! Every outbound request that expects a response registers a pending entry
//! keyed by its request id before the frame is written. The read loop is
//! the only caller of [`CorrelationTable::deliver`]; each entry is
//! fulfilled at most once and removed on fulfillment, timeout, or
//! disconnect — whichever comes first. Entries are independent:
//! concurrent register/deliver pairs never interfere because ids are
//! unique.

use dashmap::DashMap;
use tokio::sync::oneshot;

use relay_core::RequestId;
use relay_protocol::Reply;

/// Pending requests awaiting a matching response.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, oneshot::Sender<Reply>>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending entry for `id` and return the receiving half.
    ///
    /// Call before sending the frame, so a fast response cannot race the
    /// registration.
    pub fn register(&self, id: &RequestId) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id.as_str().to_string(), tx);
        rx
    }

    /// Deliver a response to the pending entry for `id`, removing it.
    ///
    /// Returns `false` when no entry exists (the caller already gave up, a
    /// duplicate arrived, or the message was unsolicited) — the payload is
    /// dropped.
    pub fn deliver(&self, id: &str, reply: Reply) -> bool {
        match self.pending.remove(id) {
            Some((_, tx)) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Remove the entry for `id` without delivering (timeout path).
    pub fn remove(&self, id: &RequestId) {
        let _ = self.pending.remove(id.as_str());
    }

    /// Abandon every pending entry (disconnect path). Each waiting caller
    /// observes its receiver closing.
    pub fn clear(&self) {
        self.pending.clear();
    }

    /// Number of in-flight entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
