//! Correlation table: maps outstanding request ids to single-slot reply
//! channels.
//!
//! Flow:
//! 1. The gateway generates an id and calls `register()` to get a receiver
//! 2. The request goes out on the shared connection stamped with that id
//! 3. The read loop sees the reply and calls `deliver()`
//! 4. The gateway wakes up (or times out) and calls `expire()`
//!
//! Delivery never removes the slot; removal is owned by the waiting side so
//! that every slot is removed exactly once.

use std::time::Instant;

use {
    dashmap::{DashMap, mapref::entry::Entry},
    pusher_protocol::Iq,
    tokio::sync::oneshot,
    tracing::{debug, trace},
};

use crate::error::{Error, Result};

/// One outstanding exchange.
struct PendingExchange {
    /// Taken on first delivery; later deliveries find `None`.
    sender: Option<oneshot::Sender<Iq>>,
    registered_at: Instant,
}

/// Process-wide table of pending exchanges. Each operation is atomic with
/// respect to the others for the same id.
#[derive(Default)]
pub struct CorrelationTable {
    pending: DashMap<String, PendingExchange>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty slot for `id` and return its receiving end.
    pub fn register(&self, id: &str) -> Result<oneshot::Receiver<Iq>> {
        match self.pending.entry(id.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateIdentifier { id: id.to_string() }),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                slot.insert(PendingExchange {
                    sender: Some(tx),
                    registered_at: Instant::now(),
                });
                trace!(id, "registered pending exchange");
                Ok(rx)
            },
        }
    }

    /// Hand `reply` to the waiter for `id`.
    ///
    /// Returns `false` when nobody is waiting: unknown id, already expired,
    /// or already filled. None of these are errors since a reply can race
    /// the waiter's timeout.
    pub fn deliver(&self, id: &str, reply: Iq) -> bool {
        let Some(mut exchange) = self.pending.get_mut(id) else {
            debug!(id, "reply for unknown or expired exchange");
            return false;
        };
        let Some(sender) = exchange.sender.take() else {
            debug!(id, "duplicate reply for exchange, dropping");
            return false;
        };
        let waited = exchange.registered_at.elapsed();
        drop(exchange);

        match sender.send(reply) {
            Ok(()) => {
                trace!(id, waited_ms = waited.as_millis() as u64, "delivered reply");
                true
            },
            Err(_) => {
                debug!(id, "waiter gone before delivery");
                false
            },
        }
    }

    /// Remove the slot for `id`. Idempotent; returns whether a slot existed.
    pub fn expire(&self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Number of outstanding exchanges.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
