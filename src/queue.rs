//! Offline queue for mutating requests issued while disconnected.

use crate::request::RequestDescriptor;
use crate::{GatewayError, Response, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Side-channel notifications about queued entries.
///
/// The original caller has already received a `Queued` outcome and cannot
/// be resolved twice, so replay results are also published here for
/// application-level reporting.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An entry replayed successfully.
    Replayed {
        /// Request correlation id.
        id: Uuid,
        /// Status of the replayed response.
        status: u16,
    },
    /// An entry failed transiently and was re-queued at the tail.
    Requeued {
        /// Request correlation id.
        id: Uuid,
        /// Replay attempts so far.
        attempts: u32,
    },
    /// An entry was abandoned: terminal failure or replay bound exceeded.
    Dropped {
        /// Request correlation id.
        id: Uuid,
        /// Failure description.
        reason: String,
    },
}

/// Deferred handle for a queued request, correlated by request id.
///
/// Resolves with the replay outcome once connectivity returns, so callers
/// can observe the eventual result instead of only the `Queued` marker.
#[derive(Debug)]
pub struct QueuedTicket {
    id: Uuid,
    rx: oneshot::Receiver<Result<Response>>,
}

impl QueuedTicket {
    /// The id of the queued request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Await the replay outcome.
    pub async fn outcome(self) -> Result<Response> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Network("offline replay abandoned".into())),
        }
    }
}

/// One buffered mutating request.
pub(crate) struct QueueEntry {
    pub(crate) descriptor: RequestDescriptor,
    #[allow(dead_code)]
    pub(crate) enqueued_at: Instant,
    pub(crate) attempts: u32,
    resolver: oneshot::Sender<Result<Response>>,
}

impl QueueEntry {
    pub(crate) fn resolve(self, result: Result<Response>) {
        // The caller may have dropped its ticket; that is not an error.
        let _ = self.resolver.send(result);
    }
}

/// FIFO buffer of mutating requests awaiting connectivity.
pub struct OfflineQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    events: broadcast::Sender<QueueEvent>,
    max_replay_attempts: u32,
}

impl OfflineQueue {
    /// Create a queue with the given per-entry replay bound.
    pub fn new(max_replay_attempts: u32) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            entries: Mutex::new(VecDeque::new()),
            events,
            max_replay_attempts,
        }
    }

    /// Append a descriptor and hand back its deferred ticket.
    pub fn enqueue(&self, descriptor: RequestDescriptor) -> QueuedTicket {
        let (tx, rx) = oneshot::channel();
        let id = descriptor.id;
        self.entries.lock().push_back(QueueEntry {
            descriptor,
            enqueued_at: Instant::now(),
            attempts: 0,
            resolver: tx,
        });
        debug!(%id, "queued mutating request while offline");
        QueuedTicket { id, rx }
    }

    pub(crate) fn pop(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn requeue(&self, entry: QueueEntry) {
        self.emit(QueueEvent::Requeued {
            id: entry.descriptor.id,
            attempts: entry.attempts,
        });
        self.entries.lock().push_back(entry);
    }

    pub(crate) fn drop_entry(&self, entry: QueueEntry, error: GatewayError) {
        warn!(id = %entry.descriptor.id, error = %error, "dropping queued request");
        self.emit(QueueEvent::Dropped {
            id: entry.descriptor.id,
            reason: error.to_string(),
        });
        entry.resolve(Err(error));
    }

    pub(crate) fn max_replay_attempts(&self) -> u32 {
        self.max_replay_attempts
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Subscribe to replay notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
