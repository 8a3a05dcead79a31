use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use tern_core::events::Event;
use tern_core::ids::SessionId;

/// A subscriber's view of one session's events. Ends when the session's
/// channel is closed or the subscriber falls too far behind.
pub type EventStream = ReceiverStream<Event>;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    subscribers: DashMap<SessionId, Vec<Subscriber>>,
    closed: DashSet<SessionId>,
    capacity: usize,
    next_id: AtomicU64,
}

/// Per-session fan-out of events to live subscribers.
///
/// Each subscriber owns a bounded queue. Publishing never blocks: a
/// subscriber whose queue is full is dropped, which ends its stream, so a
/// stream that is still open has seen every event since it subscribed.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                closed: DashSet::new(),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Deliver an event to every current subscriber of its session.
    pub fn publish(&self, event: Event) {
        let session_id = event.session_id().clone();
        let Some(mut subs) = self.inner.subscribers.get_mut(&session_id) else {
            return;
        };
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    session_id = %session_id,
                    subscriber = sub.id,
                    event = event.event_type(),
                    "subscriber queue full, disconnecting"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session_id = %session_id, subscriber = sub.id, "subscriber gone");
                false
            }
        });
    }

    /// Receive every event published for the session from now on.
    pub fn subscribe(&self, session_id: &SessionId) -> EventStream {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        // The closed check runs under the session's entry lock, which `close`
        // also takes, so a subscriber is either refused or removed by it.
        let subscriber = Subscriber { id, tx };
        match self.inner.subscribers.entry(session_id.clone()) {
            Entry::Occupied(mut subs) => {
                if self.inner.closed.contains(session_id) {
                    return ReceiverStream::new(rx);
                }
                subs.get_mut().push(subscriber);
            }
            Entry::Vacant(slot) => {
                if self.inner.closed.contains(session_id) {
                    return ReceiverStream::new(rx);
                }
                slot.insert(vec![subscriber]);
            }
        }
        debug!(session_id = %session_id, subscriber = id, "subscribed");
        ReceiverStream::new(rx)
    }

    /// End every stream of the session. Later subscriptions end immediately.
    pub fn close(&self, session_id: &SessionId) {
        self.inner.closed.insert(session_id.clone());
        if let Some((_, subs)) = self.inner.subscribers.remove(session_id) {
            debug!(session_id = %session_id, subscribers = subs.len(), "closing session channel");
        }
    }

    /// Drop everything kept for the session, including its closed mark.
    pub fn forget(&self, session_id: &SessionId) {
        self.inner.subscribers.remove(session_id);
        self.inner.closed.remove(session_id);
    }

    pub fn is_closed(&self, session_id: &SessionId) -> bool {
        self.inner.closed.contains(session_id)
    }

    /// Live subscribers of a session, pruning any that went away.
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        match self.inner.subscribers.get_mut(session_id) {
            Some(mut subs) => {
                subs.retain(|s| !s.tx.is_closed());
                subs.len()
            }
            None => 0,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
