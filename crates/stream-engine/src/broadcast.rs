//! Fan-out of per-frame results to live subscribers.
//!
//! Delivery is best-effort: each subscriber has its own bounded channel and
//! a full channel drops the event for that subscriber only. Closed channels
//! are pruned on the next publish.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};

use findr_frame_model::StreamEvent;

use crate::admission::SessionId;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Subscribers = HashMap<SessionId, Vec<(SubscriberId, mpsc::Sender<StreamEvent>)>>;

#[derive(Debug, Default)]
pub struct Broadcaster {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self, session: SessionId, channel: mpsc::Sender<StreamEvent>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table().entry(session).or_default().push((id, channel));
        tracing::debug!(session = %session, subscriber = id.0, "Subscriber attached");
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, session: SessionId, subscriber: SubscriberId) -> bool {
        let mut table = self.table();
        let Some(list) = table.get_mut(&session) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscriber);
        let removed = list.len() != before;
        if list.is_empty() {
            table.remove(&session);
        }
        removed
    }

    /// Deliver `event` to every subscriber of `session` without blocking.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, session: SessionId, event: &StreamEvent) -> usize {
        let mut table = self.table();
        let Some(list) = table.get_mut(&session) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(session = %session, subscriber = id.0, "Subscriber lagging, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session = %session, subscriber = id.0, "Subscriber gone");
                false
            }
        });
        if list.is_empty() {
            table.remove(&session);
        }
        delivered
    }

    /// Send a terminal event and drop every subscriber of `session`.
    pub fn close(&self, session: SessionId, terminal: StreamEvent) {
        let Some(list) = self.table().remove(&session) else {
            return;
        };
        for (_, tx) in list {
            // Full or closed channels simply miss the terminal event; dropping
            // the sender still ends their stream.
            let _ = tx.try_send(terminal.clone());
        }
    }

    pub fn subscriber_count(&self, session: SessionId) -> usize {
        self.table().get(&session).map_or(0, Vec::len)
    }
}
