// Subscriber registry - the set of open push connections
//
// Each WebSocket connection owns the receiving half of a bounded queue; the
// registry owns the sending half. Removing a subscriber closes its queue,
// which in turn ends the connection task.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

pub type SubscriberId = u64;

/// Serialized message shared by every recipient of one broadcast
pub type Outbound = Arc<str>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("subscriber is closed")]
    Closed,

    #[error("subscriber queue is full")]
    Full,
}

/// One push connection
pub struct Subscriber {
    id: SubscriberId,

    /// `None` once removed; a send after that always fails
    tx: Mutex<Option<mpsc::Sender<Outbound>>>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queues `message` without waiting
    ///
    /// The lock is held across the enqueue so a concurrent removal either
    /// happens entirely before (and the send fails) or entirely after.
    pub fn send(&self, message: Outbound) -> Result<(), SendError> {
        let guard = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = guard.as_ref().ok_or(SendError::Closed)?;
        tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }
}

/// Result of one pass over the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub pruned: usize,
}

/// Thread-safe set of subscribers
///
/// Cloning is cheap and every clone shares the same members.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<SubscriberId, Arc<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sending half of a connection's queue
    pub fn add(&self, tx: mpsc::Sender<Outbound>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let subscriber = Subscriber {
            id,
            tx: Mutex::new(Some(tx)),
        };
        self.subscribers.insert(id, Arc::new(subscriber));
        id
    }

    /// Removes and closes a subscriber
    ///
    /// # Returns
    /// `true` if the subscriber was still registered
    pub fn remove(&self, id: SubscriberId) -> bool {
        match self.subscribers.remove(&id) {
            Some((_, subscriber)) => {
                subscriber.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Visits every subscriber, pruning those that are closed or for which
    /// `send` returns `false`
    ///
    /// Members are snapshotted up front and no map lock is held while `send`
    /// runs, so `send` may itself add or remove subscribers.
    pub fn for_each<F>(&self, mut send: F) -> BroadcastOutcome
    where
        F: FnMut(&Subscriber) -> bool,
    {
        let members: Vec<Arc<Subscriber>> = self
            .subscribers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut outcome = BroadcastOutcome::default();

        for subscriber in members {
            if subscriber.is_open() && send(&subscriber) {
                outcome.delivered += 1;
            } else {
                if self.remove(subscriber.id) {
                    debug!("Pruned subscriber {}", subscriber.id);
                }
                outcome.pruned += 1;
            }
        }

        outcome
    }

    /// Sends `message` to every subscriber
    pub fn broadcast(&self, message: &Outbound) -> BroadcastOutcome {
        self.for_each(|subscriber| match subscriber.send(Arc::clone(message)) {
            Ok(()) => true,
            Err(e) => {
                debug!("Send to subscriber {} failed: {}", subscriber.id(), e);
                false
            }
        })
    }

    /// Removes every subscriber, ending all connection tasks
    pub fn close_all(&self) -> usize {
        let ids: Vec<SubscriberId> = self.subscribers.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.remove(*id)).count()
    }
}
