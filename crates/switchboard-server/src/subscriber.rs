use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use switchboard_core::ids::{OrgId, SessionId, SubscriberId};

/// Consecutive failed deliveries before a subscriber is written off as dead.
const MAX_DELIVERY_FAILURES: usize = 8;

/// One dashboard subscriber: scoped to exactly one organization, optionally
/// narrowed to a single session.
pub struct Subscription {
    pub id: SubscriberId,
    pub organization_id: OrgId,
    pub session_filter: Option<SessionId>,
    tx: mpsc::Sender<String>,
    failures: AtomicUsize,
}

impl Subscription {
    pub fn wants(&self, session_id: &SessionId) -> bool {
        match &self.session_filter {
            Some(filter) => filter == session_id,
            None => true,
        }
    }
}

/// Registry of connected dashboard subscribers with bounded per-subscriber
/// queues. Delivery is at-most-once: a full or closed queue drops the
/// message for that subscriber only, and persistent failure evicts just
/// that subscriber.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, Arc<Subscription>>,
    queue_depth: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            queue_depth,
        }
    }

    pub fn register(
        &self,
        organization_id: OrgId,
        session_filter: Option<SessionId>,
    ) -> (Arc<Subscription>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let subscription = Arc::new(Subscription {
            id: SubscriberId::new(),
            organization_id,
            session_filter,
            tx,
            failures: AtomicUsize::new(0),
        });
        self.subscribers
            .insert(subscription.id.clone(), Arc::clone(&subscription));
        debug!(
            subscriber_id = %subscription.id,
            organization_id = %subscription.organization_id,
            "subscriber registered"
        );
        (subscription, rx)
    }

    pub fn unregister(&self, id: &SubscriberId) {
        if self.subscribers.remove(id).is_some() {
            debug!(subscriber_id = %id, "subscriber unregistered");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Subscribers belonging to exactly this organization.
    pub fn for_org(&self, organization_id: &OrgId) -> Vec<Arc<Subscription>> {
        self.subscribers
            .iter()
            .filter(|entry| &entry.value().organization_id == organization_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Queue `message` for one subscriber. Failures are isolated: the
    /// message is dropped for this subscriber, and only after repeated
    /// failures is the subscriber itself removed.
    pub fn deliver(&self, subscription: &Subscription, message: String) -> bool {
        match subscription.tx.try_send(message) {
            Ok(()) => {
                subscription.failures.store(0, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let failures = subscription.failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    subscriber_id = %subscription.id,
                    failures,
                    "subscriber queue full, dropping event"
                );
                if failures >= MAX_DELIVERY_FAILURES {
                    self.unregister(&subscription.id);
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister(&subscription.id);
                false
            }
        }
    }
}
