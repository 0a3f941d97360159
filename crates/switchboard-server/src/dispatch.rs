use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use switchboard_core::clock::Clock;
use switchboard_core::events::SessionEvent;
use switchboard_store::SessionStore;

use crate::subscriber::{SubscriberRegistry, Subscription};

/// Fans session events out to dashboard subscribers.
///
/// Isolation rules: an event reaches only subscribers whose organization
/// strictly equals the event's — anything else is dropped and logged as a
/// security event. Delivery is at-most-once per subscriber and a failing
/// subscriber never affects the others; ordering is guaranteed only within
/// one subscriber's own stream.
pub struct BroadcastDispatcher {
    registry: Arc<SubscriberRegistry>,
    store: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
}

impl BroadcastDispatcher {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        store: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    /// Consume the session event stream until shutdown. Lagging only skips
    /// events for this consumer; it never kills the pump.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        cancel: CancellationToken,
    ) {
        info!("broadcast dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Ok(event) => self.publish(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "dispatcher lagged, events skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        info!("broadcast dispatcher stopped");
    }

    /// Deliver one event to every matching subscriber of its organization.
    pub fn publish(&self, event: &SessionEvent) {
        let message = self.envelope(event).to_string();
        for subscription in self.registry.for_org(event.organization_id()) {
            // for_org already scopes by org; this guard is the hard isolation
            // boundary in case the registry is ever refactored.
            if &subscription.organization_id != event.organization_id() {
                error!(
                    subscriber_id = %subscription.id,
                    subscriber_org = %subscription.organization_id,
                    event_org = %event.organization_id(),
                    "cross-organization delivery blocked"
                );
                continue;
            }
            if !subscription.wants(event.session_id()) {
                continue;
            }
            self.registry.deliver(&subscription, message.clone());
        }
    }

    /// Greet a fresh subscriber: an ack with its identity, then a snapshot
    /// of the org's recent sessions so a reconnecting dashboard does not
    /// need every intermediate event.
    pub fn greet(&self, subscription: &Subscription) {
        let now = self.clock.now();
        let ack = json!({
            "type": "connection_ack",
            "subscriber_id": subscription.id,
            "organization_id": subscription.organization_id,
            "timestamp": now,
        });
        self.registry.deliver(subscription, ack.to_string());

        let sessions = self.store.list_by_org(&subscription.organization_id, 20);
        let snapshot = json!({
            "type": "snapshot",
            "organization_id": subscription.organization_id,
            "sessions": sessions,
            "timestamp": now,
        });
        self.registry.deliver(subscription, snapshot.to_string());
    }

    fn envelope(&self, event: &SessionEvent) -> serde_json::Value {
        json!({
            "type": event.event_type(),
            "organization_id": event.organization_id(),
            "session_id": event.session_id(),
            "payload": event,
            "timestamp": self.clock.now(),
        })
    }
}
