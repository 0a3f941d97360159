use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use switchboard_core::clock::Clock;
use switchboard_core::events::{ClientEvent, SessionEvent};
use switchboard_core::ids::SessionId;
use switchboard_core::session::{ControlOwner, ControlState, SessionPatch};
use switchboard_store::SessionStore;

use crate::connection::ConnectionRegistry;
use crate::error::EngineError;

/// Governs whether the AI or a human authors customer-facing content.
///
/// Two states, ai_controlled and human_controlled, with idempotent
/// transitions: repeating a takeover or a release is safe, so operator
/// double-clicks and webhook retries cannot corrupt control state. The
/// engine is kept in the loop via contextual side-channel notices; a dead
/// socket only skips the notice, control state itself always lands.
pub struct TakeoverController {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Sender<SessionEvent>,
    clock: Arc<dyn Clock>,
}

impl TakeoverController {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ConnectionRegistry>,
        events: broadcast::Sender<SessionEvent>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            clock,
        }
    }

    /// Hand control to `agent_id`. Already-human sessions just update the
    /// agent attribution.
    pub fn takeover(
        &self,
        session_id: &SessionId,
        agent_id: &str,
    ) -> Result<ControlState, EngineError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;

        match session.control_owner {
            ControlOwner::Human if session.human_agent_id.as_deref() == Some(agent_id) => {
                debug!(session_id = %session_id, agent_id, "takeover repeated, no-op");
                return Ok(session.control_state());
            }
            ControlOwner::Human => {
                let updated = self
                    .apply(session_id, ControlOwner::Human, Some(agent_id.to_owned()))?;
                self.announce(session_id, &updated, "agent reassigned");
                info!(session_id = %session_id, agent_id, "takeover agent updated");
                return Ok(updated);
            }
            ControlOwner::Ai => {}
        }

        let updated = self.apply(session_id, ControlOwner::Human, Some(agent_id.to_owned()))?;
        self.announce(session_id, &updated, "operator takeover");
        self.notify_engine(
            session_id,
            "A human agent has taken over this conversation. Do not reply to the customer until control is returned.",
        );
        info!(session_id = %session_id, agent_id, "human takeover");
        Ok(updated)
    }

    /// Return control to the AI. No-op when the AI already holds it.
    pub fn release(&self, session_id: &SessionId) -> Result<ControlState, EngineError> {
        let session = self
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;

        if session.control_owner == ControlOwner::Ai {
            debug!(session_id = %session_id, "release repeated, no-op");
            return Ok(session.control_state());
        }

        let updated = self.apply(session_id, ControlOwner::Ai, None)?;
        self.announce(session_id, &updated, "returned to ai");
        self.notify_engine(
            session_id,
            "The human agent has left. You are responsible for replying to the customer again.",
        );
        info!(session_id = %session_id, "control released to ai");
        Ok(updated)
    }

    pub fn control_state(&self, session_id: &SessionId) -> Result<ControlState, EngineError> {
        self.store
            .get(session_id)
            .map(|s| s.control_state())
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))
    }

    fn apply(
        &self,
        session_id: &SessionId,
        owner: ControlOwner,
        agent_id: Option<String>,
    ) -> Result<ControlState, EngineError> {
        let mut patch = SessionPatch::control(owner, agent_id);
        patch.last_event_at = Some(self.clock.now());
        self.store
            .put(session_id, patch)
            .map(|s| s.control_state())
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))
    }

    fn announce(&self, session_id: &SessionId, state: &ControlState, reason: &str) {
        if let Some(session) = self.store.get(session_id) {
            let _ = self.events.send(SessionEvent::ControlChanged {
                session_id: session_id.clone(),
                organization_id: session.organization_id,
                owner: state.owner,
                agent_id: state.agent_id.clone(),
                reason: reason.to_owned(),
            });
        }
    }

    fn notify_engine(&self, session_id: &SessionId, text: &str) {
        if let Some(handle) = self.registry.get(session_id) {
            if let Err(e) = handle.send(ClientEvent::ContextualUpdate {
                text: text.to_owned(),
            }) {
                debug!(session_id = %session_id, error = %e, "engine notice skipped");
            }
        }
    }
}
