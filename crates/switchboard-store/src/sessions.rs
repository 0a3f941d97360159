use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use switchboard_core::clock::Clock;
use switchboard_core::ids::{LeadId, OrgId, SessionId};
use switchboard_core::session::{
    ConversationSession, SessionPatch, Speaker, TranscriptEntry,
};

use crate::error::StoreError;

/// TTL and bounds for the session store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Whole-session lifetime, refreshed on every write.
    pub session_ttl: Duration,
    /// Lifetime for ephemeral sub-keys.
    pub ephemeral_ttl: Duration,
    /// Transcript entries kept in memory; oldest dropped beyond this.
    pub transcript_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(6 * 60 * 60),
            ephemeral_ttl: Duration::from_secs(5 * 60),
            transcript_limit: 1000,
        }
    }
}

struct Ephemeral {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

struct Entry {
    session: ConversationSession,
    expires_at: DateTime<Utc>,
    /// Next transcript seq. Monotonic for the life of the entry, even after
    /// old transcript entries are dropped.
    next_seq: u64,
    ephemeral: HashMap<String, Ephemeral>,
}

/// In-memory TTL session store with org and lead secondary indices.
///
/// Expiry is lazy and permanent: the first read past the deadline removes the
/// entry and its index rows, and `get` reports absence as `None`, a normal
/// outcome. Per-key read-modify-write goes through the map's entry lock, so
/// concurrent field-level patches never clobber each other.
pub struct SessionStore {
    entries: DashMap<SessionId, Entry>,
    org_index: DashMap<OrgId, HashSet<SessionId>>,
    lead_index: DashMap<LeadId, SessionId>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            org_index: DashMap::new(),
            lead_index: DashMap::new(),
            config,
            clock,
        }
    }

    /// Create a new session for `(org, lead)` and index it.
    pub fn create(&self, org: &OrgId, lead: &LeadId) -> ConversationSession {
        let now = self.clock.now();
        let session = ConversationSession::new(org.clone(), lead.clone(), now);
        let id = session.id.clone();

        self.entries.insert(
            id.clone(),
            Entry {
                session: session.clone(),
                expires_at: now + self.ttl(self.config.session_ttl),
                next_seq: 1,
                ephemeral: HashMap::new(),
            },
        );
        self.org_index.entry(org.clone()).or_default().insert(id.clone());
        self.lead_index.insert(lead.clone(), id.clone());

        debug!(session_id = %id, organization_id = %org, lead_id = %lead, "session created");
        session
    }

    /// Merge `patch` into the session, refreshing its TTL. Returns the
    /// updated session, or `None` when the session is absent or expired —
    /// callers treat that exactly like expiry.
    pub fn put(&self, id: &SessionId, patch: SessionPatch) -> Option<ConversationSession> {
        let now = self.clock.now();
        {
            let mut entry = self.entries.get_mut(id)?;
            if entry.expires_at > now {
                let session = &mut entry.session;

                if let Some(status) = patch.status {
                    // Terminal statuses never regress back to a live one.
                    if !session.status.is_terminal() || status.is_terminal() {
                        session.status = status;
                    }
                }
                if let Some(ended_at) = patch.ended_at {
                    session.ended_at = Some(ended_at);
                }
                if let Some(owner) = patch.control_owner {
                    session.control_owner = owner;
                }
                if let Some(agent_id) = patch.human_agent_id {
                    session.human_agent_id = agent_id;
                }
                if let Some(last_error) = patch.last_error {
                    session.last_error = Some(last_error);
                }
                session.last_event_at = patch.last_event_at.unwrap_or(now);

                entry.expires_at = now + self.ttl(self.config.session_ttl);
                return Some(entry.session.clone());
            }
        }
        self.evict(id);
        None
    }

    /// Append one transcript entry, assigning the next seq under the entry
    /// lock. The transcript is bounded; seq keeps increasing across drops.
    pub fn append_transcript(
        &self,
        id: &SessionId,
        speaker: Speaker,
        text: impl Into<String>,
    ) -> Result<TranscriptEntry, StoreError> {
        let now = self.clock.now();
        {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
            if entry.expires_at > now {
                let seq = entry.next_seq;
                entry.next_seq += 1;

                let line = TranscriptEntry {
                    speaker,
                    text: text.into(),
                    timestamp: now,
                    seq,
                };
                entry.session.transcript.push(line.clone());
                if entry.session.transcript.len() > self.config.transcript_limit {
                    let excess = entry.session.transcript.len() - self.config.transcript_limit;
                    entry.session.transcript.drain(..excess);
                }
                entry.session.last_event_at = now;
                entry.expires_at = now + self.ttl(self.config.session_ttl);
                return Ok(line);
            }
        }
        self.evict(id);
        Err(StoreError::NotFound(format!("session {id}")))
    }

    /// Fetch a session. Absent or expired → `None`.
    pub fn get(&self, id: &SessionId) -> Option<ConversationSession> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(id)?;
            if entry.expires_at > now {
                return Some(entry.session.clone());
            }
        }
        self.evict(id);
        None
    }

    /// Store a short-lived scratch value under the session. An expired
    /// session rejects the write like any other operation on it.
    pub fn put_ephemeral(
        &self,
        id: &SessionId,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        {
            let mut entry = self
                .entries
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(format!("session {id}")))?;
            if entry.expires_at > now {
                let expires_at = now + self.ttl(self.config.ephemeral_ttl);
                entry.ephemeral.insert(key.into(), Ephemeral { value, expires_at });
                return Ok(());
            }
        }
        self.evict(id);
        Err(StoreError::NotFound(format!("session {id}")))
    }

    pub fn get_ephemeral(&self, id: &SessionId, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(id)?;
            if entry.expires_at > now {
                let eph = entry.ephemeral.get(key)?;
                return (eph.expires_at > now).then(|| eph.value.clone());
            }
        }
        self.evict(id);
        None
    }

    /// Live sessions for one organization, most recent activity first.
    pub fn list_by_org(&self, org: &OrgId, limit: usize) -> Vec<ConversationSession> {
        let ids: Vec<SessionId> = self
            .org_index
            .get(org)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut sessions: Vec<ConversationSession> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        sessions.sort_by(|a, b| b.last_event_at.cmp(&a.last_event_at));
        sessions.truncate(limit);
        sessions
    }

    /// The most recently created live session for a lead, if any.
    pub fn latest_for_lead(&self, lead: &LeadId) -> Option<ConversationSession> {
        let id = self.lead_index.get(lead).map(|r| r.clone())?;
        self.get(&id)
    }

    fn ttl(&self, ttl: Duration) -> chrono::Duration {
        chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Remove an expired entry and its index rows. Expiry is permanent.
    fn evict(&self, id: &SessionId) {
        if let Some((_, entry)) = self.entries.remove(id) {
            let org = entry.session.organization_id;
            let lead = entry.session.lead_id;
            if let Some(mut set) = self.org_index.get_mut(&org) {
                set.remove(id);
            }
            // Only clear the lead pointer when it still names this session.
            self.lead_index.remove_if(&lead, |_, latest| latest == id);
            debug!(session_id = %id, organization_id = %org, "session expired");
        }
    }
}
