use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{LeadId, OrgId, SessionId};

/// Lifecycle state of a conversation session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiated,
    Active,
    Completed,
    Error,
}

impl SessionStatus {
    /// Completed and errored sessions never return to an earlier state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiated => write!(f, "initiated"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(Self::Initiated),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Which actor currently authors outbound customer-facing content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlOwner {
    Ai,
    Human,
}

impl std::fmt::Display for ControlOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ai => write!(f, "ai"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Who produced a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Customer,
    Ai,
    Human,
}

/// One line of a session transcript. `seq` is strictly increasing per
/// session and never reused, even after old entries are dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

/// Authoritative state of one conversation session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,
    pub organization_id: OrgId,
    pub lead_id: LeadId,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub control_owner: ControlOwner,
    pub human_agent_id: Option<String>,
    pub transcript: Vec<TranscriptEntry>,
    pub last_event_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl ConversationSession {
    pub fn new(organization_id: OrgId, lead_id: LeadId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            organization_id,
            lead_id,
            status: SessionStatus::Initiated,
            started_at: now,
            ended_at: None,
            control_owner: ControlOwner::Ai,
            human_agent_id: None,
            transcript: Vec::new(),
            last_event_at: now,
            last_error: None,
        }
    }

    /// Control view consumed by the takeover state machine.
    pub fn control_state(&self) -> ControlState {
        ControlState {
            session_id: self.id.clone(),
            owner: self.control_owner,
            changed_at: self.last_event_at,
            agent_id: self.human_agent_id.clone(),
        }
    }
}

/// Read-only view of who controls a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlState {
    pub session_id: SessionId,
    pub owner: ControlOwner,
    pub changed_at: DateTime<Utc>,
    pub agent_id: Option<String>,
}

/// Field-level update merged into an existing session by the store.
///
/// Absent fields are left untouched, so concurrent writers touching
/// different fields cannot clobber each other. Transcript appends go
/// through their own store operation, never through a patch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub ended_at: Option<DateTime<Utc>>,
    pub control_owner: Option<ControlOwner>,
    /// `Some(None)` clears the agent, `Some(Some(id))` sets it.
    pub human_agent_id: Option<Option<String>>,
    pub last_error: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Some(SessionStatus::Error),
            last_error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn control(owner: ControlOwner, agent_id: Option<String>) -> Self {
        Self {
            control_owner: Some(owner),
            human_agent_id: Some(agent_id),
            ..Default::default()
        }
    }
}
