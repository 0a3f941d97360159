use serde::{Deserialize, Serialize};

use crate::ids::{LeadId, OrgId, SessionId, ToolCallId};
use crate::session::{ControlOwner, SessionStatus, TranscriptEntry};

/// Asynchronous events received from the AI engine over the session socket.
///
/// This is a closed set: kinds the coordinator does not understand land in
/// `Unknown` so unhandled kinds are an explicit decision, not a silent no-op.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Interim speech-to-text for the customer, may be revised.
    TranscriptPartial { text: String },
    /// Final customer utterance.
    TranscriptFinal { text: String },
    /// AI-authored reply intended for the customer channel.
    Response { text: String },
    ToolCallRequest {
        name: String,
        args: serde_json::Value,
        call_id: ToolCallId,
    },
    Heartbeat,
    Error { message: String },
    #[serde(untagged)]
    Unknown {
        #[serde(rename = "type")]
        kind: String,
        #[serde(flatten)]
        payload: serde_json::Value,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> &str {
        match self {
            Self::TranscriptPartial { .. } => "transcript_partial",
            Self::TranscriptFinal { .. } => "transcript_final",
            Self::Response { .. } => "response",
            Self::ToolCallRequest { .. } => "tool_call_request",
            Self::Heartbeat => "heartbeat",
            Self::Error { .. } => "error",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

/// Channel configuration forwarded to the engine at session start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// "voice" or "sms".
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

/// Payload of the session-initiation message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInitConfig {
    pub context_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message_hint: Option<String>,
    pub channel_config: ChannelConfig,
}

/// Events sent to the AI engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    SessionInit {
        session_id: SessionId,
        config: SessionInitConfig,
    },
    UserText { text: String },
    UserAudioChunk {
        /// Base64-encoded audio frame.
        data: String,
    },
    /// Free-text side channel; carries takeover/release notices.
    ContextualUpdate { text: String },
    ToolCallResult {
        call_id: ToolCallId,
        result: serde_json::Value,
    },
    HeartbeatAck,
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInit { .. } => "session_init",
            Self::UserText { .. } => "user_text",
            Self::UserAudioChunk { .. } => "user_audio_chunk",
            Self::ContextualUpdate { .. } => "contextual_update",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

/// Session lifecycle events fanned out to dashboard subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: SessionId,
        organization_id: OrgId,
        lead_id: LeadId,
    },
    TranscriptAppended {
        session_id: SessionId,
        organization_id: OrgId,
        entry: TranscriptEntry,
    },
    ControlChanged {
        session_id: SessionId,
        organization_id: OrgId,
        owner: ControlOwner,
        agent_id: Option<String>,
        reason: String,
    },
    StatusChanged {
        session_id: SessionId,
        organization_id: OrgId,
        status: SessionStatus,
    },
    /// AI reply suppressed while a human holds control. Never delivered to
    /// the customer channel.
    NonAuthoritativeResponse {
        session_id: SessionId,
        organization_id: OrgId,
        text: String,
    },
    SessionEnded {
        session_id: SessionId,
        organization_id: OrgId,
        status: SessionStatus,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::TranscriptAppended { session_id, .. }
            | Self::ControlChanged { session_id, .. }
            | Self::StatusChanged { session_id, .. }
            | Self::NonAuthoritativeResponse { session_id, .. }
            | Self::SessionEnded { session_id, .. } => session_id,
        }
    }

    pub fn organization_id(&self) -> &OrgId {
        match self {
            Self::SessionStarted { organization_id, .. }
            | Self::TranscriptAppended { organization_id, .. }
            | Self::ControlChanged { organization_id, .. }
            | Self::StatusChanged { organization_id, .. }
            | Self::NonAuthoritativeResponse { organization_id, .. }
            | Self::SessionEnded { organization_id, .. } => organization_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::TranscriptAppended { .. } => "transcript_appended",
            Self::ControlChanged { .. } => "control_changed",
            Self::StatusChanged { .. } => "status_changed",
            Self::NonAuthoritativeResponse { .. } => "non_authoritative_response",
            Self::SessionEnded { .. } => "session_ended",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Speaker;

    #[test]
    fn engine_event_known_kinds_parse() {
        let cases = [
            (r#"{"type":"transcript_final","text":"hi"}"#, "transcript_final"),
            (r#"{"type":"response","text":"hello!"}"#, "response"),
            (r#"{"type":"heartbeat"}"#, "heartbeat"),
            (r#"{"type":"error","message":"boom"}"#, "error"),
        ];
        for (json, kind) in cases {
            let event: EngineEvent = serde_json::from_str(json).unwrap();
            assert_eq!(event.kind(), kind, "for {json}");
        }
    }

    #[test]
    fn engine_event_tool_call_parse() {
        let json = r#"{"type":"tool_call_request","name":"lookup_order","args":{"order_id":"o_1"},"call_id":"call_abc"}"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        match event {
            EngineEvent::ToolCallRequest { name, args, call_id } => {
                assert_eq!(name, "lookup_order");
                assert_eq!(args["order_id"], "o_1");
                assert_eq!(call_id.as_str(), "call_abc");
            }
            other => panic!("expected tool_call_request, got {other:?}"),
        }
    }

    #[test]
    fn engine_event_unknown_kind_is_preserved() {
        let json = r#"{"type":"usage_report","tokens":42}"#;
        let event: EngineEvent = serde_json::from_str(json).unwrap();
        match &event {
            EngineEvent::Unknown { kind, payload } => {
                assert_eq!(kind, "usage_report");
                assert_eq!(payload["tokens"], 42);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
        assert_eq!(event.kind(), "usage_report");
    }

    #[test]
    fn client_event_session_init_wire_shape() {
        let event = ClientEvent::SessionInit {
            session_id: SessionId::from_raw("sess_1"),
            config: SessionInitConfig {
                context_text: "Returning customer.".into(),
                first_message_hint: Some("Greet by name".into()),
                channel_config: ChannelConfig {
                    channel: "voice".into(),
                    language: Some("en-US".into()),
                    voice_id: None,
                },
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "session_init");
        assert_eq!(json["session_id"], "sess_1");
        assert_eq!(json["config"]["context_text"], "Returning customer.");
        assert_eq!(json["config"]["channel_config"]["channel"], "voice");
        assert!(json["config"]["channel_config"].get("voice_id").is_none());
    }

    #[test]
    fn client_event_kinds() {
        assert_eq!(ClientEvent::HeartbeatAck.kind(), "heartbeat_ack");
        assert_eq!(
            ClientEvent::ContextualUpdate { text: "x".into() }.kind(),
            "contextual_update"
        );
    }

    #[test]
    fn session_event_accessors() {
        let sid = SessionId::new();
        let org = OrgId::new();
        let event = SessionEvent::TranscriptAppended {
            session_id: sid.clone(),
            organization_id: org.clone(),
            entry: TranscriptEntry {
                speaker: Speaker::Ai,
                text: "hi".into(),
                timestamp: chrono::Utc::now(),
                seq: 3,
            },
        };
        assert_eq!(event.session_id(), &sid);
        assert_eq!(event.organization_id(), &org);
        assert_eq!(event.event_type(), "transcript_appended");
    }

    #[test]
    fn session_event_serde_roundtrip() {
        let events = vec![
            SessionEvent::SessionStarted {
                session_id: SessionId::new(),
                organization_id: OrgId::new(),
                lead_id: LeadId::new(),
            },
            SessionEvent::ControlChanged {
                session_id: SessionId::new(),
                organization_id: OrgId::new(),
                owner: ControlOwner::Human,
                agent_id: Some("a1".into()),
                reason: "operator takeover".into(),
            },
            SessionEvent::SessionEnded {
                session_id: SessionId::new(),
                organization_id: OrgId::new(),
                status: SessionStatus::Completed,
            },
        ];
        for event in &events {
            let json = serde_json::to_string(event).unwrap();
            let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
            let json2 = serde_json::to_string(&parsed).unwrap();
            assert_eq!(json, json2);
        }
    }
}
