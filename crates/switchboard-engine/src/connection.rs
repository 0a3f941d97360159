use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use switchboard_core::clock::Clock;
use switchboard_core::errors::ConnectionError;
use switchboard_core::events::{
    ChannelConfig, ClientEvent, EngineEvent, SessionEvent, SessionInitConfig,
};
use switchboard_core::ids::{LeadId, OrgId, SessionId};
use switchboard_core::session::{ControlOwner, SessionPatch, SessionStatus, Speaker};
use switchboard_store::SessionStore;

use crate::collab::FinalizedSink;
use crate::context::ContextAssembler;
use crate::error::EngineError;
use crate::retry::{ReconnectPolicy, RetryState};
use crate::tools::ToolRegistry;
use crate::transport::{EngineSocket, EngineTransport};

/// Everything needed to open a new engine session.
#[derive(Clone, Debug)]
pub struct SessionDescriptor {
    pub organization_id: OrgId,
    pub lead_id: LeadId,
    pub channel_config: ChannelConfig,
    pub first_message_hint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub engine_url: String,
    pub reconnect: ReconnectPolicy,
    /// Outbound queue depth per session. Send fails fast once full.
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            engine_url: "ws://127.0.0.1:9090/session".into(),
            reconnect: ReconnectPolicy::default(),
            outbound_buffer: 64,
        }
    }
}

/// Client half of one session's engine socket. Cheap to clone; the socket
/// itself lives in the session task.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    session_id: SessionId,
    outbound: mpsc::Sender<ClientEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue an event for the engine. Fails fast while the socket is down
    /// or the queue is full — never unbounded buffering.
    pub fn send(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        self.outbound
            .try_send(event)
            .map_err(|_| ConnectionError::NotConnected)
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// Live engine connections by session.
#[derive(Default)]
pub struct ConnectionRegistry {
    handles: DashMap<SessionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<ConnectionHandle> {
        self.handles.get(id).map(|h| h.clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn register(&self, handle: ConnectionHandle) {
        self.handles.insert(handle.session_id.clone(), handle);
    }

    fn remove(&self, id: &SessionId) {
        self.handles.remove(id);
    }
}

/// Owns the engine side of every active session: opens sockets, runs the
/// per-session read loop, supervises reconnection, and finalizes sessions
/// on clean close. A failure here degrades one session, never the process.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<SessionStore>,
    transport: Arc<dyn EngineTransport>,
    assembler: Arc<ContextAssembler>,
    tools: Arc<ToolRegistry>,
    registry: Arc<ConnectionRegistry>,
    events: broadcast::Sender<SessionEvent>,
    sink: Arc<dyn FinalizedSink>,
    clock: Arc<dyn Clock>,
    config: ConnectionConfig,
}

impl ConnectionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn EngineTransport>,
        assembler: Arc<ContextAssembler>,
        tools: Arc<ToolRegistry>,
        registry: Arc<ConnectionRegistry>,
        events: broadcast::Sender<SessionEvent>,
        sink: Arc<dyn FinalizedSink>,
        clock: Arc<dyn Clock>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                assembler,
                tools,
                registry,
                events,
                sink,
                clock,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Open a new session: create state, assemble context, connect, send
    /// `session_init`, and hand the socket to a background task.
    pub async fn open(
        &self,
        descriptor: SessionDescriptor,
    ) -> Result<ConnectionHandle, EngineError> {
        let inner = &self.inner;
        let session = inner
            .store
            .create(&descriptor.organization_id, &descriptor.lead_id);
        let session_id = session.id.clone();
        info!(
            session_id = %session_id,
            organization_id = %descriptor.organization_id,
            lead_id = %descriptor.lead_id,
            "opening session"
        );

        let context_text = inner.assembler.build(&descriptor.lead_id).await;
        let init = SessionInitConfig {
            context_text,
            first_message_hint: descriptor.first_message_hint.clone(),
            channel_config: descriptor.channel_config.clone(),
        };

        let mut socket = match inner.connect_once(&session_id, &init).await {
            Ok(socket) => socket,
            Err(e) => {
                inner
                    .store
                    .put(&session_id, SessionPatch::error(e.to_string()));
                return Err(e.into());
            }
        };

        inner
            .store
            .put(&session_id, SessionPatch::status(SessionStatus::Active));
        let _ = inner.events.send(SessionEvent::SessionStarted {
            session_id: session_id.clone(),
            organization_id: descriptor.organization_id.clone(),
            lead_id: descriptor.lead_id.clone(),
        });
        let _ = inner.events.send(SessionEvent::StatusChanged {
            session_id: session_id.clone(),
            organization_id: descriptor.organization_id.clone(),
            status: SessionStatus::Active,
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(inner.config.outbound_buffer);
        let connected = Arc::new(AtomicBool::new(true));
        let handle = ConnectionHandle {
            session_id: session_id.clone(),
            outbound: outbound_tx,
            connected: Arc::clone(&connected),
            cancel: CancellationToken::new(),
        };
        inner.registry.register(handle.clone());

        let task = SessionTask {
            inner: Arc::clone(inner),
            session_id,
            organization_id: descriptor.organization_id,
            init,
            outbound_rx,
            connected,
            cancel: handle.cancel.clone(),
        };
        tokio::spawn(async move {
            task.run(&mut socket).await;
        });

        Ok(handle)
    }

    /// Clean close: the session completes, the transcript is finalized, and
    /// no reconnection happens.
    pub async fn close(&self, session_id: &SessionId) -> Result<(), EngineError> {
        if let Some(handle) = self.inner.registry.get(session_id) {
            handle.shutdown();
            return Ok(());
        }
        // No live socket, but the session may still be in the store
        // (connect never succeeded, or retries already gave up).
        let session = self
            .inner
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        if !session.status.is_terminal() {
            self.inner
                .finalize(session_id, &session.organization_id)
                .await;
        }
        Ok(())
    }

    /// Human-authored customer-facing text. Only valid while a human holds
    /// control; appends to the transcript and keeps the engine in the loop
    /// through the contextual side channel.
    pub async fn send_human_text(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<(), EngineError> {
        let session = self
            .inner
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::SessionNotFound(session_id.clone()))?;
        if session.control_owner != ControlOwner::Human {
            return Err(EngineError::NotPermitted(
                "session is ai-controlled; take over first".into(),
            ));
        }

        let entry = self
            .inner
            .store
            .append_transcript(session_id, Speaker::Human, text)?;
        let _ = self.inner.events.send(SessionEvent::TranscriptAppended {
            session_id: session_id.clone(),
            organization_id: session.organization_id.clone(),
            entry,
        });

        if let Some(handle) = self.inner.registry.get(session_id) {
            if let Err(e) = handle.send(ClientEvent::ContextualUpdate {
                text: format!("Human agent replied to the customer: {text}"),
            }) {
                debug!(session_id = %session_id, error = %e, "engine not informed of human reply");
            }
        }
        Ok(())
    }
}

impl Inner {
    async fn connect_once(
        &self,
        session_id: &SessionId,
        init: &SessionInitConfig,
    ) -> Result<Box<dyn EngineSocket>, ConnectionError> {
        let timeout = self.config.reconnect.attempt_timeout;
        let mut socket = tokio::time::timeout(timeout, self.transport.connect(&self.config.engine_url))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout(timeout))??;
        socket
            .send(&ClientEvent::SessionInit {
                session_id: session_id.clone(),
                config: init.clone(),
            })
            .await?;
        Ok(socket)
    }

    async fn finalize(&self, session_id: &SessionId, organization_id: &OrgId) {
        let now = self.clock.now();
        let finalized = self.store.put(
            session_id,
            SessionPatch {
                status: Some(SessionStatus::Completed),
                ended_at: Some(now),
                ..Default::default()
            },
        );
        self.registry.remove(session_id);
        let _ = self.events.send(SessionEvent::SessionEnded {
            session_id: session_id.clone(),
            organization_id: organization_id.clone(),
            status: SessionStatus::Completed,
        });
        if let Some(session) = finalized {
            self.sink.finalize(&session).await;
        }
        info!(session_id = %session_id, "session closed");
    }

    fn fail(&self, session_id: &SessionId, organization_id: &OrgId, reason: &str) {
        self.store.put(session_id, SessionPatch::error(reason));
        self.registry.remove(session_id);
        let _ = self.events.send(SessionEvent::StatusChanged {
            session_id: session_id.clone(),
            organization_id: organization_id.clone(),
            status: SessionStatus::Error,
        });
        warn!(session_id = %session_id, reason, "session failed");
    }
}

impl Clone for ConnectionManager {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Step {
    Cancelled,
    Outbound(Option<ClientEvent>),
    Inbound(Option<Result<EngineEvent, ConnectionError>>),
}

/// Per-session background task: pumps the socket, dispatches inbound
/// events, and supervises reconnection.
struct SessionTask {
    inner: Arc<Inner>,
    session_id: SessionId,
    organization_id: OrgId,
    init: SessionInitConfig,
    outbound_rx: mpsc::Receiver<ClientEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl SessionTask {
    async fn run(mut self, socket: &mut Box<dyn EngineSocket>) {
        let cancel = self.cancel.clone();
        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Cancelled,
                maybe = self.outbound_rx.recv() => Step::Outbound(maybe),
                inbound = socket.recv() => Step::Inbound(inbound),
            };

            match step {
                // Local clean close, or every handle dropped: finalize.
                Step::Cancelled | Step::Outbound(None) => {
                    let _ = socket.close().await;
                    self.inner
                        .finalize(&self.session_id, &self.organization_id)
                        .await;
                    return;
                }
                Step::Outbound(Some(event)) => {
                    if let Err(e) = socket.send(&event).await {
                        warn!(session_id = %self.session_id, error = %e, "outbound send failed");
                        if !self.recover(socket).await {
                            return;
                        }
                    }
                }
                Step::Inbound(Some(Ok(event))) => {
                    if let Err(e) = self.dispatch(event, socket).await {
                        warn!(session_id = %self.session_id, error = %e, "reply send failed");
                        if !self.recover(socket).await {
                            return;
                        }
                    }
                }
                // One bad frame: log, drop, keep the connection.
                Step::Inbound(Some(Err(ConnectionError::Protocol(message)))) => {
                    warn!(session_id = %self.session_id, %message, "malformed engine frame dropped");
                }
                Step::Inbound(Some(Err(e))) => {
                    warn!(
                        session_id = %self.session_id,
                        error_kind = e.error_kind(),
                        error = %e,
                        "engine connection lost"
                    );
                    if !self.recover(socket).await {
                        return;
                    }
                }
                Step::Inbound(None) => {
                    warn!(session_id = %self.session_id, "engine stream ended");
                    if !self.recover(socket).await {
                        return;
                    }
                }
            }
        }
    }

    /// Reconnect with exponential backoff. `false` means the session is
    /// over (retries exhausted or shutdown requested).
    async fn recover(&self, socket: &mut Box<dyn EngineSocket>) -> bool {
        self.connected.store(false, Ordering::SeqCst);
        let policy = self.inner.config.reconnect.clone();
        let mut state = RetryState::new();

        loop {
            let Some(delay) = state.schedule_next(&policy, self.inner.clock.now()) else {
                self.inner.fail(
                    &self.session_id,
                    &self.organization_id,
                    &format!("reconnect attempts exhausted after {}", state.attempts_made()),
                );
                return false;
            };

            info!(
                session_id = %self.session_id,
                attempt = state.attempts_made(),
                delay_ms = delay.as_millis() as u64,
                "reconnecting to engine"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.inner
                        .finalize(&self.session_id, &self.organization_id)
                        .await;
                    return false;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.inner.connect_once(&self.session_id, &self.init).await {
                Ok(fresh) => {
                    *socket = fresh;
                    self.connected.store(true, Ordering::SeqCst);
                    info!(session_id = %self.session_id, "engine connection restored");
                    return true;
                }
                Err(e) => {
                    warn!(
                        session_id = %self.session_id,
                        attempt = state.attempts_made(),
                        error = %e,
                        "reconnect attempt failed"
                    );
                }
            }
        }
    }

    async fn dispatch(
        &self,
        event: EngineEvent,
        socket: &mut Box<dyn EngineSocket>,
    ) -> Result<(), ConnectionError> {
        trace!(session_id = %self.session_id, kind = event.kind(), "engine event");
        match event {
            // Interim STT, revised by a later final. Observability only.
            EngineEvent::TranscriptPartial { text } => {
                trace!(session_id = %self.session_id, chars = text.len(), "partial transcript");
            }
            EngineEvent::TranscriptFinal { text } => {
                self.append(Speaker::Customer, &text);
            }
            EngineEvent::Response { text } => self.handle_response(text),
            EngineEvent::ToolCallRequest { name, args, call_id } => {
                let result = self.inner.tools.dispatch(&name, args, &call_id).await;
                socket
                    .send(&ClientEvent::ToolCallResult { call_id, result })
                    .await?;
            }
            EngineEvent::Heartbeat => {
                socket.send(&ClientEvent::HeartbeatAck).await?;
            }
            EngineEvent::Error { message } => {
                warn!(session_id = %self.session_id, %message, "engine reported error");
                self.inner.store.put(
                    &self.session_id,
                    SessionPatch {
                        last_error: Some(message),
                        ..Default::default()
                    },
                );
            }
            EngineEvent::Unknown { kind, .. } => {
                warn!(session_id = %self.session_id, %kind, "unhandled engine event kind");
            }
        }
        Ok(())
    }

    /// AI replies are authoritative only while the AI holds control. Under
    /// human control they are recorded for operator review and broadcast as
    /// non-authoritative, never delivered to the customer channel.
    fn handle_response(&self, text: String) {
        let owner = self
            .inner
            .store
            .get(&self.session_id)
            .map(|s| s.control_owner);
        match owner {
            Some(ControlOwner::Ai) => {
                self.append(Speaker::Ai, &text);
            }
            Some(ControlOwner::Human) => {
                let suppressed = serde_json::json!({
                    "text": text,
                    "at": self.inner.clock.now(),
                });
                if let Err(e) =
                    self.inner
                        .store
                        .put_ephemeral(&self.session_id, "suppressed_ai", suppressed)
                {
                    warn!(session_id = %self.session_id, error = %e, "could not record suppressed reply");
                }
                let _ = self.inner.events.send(SessionEvent::NonAuthoritativeResponse {
                    session_id: self.session_id.clone(),
                    organization_id: self.organization_id.clone(),
                    text,
                });
            }
            None => {
                warn!(session_id = %self.session_id, "response for expired session dropped");
            }
        }
    }

    fn append(&self, speaker: Speaker, text: &str) {
        match self
            .inner
            .store
            .append_transcript(&self.session_id, speaker, text)
        {
            Ok(entry) => {
                let _ = self.inner.events.send(SessionEvent::TranscriptAppended {
                    session_id: self.session_id.clone(),
                    organization_id: self.organization_id.clone(),
                    entry,
                });
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "transcript append failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::collab::test_support::RecordingSink;
    use crate::context::AssemblerConfig;
    use crate::tools::ToolHandler;
    use crate::transport::mock::MockTransport;
    use async_trait::async_trait;
    use serde_json::json;
    use switchboard_core::clock::ManualClock;
    use switchboard_core::ids::ToolCallId;
    use switchboard_store::StoreConfig;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(json!({ "echo": args }))
        }
    }

    struct Harness {
        manager: Arc<ConnectionManager>,
        transport: Arc<MockTransport>,
        store: Arc<SessionStore>,
        events: broadcast::Sender<SessionEvent>,
        sink: RecordingSink,
    }

    fn harness() -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let store = Arc::new(SessionStore::new(StoreConfig::default(), Arc::clone(&clock)));
        let transport = Arc::new(MockTransport::new());
        let assembler = Arc::new(ContextAssembler::new(
            vec![],
            AssemblerConfig::default(),
            Arc::clone(&clock),
        ));
        let mut tools = ToolRegistry::new();
        tools.register("echo", Arc::new(Echo));
        let (events, _) = broadcast::channel(256);
        let sink = RecordingSink::default();
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn EngineTransport>,
            assembler,
            Arc::new(tools),
            Arc::new(ConnectionRegistry::new()),
            events.clone(),
            Arc::new(sink.clone()),
            clock,
            ConnectionConfig::default(),
        ));
        Harness {
            manager,
            transport,
            store,
            events,
            sink,
        }
    }

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            organization_id: OrgId::new(),
            lead_id: LeadId::new(),
            channel_config: ChannelConfig {
                channel: "voice".into(),
                ..Default::default()
            },
            first_message_hint: None,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn open_activates_session_and_sends_init() {
        let h = harness();
        h.transport.push_script(vec![]);

        let handle = h.manager.open(descriptor()).await.unwrap();
        assert!(handle.is_connected());

        let session = h.store.get(handle.session_id()).unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        let sent = h.transport.sent_events();
        assert!(matches!(&sent[0], ClientEvent::SessionInit { session_id, .. } if session_id == handle.session_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_open_marks_session_error() {
        let h = harness();
        h.transport.fail_next_connects(1);

        let err = h.manager.open(descriptor()).await.unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
        assert!(h.manager.registry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_is_acknowledged() {
        let h = harness();
        h.transport.push_script(vec![Ok(EngineEvent::Heartbeat)]);

        h.manager.open(descriptor()).await.unwrap();
        settle().await;

        assert!(h
            .transport
            .sent_events()
            .iter()
            .any(|e| matches!(e, ClientEvent::HeartbeatAck)));
    }

    #[tokio::test(start_paused = true)]
    async fn transcript_final_appends_customer_entry() {
        let h = harness();
        h.transport.push_script(vec![Ok(EngineEvent::TranscriptFinal {
            text: "I'd like to reschedule".into(),
        })]);
        let mut rx = h.events.subscribe();

        let handle = h.manager.open(descriptor()).await.unwrap();
        settle().await;

        let transcript = h.store.get(handle.session_id()).unwrap().transcript;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Customer);

        let mut saw_append = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::TranscriptAppended { .. }) {
                saw_append = true;
            }
        }
        assert!(saw_append);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_response_appends_while_ai_controlled() {
        let h = harness();
        h.transport.push_script(vec![Ok(EngineEvent::Response {
            text: "Happy to help!".into(),
        })]);

        let handle = h.manager.open(descriptor()).await.unwrap();
        settle().await;

        let transcript = h.store.get(handle.session_id()).unwrap().transcript;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Ai);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_response_suppressed_while_human_controlled() {
        let h = harness();
        h.transport.push_script(vec![Ok(EngineEvent::Response {
            text: "Automated reply".into(),
        })]);
        let mut rx = h.events.subscribe();

        let handle = h.manager.open(descriptor()).await.unwrap();
        h.store
            .put(
                handle.session_id(),
                SessionPatch::control(ControlOwner::Human, Some("a1".into())),
            )
            .unwrap();
        settle().await;

        // Recorded, not part of the authoritative transcript.
        let session = h.store.get(handle.session_id()).unwrap();
        assert!(session.transcript.is_empty());
        let suppressed = h
            .store
            .get_ephemeral(handle.session_id(), "suppressed_ai")
            .unwrap();
        assert_eq!(suppressed["text"], "Automated reply");

        let mut saw_non_authoritative = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::NonAuthoritativeResponse { .. }) {
                saw_non_authoritative = true;
            }
        }
        assert!(saw_non_authoritative);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_result_carries_original_call_id() {
        let h = harness();
        let call_id = ToolCallId::new();
        h.transport.push_script(vec![Ok(EngineEvent::ToolCallRequest {
            name: "echo".into(),
            args: json!({"q": 7}),
            call_id: call_id.clone(),
        })]);

        h.manager.open(descriptor()).await.unwrap();
        settle().await;

        let sent = h.transport.sent_events();
        let result = sent
            .iter()
            .find_map(|e| match e {
                ClientEvent::ToolCallResult { call_id: id, result } if *id == call_id => {
                    Some(result.clone())
                }
                _ => None,
            })
            .expect("tool result sent");
        assert_eq!(result["echo"]["q"], 7);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tool_still_answers_with_call_id() {
        let h = harness();
        let call_id = ToolCallId::new();
        h.transport.push_script(vec![Ok(EngineEvent::ToolCallRequest {
            name: "no_such_tool".into(),
            args: json!({}),
            call_id: call_id.clone(),
        })]);

        h.manager.open(descriptor()).await.unwrap();
        settle().await;

        let sent = h.transport.sent_events();
        assert!(sent.iter().any(|e| matches!(
            e,
            ClientEvent::ToolCallResult { call_id: id, result }
                if *id == call_id && result.get("error").is_some()
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn non_clean_drop_reconnects_and_reinitializes() {
        let h = harness();
        h.transport
            .push_script(vec![Err(ConnectionError::Closed { clean: false })]);
        h.transport.push_script(vec![]);

        let handle = h.manager.open(descriptor()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(h.transport.connect_count(), 2);
        assert!(handle.is_connected());
        assert_eq!(
            h.store.get(handle.session_id()).unwrap().status,
            SessionStatus::Active
        );
        let inits = h
            .transport
            .sent_events()
            .iter()
            .filter(|e| matches!(e, ClientEvent::SessionInit { .. }))
            .count();
        assert_eq!(inits, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_fail_the_session() {
        let h = harness();
        h.transport
            .push_script(vec![Err(ConnectionError::ConnectionLost("reset".into()))]);

        let handle = h.manager.open(descriptor()).await.unwrap();
        // Every reconnect attempt is refused; the initial connect was not.
        h.transport.fail_next_connects(5);
        // 2 + 4 + 8 + 16 + 32 seconds of backoff.
        tokio::time::sleep(Duration::from_secs(70)).await;

        let session = h.store.get(handle.session_id()).unwrap();
        assert_eq!(session.status, SessionStatus::Error);
        assert!(session.last_error.unwrap().contains("exhausted"));
        assert!(h.manager.registry().is_empty());
        assert!(!handle.is_connected());
        // Initial connect plus exactly five retries, then stop.
        assert_eq!(h.transport.connect_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn close_completes_and_finalizes() {
        let h = harness();
        h.transport.push_script(vec![]);
        let mut rx = h.events.subscribe();

        let handle = h.manager.open(descriptor()).await.unwrap();
        h.manager.close(handle.session_id()).await.unwrap();
        settle().await;

        let session = h.store.get(handle.session_id()).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.ended_at.is_some());
        assert!(h.manager.registry().is_empty());
        assert_eq!(h.sink.sessions.lock().len(), 1);

        let mut saw_ended = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::SessionEnded { .. }) {
                saw_ended = true;
            }
        }
        assert!(saw_ended);
    }

    #[tokio::test(start_paused = true)]
    async fn close_unknown_session_is_not_found() {
        let h = harness();
        let err = h.manager.close(&SessionId::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn send_human_text_requires_human_control() {
        let h = harness();
        h.transport.push_script(vec![]);
        let handle = h.manager.open(descriptor()).await.unwrap();

        let err = h
            .manager
            .send_human_text(handle.session_id(), "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotPermitted(_)));

        h.store
            .put(
                handle.session_id(),
                SessionPatch::control(ControlOwner::Human, Some("a1".into())),
            )
            .unwrap();
        h.manager
            .send_human_text(handle.session_id(), "hello from a human")
            .await
            .unwrap();
        settle().await;

        let transcript = h.store.get(handle.session_id()).unwrap().transcript;
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript[0].speaker, Speaker::Human);
        assert!(h
            .transport
            .sent_events()
            .iter()
            .any(|e| matches!(e, ClientEvent::ContextualUpdate { .. })));
    }
}
