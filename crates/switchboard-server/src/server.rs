use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use switchboard_core::events::SessionEvent;
use switchboard_core::ids::{OrgId, SessionId};

use crate::handlers::{self, AppState};
use crate::rpc::{RpcRequest, RpcResponse};

pub struct ServerConfig {
    pub port: u16,
    pub subscriber_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9091,
            subscriber_queue: 256,
        }
    }
}

/// Keeps the server and its background tasks alive; dropping the handle
/// does not stop them, `shutdown()` does.
pub struct ServerHandle {
    pub port: u16,
    cancel: CancellationToken,
    _server: tokio::task::JoinHandle<()>,
    _dispatcher: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Bind, start the broadcast pump, and serve until shutdown.
pub async fn start_server(
    config: ServerConfig,
    state: Arc<AppState>,
    events: broadcast::Receiver<SessionEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let cancel = CancellationToken::new();

    let dispatcher = tokio::spawn(
        Arc::clone(&state.dispatcher).run(events, cancel.clone()),
    );

    let router = build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    let local_addr = listener.local_addr()?;

    info!(port = local_addr.port(), "switchboard server started");

    let serve_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
            .await
            .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        cancel,
        _server: server,
        _dispatcher: dispatcher,
    })
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    org: Option<String>,
    session: Option<String>,
}

/// Dashboard subscription endpoint: `/ws?org=...&session=...`. The org is
/// mandatory — it is the isolation boundary for everything delivered on
/// this socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Some(org) = query.org.filter(|org| !org.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "missing org query parameter").into_response();
    };
    let organization_id = OrgId::from_raw(org);
    let session_filter = query.session.map(SessionId::from_raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, organization_id, session_filter))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    organization_id: OrgId,
    session_filter: Option<SessionId>,
) {
    let (subscription, mut rx) = state
        .subscribers
        .register(organization_id.clone(), session_filter);
    info!(
        subscriber_id = %subscription.id,
        organization_id = %organization_id,
        "dashboard subscriber connected"
    );
    state.dispatcher.greet(&subscription);

    let (mut sink, mut stream) = socket.split();

    // Writer: everything queued for this subscriber, events and RPC
    // responses alike, goes out in queue order.
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(WsMessage::Text(message.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!(subscriber_id = %subscription.id, error = %e, "socket error");
                break;
            }
        };
        match message {
            WsMessage::Text(text) => {
                let response = match serde_json::from_str::<RpcRequest>(&text) {
                    Ok(request) => handlers::dispatch(&state, request).await,
                    Err(_) => RpcResponse::parse_error(),
                };
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        state.subscribers.deliver(&subscription, json);
                    }
                    Err(e) => warn!(error = %e, "response serialization failed"),
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    state.subscribers.unregister(&subscription.id);
    writer.abort();
    info!(subscriber_id = %subscription.id, "dashboard subscriber disconnected");
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = handlers::dispatch(
        &state,
        RpcRequest {
            method: "health".into(),
            params: None,
            id: None,
        },
    )
    .await;
    axum::Json(response.result.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::clock::{Clock, ManualClock};
    use switchboard_core::ids::LeadId;
    use switchboard_engine::collab::LogSink;
    use switchboard_engine::{
        AssemblerConfig, ConnectionConfig, ConnectionManager, ConnectionRegistry,
        ContextAssembler, TakeoverController, ToolRegistry, WsTransport,
    };
    use switchboard_store::{SessionStore, StoreConfig};

    use crate::dispatch::BroadcastDispatcher;
    use crate::subscriber::SubscriberRegistry;

    fn state() -> (Arc<AppState>, broadcast::Sender<SessionEvent>) {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        let store = Arc::new(SessionStore::new(StoreConfig::default(), Arc::clone(&clock)));
        let registry = Arc::new(ConnectionRegistry::new());
        let (events, _) = broadcast::channel(256);
        let assembler = Arc::new(ContextAssembler::new(
            vec![],
            AssemblerConfig::default(),
            Arc::clone(&clock),
        ));
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&store),
            Arc::new(WsTransport),
            assembler,
            Arc::new(ToolRegistry::new()),
            Arc::clone(&registry),
            events.clone(),
            Arc::new(LogSink),
            Arc::clone(&clock),
            ConnectionConfig::default(),
        ));
        let takeover = Arc::new(TakeoverController::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            events.clone(),
            Arc::clone(&clock),
        ));
        let subscribers = Arc::new(SubscriberRegistry::new(256));
        let dispatcher = Arc::new(BroadcastDispatcher::new(
            Arc::clone(&subscribers),
            Arc::clone(&store),
            clock,
        ));
        (
            Arc::new(AppState {
                store,
                manager,
                takeover,
                subscribers,
                dispatcher,
            }),
            events,
        )
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (state, events) = state();
        state.store.create(&OrgId::new(), &LeadId::new());

        let handle = start_server(
            ServerConfig {
                port: 0,
                ..Default::default()
            },
            state,
            events.subscribe(),
        )
        .await
        .unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        handle.shutdown();
    }

    #[test]
    fn build_router_creates_routes() {
        let (state, _events) = state();
        let _router = build_router(state);
    }
}
