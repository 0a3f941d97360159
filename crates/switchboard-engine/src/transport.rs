use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use switchboard_core::errors::ConnectionError;
use switchboard_core::events::{ClientEvent, EngineEvent};

/// One live socket to the AI engine. JSON text frames in both directions.
#[async_trait]
pub trait EngineSocket: Send {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), ConnectionError>;

    /// Next inbound event. `Some(Err(Protocol(_)))` means one malformed
    /// frame — the connection itself is still usable. `None` means the
    /// stream ended.
    async fn recv(&mut self) -> Option<Result<EngineEvent, ConnectionError>>;

    /// Locally initiated clean close.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Dials the engine. The production impl speaks WebSocket; tests swap in a
/// scripted mock.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn EngineSocket>, ConnectionError>;
}

/// `tokio-tungstenite` transport.
#[derive(Clone, Debug, Default)]
pub struct WsTransport;

#[async_trait]
impl EngineTransport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn EngineSocket>, ConnectionError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;
        debug!(status = %response.status(), "engine socket connected");
        Ok(Box::new(WsSocket { stream }))
    }
}

struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl EngineSocket for WsSocket {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), ConnectionError> {
        let json = serde_json::to_string(event)
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        self.stream
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<EngineEvent, ConnectionError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(ConnectionError::ConnectionLost(e.to_string()))),
            };
            return match message {
                Message::Text(text) => Some(
                    serde_json::from_str::<EngineEvent>(&text)
                        .map_err(|e| ConnectionError::Protocol(e.to_string())),
                ),
                Message::Binary(_) => Some(Err(ConnectionError::Protocol(
                    "unexpected binary frame".into(),
                ))),
                // Peer-initiated close is not a clean shutdown on our side.
                Message::Close(_) => Some(Err(ConnectionError::Closed { clean: false })),
                // Transport-level keepalive, not an engine event.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))
    }
}
