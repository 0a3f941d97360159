//! Engine-side core of the session coordinator: the outbound WebSocket to
//! the conversational-AI engine, reconnection policy, tool-call dispatch,
//! takeover control, and context assembly for new sessions.

pub mod collab;
pub mod connection;
pub mod context;
pub mod error;
pub mod retry;
pub mod takeover;
pub mod tools;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionRegistry, SessionDescriptor,
};
pub use context::{AssemblerConfig, ContextAssembler, HistorySource};
pub use error::EngineError;
pub use retry::{ReconnectPolicy, RetryState};
pub use takeover::TakeoverController;
pub use tools::{ToolHandler, ToolRegistry};
pub use transport::{EngineSocket, EngineTransport, WsTransport};
