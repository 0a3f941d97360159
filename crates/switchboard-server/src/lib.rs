//! Operator-facing surface: the dashboard WebSocket endpoint, the
//! org-scoped event broadcast dispatcher, and the RPC methods operators
//! use to open, observe, and take over sessions.

pub mod dispatch;
pub mod handlers;
pub mod rpc;
pub mod server;
pub mod subscriber;

pub use dispatch::BroadcastDispatcher;
pub use handlers::AppState;
pub use server::{start_server, ServerConfig, ServerHandle};
pub use subscriber::{SubscriberRegistry, Subscription};
