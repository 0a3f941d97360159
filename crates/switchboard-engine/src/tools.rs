use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use switchboard_core::ids::ToolCallId;

/// One side-effecting action the engine may request mid-conversation
/// (schedule a callback, look up an order, ...).
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> Result<Value, String>;
}

/// Dispatch table for engine tool-call requests.
///
/// Every request gets a result tagged with its original `call_id` — an
/// unknown tool name or a handler failure produces an error-shaped result,
/// never a dropped call and never a crash.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub async fn dispatch(&self, name: &str, args: Value, call_id: &ToolCallId) -> Value {
        match self.handlers.get(name) {
            Some(handler) => match handler.call(args).await {
                Ok(result) => result,
                Err(message) => {
                    warn!(tool = name, call_id = %call_id, error = %message, "tool call failed");
                    json!({ "error": message })
                }
            },
            None => {
                warn!(tool = name, call_id = %call_id, "unknown tool requested");
                json!({ "error": format!("unknown tool: {name}") })
            }
        }
    }
}
