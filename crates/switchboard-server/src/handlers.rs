use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use switchboard_core::events::ChannelConfig;
use switchboard_core::ids::{LeadId, OrgId, SessionId};
use switchboard_engine::{ConnectionManager, EngineError, SessionDescriptor, TakeoverController};
use switchboard_store::SessionStore;

use crate::dispatch::BroadcastDispatcher;
use crate::rpc::{
    optional_str, optional_u64, require_str, RpcRequest, RpcResponse, CONNECTION_ERROR,
    INTERNAL_ERROR, NOT_PERMITTED, SESSION_NOT_FOUND,
};
use crate::subscriber::SubscriberRegistry;

/// Shared state behind the operator surface.
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub manager: Arc<ConnectionManager>,
    pub takeover: Arc<TakeoverController>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub dispatcher: Arc<BroadcastDispatcher>,
}

/// Route one operator request to its handler.
pub async fn dispatch(state: &AppState, request: RpcRequest) -> RpcResponse {
    let RpcRequest { method, params, id } = request;
    debug!(%method, "rpc request");
    let params = params.unwrap_or(serde_json::Value::Null);

    match method.as_str() {
        "health" => RpcResponse::success(
            id,
            json!({
                "status": "ok",
                "active_connections": state.manager.registry().len(),
                "subscribers": state.subscribers.len(),
            }),
        ),
        "session.open" => session_open(state, &params, id).await,
        "session.close" => session_close(state, &params, id).await,
        "session.get" => session_get(state, &params, id),
        "session.list" => session_list(state, &params, id),
        "session.send_text" => session_send_text(state, &params, id).await,
        "takeover.start" => takeover_start(state, &params, id),
        "takeover.release" => takeover_release(state, &params, id),
        other => RpcResponse::method_not_found(id, other),
    }
}

async fn session_open(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let organization_id = match require_str(params, "organization_id") {
        Ok(v) => OrgId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let lead_id = match require_str(params, "lead_id") {
        Ok(v) => LeadId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let descriptor = SessionDescriptor {
        organization_id,
        lead_id,
        channel_config: ChannelConfig {
            channel: optional_str(params, "channel").unwrap_or("voice").to_owned(),
            language: optional_str(params, "language").map(str::to_owned),
            voice_id: optional_str(params, "voice_id").map(str::to_owned),
        },
        first_message_hint: optional_str(params, "first_message_hint").map(str::to_owned),
    };

    match state.manager.open(descriptor).await {
        Ok(handle) => RpcResponse::success(
            id,
            json!({ "session_id": handle.session_id(), "connected": handle.is_connected() }),
        ),
        Err(e) => engine_error(id, e),
    }
}

async fn session_close(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_str(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.manager.close(&session_id).await {
        Ok(()) => RpcResponse::success(id, json!({ "closed": true })),
        Err(e) => engine_error(id, e),
    }
}

fn session_get(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_str(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.store.get(&session_id) {
        Some(session) => RpcResponse::success(id, json!({ "session": session })),
        None => RpcResponse::error(id, SESSION_NOT_FOUND, format!("session {session_id} not found")),
    }
}

fn session_list(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let organization_id = match require_str(params, "organization_id") {
        Ok(v) => OrgId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let limit = optional_u64(params, "limit").unwrap_or(20) as usize;
    let sessions = state.store.list_by_org(&organization_id, limit);
    RpcResponse::success(id, json!({ "sessions": sessions }))
}

async fn session_send_text(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_str(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let text = match require_str(params, "text") {
        Ok(v) => v,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.manager.send_human_text(&session_id, text).await {
        Ok(()) => RpcResponse::success(id, json!({ "sent": true })),
        Err(e) => engine_error(id, e),
    }
}

fn takeover_start(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_str(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let agent_id = match require_str(params, "agent_id") {
        Ok(v) => v,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.takeover.takeover(&session_id, agent_id) {
        Ok(control) => RpcResponse::success(id, json!({ "control": control })),
        Err(e) => engine_error(id, e),
    }
}

fn takeover_release(
    state: &AppState,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match require_str(params, "session_id") {
        Ok(v) => SessionId::from_raw(v),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.takeover.release(&session_id) {
        Ok(control) => RpcResponse::success(id, json!({ "control": control })),
        Err(e) => engine_error(id, e),
    }
}

fn engine_error(id: Option<serde_json::Value>, error: EngineError) -> RpcResponse {
    let code = match &error {
        EngineError::SessionNotFound(_) => SESSION_NOT_FOUND,
        EngineError::NotPermitted(_) => NOT_PERMITTED,
        EngineError::Connection(_) => CONNECTION_ERROR,
        EngineError::Store(_) => INTERNAL_ERROR,
    };
    RpcResponse::error(id, code, error.to_string())
}
