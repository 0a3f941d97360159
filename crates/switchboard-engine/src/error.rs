use switchboard_core::errors::ConnectionError;
use switchboard_core::ids::SessionId;
use switchboard_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session is absent or its state has expired. An explicit outcome
    /// for operators, not a degenerate store error.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("not permitted: {0}")]
    NotPermitted(String),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
