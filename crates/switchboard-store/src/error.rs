#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The target session is absent or its TTL has lapsed.
    #[error("not found: {0}")]
    NotFound(String),
}
