//! TTL-bounded in-memory conversation state, the single source of truth for
//! in-progress sessions. Durable persistence of finalized transcripts is an
//! external collaborator's job.

pub mod error;
pub mod sessions;

pub use error::StoreError;
pub use sessions::{SessionStore, StoreConfig};
