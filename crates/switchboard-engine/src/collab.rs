//! Seams to systems that live outside the coordinator. Real implementations
//! (CRM lookups, durable transcript storage) are wired in by the binary;
//! the in-crate impls are for development and tests.

use async_trait::async_trait;
use tracing::info;

use switchboard_core::ids::{LeadId, OrgId};
use switchboard_core::session::ConversationSession;

/// Maps a raw channel identity (caller number, SMS sender) to the tenant
/// and lead it belongs to. Consulted before a session is opened.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, channel_identity: &str) -> Result<(OrgId, LeadId), String>;
}

/// Resolver that mints a fresh lead per identity under one fixed org.
/// Development use only.
pub struct StaticResolver {
    pub org: OrgId,
}

#[async_trait]
impl IdentityResolver for StaticResolver {
    async fn resolve(&self, _channel_identity: &str) -> Result<(OrgId, LeadId), String> {
        Ok((self.org.clone(), LeadId::new()))
    }
}

/// Receives each session once it reaches a terminal state, before its TTL
/// removes it from the store. Durable persistence happens behind this seam.
#[async_trait]
pub trait FinalizedSink: Send + Sync {
    async fn finalize(&self, session: &ConversationSession);
}

/// Sink that only logs. The default when no durable store is wired in.
pub struct LogSink;

#[async_trait]
impl FinalizedSink for LogSink {
    async fn finalize(&self, session: &ConversationSession) {
        info!(
            session_id = %session.id,
            organization_id = %session.organization_id,
            status = %session.status,
            transcript_len = session.transcript.len(),
            "session finalized"
        );
    }
}


#[cfg(test)]
pub mod test_support {
    use parking_lot::Mutex;
    use std::sync::Arc;

    use super::*;

    /// Sink that records every finalized session for assertions.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub sessions: Arc<Mutex<Vec<ConversationSession>>>,
    }

    #[async_trait]
    impl FinalizedSink for RecordingSink {
        async fn finalize(&self, session: &ConversationSession) {
            self.sessions.lock().push(session.clone());
        }
    }
}
