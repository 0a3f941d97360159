use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tracing::{debug, warn};

use switchboard_core::clock::Clock;
use switchboard_core::ids::LeadId;

/// One independent source of lead history (prior-conversation summaries,
/// CRM notes, recent turns, ...). Real implementations live outside this
/// crate; the assembler only needs the read.
#[async_trait]
pub trait HistorySource: Send + Sync {
    fn name(&self) -> &str;
    async fn read(&self, lead: &LeadId) -> Result<String, String>;
}

#[derive(Clone, Debug)]
pub struct AssemblerConfig {
    /// Per-source read bound. A slow source contributes nothing.
    pub read_timeout: Duration,
    /// How long an assembled context stays fresh per lead.
    pub cache_ttl: Duration,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(800),
            cache_ttl: Duration::from_secs(60),
        }
    }
}

struct CachedContext {
    text: String,
    expires_at: DateTime<Utc>,
}

/// Builds the textual context seeded into a new engine session.
///
/// Sources are read in parallel, each under its own timeout; a failed or
/// slow source is skipped, so assembly never stalls session start — the
/// worst case is minimal context. Results are cached per lead with
/// expiry-only invalidation; bounded staleness is the accepted tradeoff.
pub struct ContextAssembler {
    sources: Vec<Arc<dyn HistorySource>>,
    cache: DashMap<LeadId, CachedContext>,
    config: AssemblerConfig,
    clock: Arc<dyn Clock>,
}

impl ContextAssembler {
    pub fn new(
        sources: Vec<Arc<dyn HistorySource>>,
        config: AssemblerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sources,
            cache: DashMap::new(),
            config,
            clock,
        }
    }

    /// Assembled context for `lead`. Deterministic for unchanged sources:
    /// sections appear in registration order under fixed headers. A cache
    /// hit performs zero source reads.
    pub async fn build(&self, lead: &LeadId) -> String {
        let now = self.clock.now();
        if let Some(cached) = self.cache.get(lead) {
            if cached.expires_at > now {
                debug!(lead_id = %lead, "context cache hit");
                return cached.text.clone();
            }
        }

        let reads = self.sources.iter().map(|source| {
            let source = Arc::clone(source);
            let lead = lead.clone();
            let timeout = self.config.read_timeout;
            async move {
                match tokio::time::timeout(timeout, source.read(&lead)).await {
                    Ok(Ok(text)) => Some((source.name().to_owned(), text)),
                    Ok(Err(e)) => {
                        warn!(source = source.name(), lead_id = %lead, error = %e, "history read failed");
                        None
                    }
                    Err(_) => {
                        warn!(source = source.name(), lead_id = %lead, "history read timed out");
                        None
                    }
                }
            }
        });

        let mut sections = Vec::new();
        for read in join_all(reads).await.into_iter().flatten() {
            let (name, text) = read;
            if !text.is_empty() {
                sections.push(format!("## {name}\n{text}"));
            }
        }
        let text = sections.join("\n\n");

        self.cache.insert(
            lead.clone(),
            CachedContext {
                text: text.clone(),
                expires_at: now
                    + chrono::Duration::from_std(self.config.cache_ttl)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
            },
        );
        text
    }
}
