use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential-backoff schedule for re-establishing an engine socket.
///
/// Retry state is an explicit value advanced against an injected timestamp,
/// so the whole schedule can be tested without sleeping.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// Hard bound on each connect + handshake.
    pub attempt_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `n` (1-based): base doubled per prior attempt.
    /// `None` once the attempt budget is spent.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay.saturating_mul(1u32 << (attempt - 1).min(31)))
    }
}

/// Progress through one reconnect episode. Reset after a successful connect.
#[derive(Clone, Debug)]
pub struct RetryState {
    attempts_made: u32,
    next_eligible_at: Option<DateTime<Utc>>,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempts_made: 0,
            next_eligible_at: None,
        }
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts_made
    }

    pub fn is_exhausted(&self, policy: &ReconnectPolicy) -> bool {
        self.attempts_made >= policy.max_attempts
    }

    /// Schedule the next attempt from `now`. Returns the delay to wait, or
    /// `None` when the budget is exhausted — retries stop, never loop.
    pub fn schedule_next(&mut self, policy: &ReconnectPolicy, now: DateTime<Utc>) -> Option<Duration> {
        let delay = policy.delay_for(self.attempts_made + 1)?;
        self.attempts_made += 1;
        self.next_eligible_at =
            Some(now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()));
        Some(delay)
    }

    /// Whether the scheduled attempt may fire at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.next_eligible_at {
            Some(at) => now >= at,
            None => false,
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}
