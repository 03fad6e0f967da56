//! Exponential backoff for re-establishing a dropped live channel.

use std::time::Duration;

use tracing::info;

/// When and how often a dropped channel is re-dialed.
///
/// Disabled by default: a drop leaves the session live with a closed channel
/// until the caller reopens it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub initial: Duration,
    pub max: Duration,
    /// A channel that stayed open this long resets the delay to `initial`
    pub stable_after: Duration,
    /// Give up after this many consecutive attempts (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            stable_after: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

pub struct Backoff {
    policy: ReconnectPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            current: policy.initial,
            policy,
            attempts: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// Get the current backoff duration
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advance to the next backoff interval
    pub fn advance(&mut self) {
        self.current = (self.current * 2).min(self.policy.max);
    }

    /// Reset backoff if connection was stable
    pub fn reset_if_stable(&mut self, connection_duration: Duration) {
        if connection_duration >= self.policy.stable_after {
            info!(
                "Connection was stable for {}s, resetting backoff",
                connection_duration.as_secs()
            );
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial;
        self.attempts = 0;
    }

    /// Delay before the next attempt, or `None` when retrying is off or the
    /// attempt budget is spent. Each call counts as one attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.policy.enabled {
            return None;
        }
        if self
            .policy
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }
        let delay = self.current;
        self.attempts += 1;
        self.advance();
        Some(delay)
    }
}
