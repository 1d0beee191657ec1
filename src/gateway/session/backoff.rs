use std::time::Duration;

use crate::configs::ReconnectPolicy;

/// Exponential delay between reconnect attempts: `base * 2^(n-1)`, capped.
pub(super) struct Backoff {
    attempt: u32,
    policy: ReconnectPolicy,
}

impl Backoff {
    pub(super) fn new(policy: ReconnectPolicy) -> Self {
        Self { attempt: 0, policy }
    }

    pub(super) fn next(&mut self) -> Duration {
        self.attempt += 1;
        let factor = 2u64.saturating_pow((self.attempt - 1).min(16));
        let delay = self
            .policy
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.policy.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub(super) fn attempts(&self) -> u32 {
        self.attempt
    }

    pub(super) fn is_exhausted(&self) -> bool {
        self.policy
            .max_attempts
            .is_some_and(|max| self.attempt >= max)
    }

    pub(super) fn reset(&mut self) {
        self.attempt = 0;
    }
}
