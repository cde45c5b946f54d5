use std::time::Duration;
use tokio::time::sleep;

/// Exponential retry delay with no retry ceiling
///
/// Subscriptions are expected to self-heal while the process runs
/// unattended, so attempts are never exhausted; only the delay is capped.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay: u64,
    max_delay: u64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: u64, max: u64) -> Self {
        Self {
            initial_delay: initial.max(1),
            max_delay: max.max(initial.max(1)),
            current_attempt: 0,
        }
    }

    /// Delay for the next attempt, in seconds
    pub fn next_delay(&self) -> u64 {
        let factor = 2_u64.saturating_pow(self.current_attempt.min(32));
        std::cmp::min(self.initial_delay.saturating_mul(factor), self.max_delay)
    }

    pub fn attempt(&self) -> u32 {
        self.current_attempt
    }

    pub async fn sleep(&mut self, topic: &str) {
        let delay = self.next_delay();

        log::warn!(
            "⏳ Retry attempt {} for {} in {}s",
            self.current_attempt + 1,
            topic,
            delay
        );

        sleep(Duration::from_secs(delay)).await;
        self.current_attempt = self.current_attempt.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}
