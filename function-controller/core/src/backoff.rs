use tokio::time::Duration;

/// Per-key exponential backoff.
///
/// The n-th consecutive failure of a key is retried after `base * 2^n`, capped
/// at `max`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub const DEFAULT_BASE: Duration = Duration::from_millis(5);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(1000);

    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn delay(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_MAX)
    }
}
