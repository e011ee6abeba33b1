//! Reconnection delay schedule

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `delay(n) = min(base * 2^n, cap)`.
///
/// Pure and deterministic. The attempt counter lives in the connection state
/// machine, which resets it to zero on every successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Default unit delay
    pub const DEFAULT_BASE: Duration = Duration::from_millis(1000);

    /// Multiple of the base used as ceiling when no cap is given
    pub const CAP_FACTOR: u32 = 30;

    /// Default ceiling, thirty times the unit
    pub const DEFAULT_CAP: Duration = Duration::from_millis(30_000);

    /// Create a schedule; a cap below the base is raised to the base.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap: cap.max(base) }
    }

    /// Schedule capped at [`CAP_FACTOR`](Self::CAP_FACTOR) times `base`
    pub fn with_base(base: Duration) -> Self {
        Self::new(base, base.saturating_mul(Self::CAP_FACTOR))
    }

    /// Wait before reconnection attempt `attempt` (zero-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE, Self::DEFAULT_CAP)
    }
}
