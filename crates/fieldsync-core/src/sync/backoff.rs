//! Exponential backoff between attempts of the same operation.

use std::time::Duration;

use crate::config::EngineConfig;
use crate::models::Operation;

/// `delay(retries) = min(base * 2^retries, max)`, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
}

impl Backoff {
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: duration_millis(base),
            max_ms: duration_millis(max),
        }
    }

    pub const fn from_config(config: &EngineConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
        }
    }

    /// Wait required after an attempt that left `retries` on the operation
    pub fn delay(&self, retries: u32) -> Duration {
        Duration::from_millis(self.delay_millis(retries))
    }

    pub fn delay_millis(&self, retries: u32) -> u64 {
        let factor = 1_u64.checked_shl(retries).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Earliest Unix ms at which `op` may be attempted again.
    ///
    /// `None` for an operation that was never attempted: it is eligible now.
    pub fn next_eligible_at(&self, op: &Operation) -> Option<i64> {
        let last_attempt = op.last_attempt?;
        let delay = i64::try_from(self.delay_millis(op.retries)).unwrap_or(i64::MAX);
        Some(last_attempt.saturating_add(delay))
    }

    /// Whether the backoff window of `op` has elapsed at `now`
    pub fn is_eligible(&self, op: &Operation, now: i64) -> bool {
        match self.next_eligible_at(op) {
            Some(at) => now >= at,
            None => true,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Delay for `retries` with the default 1s base and 30s cap
pub fn delay(retries: u32) -> Duration {
    Backoff::default().delay(retries)
}

#[allow(clippy::cast_possible_truncation)] // u64 milliseconds is ~584 million years
const fn duration_millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewOperation, OperationKind};
    use serde_json::json;

    #[test]
    fn reference_delays() {
        assert_eq!(delay(0), Duration::from_millis(1_000));
        assert_eq!(delay(1), Duration::from_millis(2_000));
        assert_eq!(delay(2), Duration::from_millis(4_000));
        assert_eq!(delay(4), Duration::from_millis(16_000));
        assert_eq!(delay(5), Duration::from_millis(30_000));
        assert_eq!(delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn delay_is_monotonic_and_capped() {
        for retries in 0..200 {
            assert!(delay(retries) <= delay(retries + 1), "retries = {retries}");
            assert!(delay(retries) <= Duration::from_millis(30_000));
        }
        assert_eq!(delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn custom_bounds() {
        let backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(2));
        assert_eq!(backoff.delay(0), Duration::from_millis(250));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
    }

    #[test]
    fn never_attempted_is_eligible_immediately() {
        let op = crate::models::Operation::new(
            NewOperation::new(OperationKind::UpdateTicket, json!({ "id": "t-1" })),
            0,
        );
        let backoff = Backoff::default();
        assert_eq!(backoff.next_eligible_at(&op), None);
        assert!(backoff.is_eligible(&op, i64::MIN));
    }

    #[test]
    fn eligibility_waits_for_window() {
        let mut op = crate::models::Operation::new(
            NewOperation::new(OperationKind::UpdateTicket, json!({ "id": "t-1" })),
            0,
        );
        op.retries = 2;
        op.last_attempt = Some(10_000);

        let backoff = Backoff::default();
        assert_eq!(backoff.next_eligible_at(&op), Some(14_000));
        assert!(!backoff.is_eligible(&op, 13_999));
        assert!(backoff.is_eligible(&op, 14_000));
    }
}
