//! Wall-clock aligned ticking.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A ticker that fires on wall-clock boundaries of its period (plus an
/// optional offset) instead of drifting from an arbitrary start instant.
///
/// An hourly ticker fires on the hour; the election-end ticker is the same
/// hourly boundary with the election duration as its offset. The next
/// boundary is recomputed after every fire, so a slow handler skips ticks
/// rather than letting them pile up.
pub struct AlignedTicker {
    period: Duration,
    offset: Duration,
}

impl AlignedTicker {
    /// Ticker firing every `period`, `offset` past each boundary.
    pub fn new(period: Duration, offset: Duration) -> Self {
        assert!(!period.is_zero(), "ticker period must be positive");
        Self { period, offset }
    }

    /// Sleep until the next boundary fires.
    pub async fn tick(&self) {
        tokio::time::sleep(self.until_next_fire()).await;
    }

    /// Time remaining until the next boundary + offset.
    fn until_next_fire(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::delay_from(now, self.period, self.offset)
    }

    /// `period − (now mod period) + offset`, the wait from `now` to the
    /// next aligned fire.
    fn delay_from(now: Duration, period: Duration, offset: Duration) -> Duration {
        let period_ns = period.as_nanos();
        let into_period = now.as_nanos() % period_ns;
        let to_boundary = period_ns - into_period;
        Duration::from_nanos(to_boundary as u64) + offset
    }
}
