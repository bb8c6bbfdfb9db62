//! Monotonic duration accumulation.
//!
//! Elapsed time arrives as arbitrary `Duration`s; counters advance in whole
//! ticks and the sub-tick remainder carries over to the next call, so no time
//! is lost to rounding however the driver slices it.

use std::time::Duration;

/// Converts elapsed durations into whole ticks of a fixed period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickAccumulator {
    period_nanos: u128,
    remainder_nanos: u128,
}

impl TickAccumulator {
    /// One tick per second (beacon time counter).
    #[must_use]
    pub const fn seconds() -> Self {
        Self { period_nanos: 1_000_000_000, remainder_nanos: 0 }
    }

    /// One tick per 100 ms (TLM uptime counter).
    #[must_use]
    pub const fn deciseconds() -> Self {
        Self { period_nanos: 100_000_000, remainder_nanos: 0 }
    }

    /// Add `elapsed` and return the number of whole ticks completed.
    pub fn accumulate(&mut self, elapsed: Duration) -> u64 {
        let total = self.remainder_nanos + elapsed.as_nanos();
        self.remainder_nanos = total % self.period_nanos;
        u64::try_from(total / self.period_nanos).unwrap_or(u64::MAX)
    }

    /// Time accumulated towards the next tick.
    #[must_use]
    pub fn pending(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.remainder_nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_carries_over() {
        let mut clock = TickAccumulator::seconds();

        assert_eq!(clock.accumulate(Duration::from_millis(600)), 0);
        assert_eq!(clock.accumulate(Duration::from_millis(600)), 1);
        assert_eq!(clock.pending(), Duration::from_millis(200));
        assert_eq!(clock.accumulate(Duration::from_millis(2800)), 3);
        assert_eq!(clock.pending(), Duration::ZERO);
    }

    #[test]
    fn deciseconds_tick_every_100ms() {
        let mut uptime = TickAccumulator::deciseconds();
        assert_eq!(uptime.accumulate(Duration::from_millis(1050)), 10);
        assert_eq!(uptime.accumulate(Duration::from_millis(50)), 1);
    }
}
