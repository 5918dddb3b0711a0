use embassy_time::{Duration, Instant};

use crate::hal::Clock;
use crate::timing::spin_until;

/// Past this much coarse time the cycle counter is no longer consulted; it
/// wraps after a minute at nRF52 clock rates.
const COARSE_MARGIN: Duration = Duration::from_millis(1);

/// Completion time of the last frame sent by one driver instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct Latch {
    last_end: Option<(Instant, u32)>,
}

impl Latch {
    pub const fn new() -> Self {
        Self { last_end: None }
    }

    /// Block until `latch` has passed since the previous frame ended.
    pub fn wait<C: Clock>(&self, clock: &C, latch: Duration) {
        let Some((instant, cycles)) = self.last_end else {
            return;
        };
        if clock.now().saturating_duration_since(instant) > latch + COARSE_MARGIN {
            return;
        }
        let needed = latch.as_micros() * u64::from(clock.cpu_hz()) / 1_000_000;
        spin_until(clock, cycles, u32::try_from(needed).unwrap_or(u32::MAX));
    }

    pub fn record<C: Clock>(&mut self, clock: &C) {
        self.last_end = Some((clock.now(), clock.cycles()));
    }

    pub fn last_end(&self) -> Option<Instant> {
        self.last_end.map(|(instant, _)| instant)
    }
}
