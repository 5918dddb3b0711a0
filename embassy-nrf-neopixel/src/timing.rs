//! Cycle-counted bit emission shared by the bit-bang driver and the PWM
//! fallback path.

use crate::chipset::{BitTiming, Protocol};
use crate::hal::{Clock, Gpio, Level, PinId};

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Convert nanoseconds to CPU cycles at `cpu_hz`, rounding.
pub const fn ns_to_cycles(ns: u32, cpu_hz: u32) -> u32 {
    ((ns as u64 * cpu_hz as u64 + NANOS_PER_SECOND / 2) / NANOS_PER_SECOND) as u32
}

/// Convert CPU cycles at `cpu_hz` to nanoseconds, rounding.
pub const fn cycles_to_ns(cycles: u64, cpu_hz: u32) -> u64 {
    (cycles * NANOS_PER_SECOND + cpu_hz as u64 / 2) / cpu_hz as u64
}

/// Active phase and full period of one bit shape, in cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitCycles {
    pub active: u32,
    pub period: u32,
}

/// Bit timing of a protocol converted to CPU cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTiming {
    pub zero: BitCycles,
    pub one: BitCycles,
}

impl CycleTiming {
    pub const fn new(timing: &BitTiming, cpu_hz: u32) -> Self {
        Self {
            zero: BitCycles {
                active: ns_to_cycles(timing.zero.active_ns, cpu_hz),
                period: ns_to_cycles(timing.zero.period_ns(), cpu_hz),
            },
            one: BitCycles {
                active: ns_to_cycles(timing.one.active_ns, cpu_hz),
                period: ns_to_cycles(timing.one.period_ns(), cpu_hz),
            },
        }
    }

    #[inline(always)]
    pub const fn bit(&self, bit: bool) -> BitCycles {
        if bit { self.one } else { self.zero }
    }

    /// Nominal duration of `bytes` on the wire, in cycles.
    pub fn frame_cycles(&self, bytes: &[u8]) -> u64 {
        bytes
            .iter()
            .map(|byte| {
                let ones = byte.count_ones();
                u64::from(ones) * u64::from(self.one.period)
                    + u64::from(8 - ones) * u64::from(self.zero.period)
            })
            .sum()
    }
}

/// Spin until `cycles` have passed since `start`. Survives counter wrap.
#[inline(always)]
pub fn spin_until<C: Clock>(clock: &C, start: u32, cycles: u32) {
    while clock.cycles().wrapping_sub(start) < cycles {}
}

/// Drives bits onto one pin, each bit anchored on its own cycle snapshot.
pub struct BitWriter<'a, G, C> {
    gpio: &'a mut G,
    clock: &'a C,
    pin: PinId,
    active: Level,
    idle: Level,
    timing: CycleTiming,
}

impl<'a, G: Gpio, C: Clock> BitWriter<'a, G, C> {
    pub fn new(gpio: &'a mut G, clock: &'a C, pin: PinId, protocol: &Protocol) -> Self {
        Self {
            gpio,
            clock,
            pin,
            active: protocol.active_level(),
            idle: protocol.idle_level,
            timing: CycleTiming::new(&protocol.timing, clock.cpu_hz()),
        }
    }

    pub fn timing(&self) -> &CycleTiming {
        &self.timing
    }

    /// Emit `bytes` MSB first. Returns the cycles spent.
    #[inline(always)]
    pub fn write(&mut self, bytes: &[u8]) -> u32 {
        let begin = self.clock.cycles();
        for &byte in bytes {
            for shift in (0..8).rev() {
                let bit = self.timing.bit((byte >> shift) & 1 != 0);
                let start = self.clock.cycles();
                self.gpio.set_level(self.pin, self.active);
                spin_until(self.clock, start, bit.active);
                self.gpio.set_level(self.pin, self.idle);
                spin_until(self.clock, start, bit.period);
            }
        }
        self.clock.cycles().wrapping_sub(begin)
    }
}
