//! Hardware seams consumed by the transmitters.
//!
//! The board-support layer implements these for a concrete chip; the
//! [`nrf`](crate::nrf) module provides implementations on top of
//! `embassy-nrf`.

use embassy_time::Instant;
use embedded_hal::digital::OutputPin;

use crate::error::{Error, Result};

/// Logical pin number, resolved by the [`Gpio`] backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinId(pub u8);

/// Logic level of the data line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Level {
    Low,
    High,
}

impl core::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

/// GPIO lines addressed by logical pin.
pub trait Gpio {
    /// Make `pin` a push-pull output.
    fn configure_as_output(&mut self, pin: PinId) -> Result<()>;
    /// Release `pin` back to a floating input.
    fn configure_as_input(&mut self, pin: PinId);
    fn set_high(&mut self, pin: PinId);
    fn set_low(&mut self, pin: PinId);

    #[inline(always)]
    fn set_level(&mut self, pin: PinId, level: Level) {
        match level {
            Level::High => self.set_high(pin),
            Level::Low => self.set_low(pin),
        }
    }
}

/// Time sources used for bit timing and latch scheduling.
pub trait Clock {
    /// Free-running CPU cycle counter. Wraps at `u32::MAX`.
    fn cycles(&self) -> u32;
    /// Frequency of [`cycles`](Clock::cycles) in Hz.
    fn cpu_hz(&self) -> u32;
    /// Monotonic time, used for the latch timestamp.
    fn now(&self) -> Instant;

    /// Spin until `us` microseconds have passed.
    fn block_us(&self, us: u32) {
        let start = self.now();
        while self.now().saturating_duration_since(start).as_micros() < u64::from(us) {}
    }
}

/// Index of a hardware PWM unit within a [`PwmPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmUnit(pub u8);

impl PwmUnit {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// PWM base clock divider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Prescaler {
    /// 16 MHz.
    #[default]
    Div1,
    /// 8 MHz.
    Div2,
    /// 4 MHz.
    Div4,
}

impl Prescaler {
    /// Counter clock in Hz.
    pub const fn hz(self) -> u32 {
        match self {
            Prescaler::Div1 => 16_000_000,
            Prescaler::Div2 => 8_000_000,
            Prescaler::Div4 => 4_000_000,
        }
    }
}

/// Everything a PWM unit needs before it can play a duty sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PlaybackConfig {
    pub prescaler: Prescaler,
    /// Counter top, i.e. one bit period in counter ticks.
    pub counter_top: u16,
    /// Extra repetitions of the sequence; 0 plays it once.
    pub repeats: u16,
    /// Output pin connected to channel 0.
    pub pin: PinId,
}

/// Pool of DMA-capable PWM units shared by every driver instance.
pub trait PwmPool {
    /// Longest duty sequence a unit can play in one go.
    const MAX_SEQUENCE_LEN: usize = usize::MAX;

    /// Claim the first unit that is neither enabled nor connected to a pin.
    fn claim(&mut self) -> Option<PwmUnit>;

    /// Program prescaler, period, playback count and output pin.
    fn configure(&mut self, unit: PwmUnit, config: &PlaybackConfig) -> Result<()>;

    /// Play `sequence` once and resolve when the unit raises its
    /// sequence-end event. `owner` identifies the waiting driver in the
    /// sequence-end registry.
    ///
    /// The sequence stays borrowed until playback finishes. Dropping the
    /// future must stop the unit before returning.
    async fn play(&mut self, unit: PwmUnit, owner: u32, sequence: &[u16]) -> Result<()>;

    /// Disable the unit and disconnect its pins so it can be claimed again.
    fn release(&mut self, unit: PwmUnit);
}

/// Pool with no PWM units. Every transmission takes the cycle-counted path.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPwm;

impl PwmPool for NoPwm {
    fn claim(&mut self) -> Option<PwmUnit> {
        None
    }

    fn configure(&mut self, unit: PwmUnit, _config: &PlaybackConfig) -> Result<()> {
        Err(Error::PwmBusy(unit.0))
    }

    async fn play(&mut self, unit: PwmUnit, _owner: u32, _sequence: &[u16]) -> Result<()> {
        Err(Error::PwmBusy(unit.0))
    }

    fn release(&mut self, _unit: PwmUnit) {}
}

/// [`Gpio`] over a single `embedded-hal` output pin.
///
/// Only the pin id given at construction resolves; the line cannot be turned
/// into an input, so [`configure_as_input`](Gpio::configure_as_input) drives
/// it low instead.
pub struct OutputPinGpio<P> {
    id: PinId,
    pin: P,
}

impl<P: OutputPin> OutputPinGpio<P> {
    pub fn new(id: PinId, mut pin: P) -> Self {
        pin.set_low().ok();
        Self { id, pin }
    }

    pub fn into_inner(self) -> P {
        self.pin
    }
}

impl<P: OutputPin> Gpio for OutputPinGpio<P> {
    fn configure_as_output(&mut self, pin: PinId) -> Result<()> {
        if pin == self.id {
            Ok(())
        } else {
            Err(Error::UnsupportedPin(pin))
        }
    }

    fn configure_as_input(&mut self, pin: PinId) {
        if pin == self.id {
            self.pin.set_low().ok();
        }
    }

    #[inline(always)]
    fn set_high(&mut self, pin: PinId) {
        if pin == self.id {
            self.pin.set_high().ok();
        }
    }

    #[inline(always)]
    fn set_low(&mut self, pin: PinId) {
        if pin == self.id {
            self.pin.set_low().ok();
        }
    }
}
