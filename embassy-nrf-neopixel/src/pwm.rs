//! PWM duty-sequence transmitter.
//!
//! Every bit of the pixel buffer becomes one 16-bit duty value; a PWM unit
//! fed by EasyDMA plays the sequence while the task awaits the sequence-end
//! event. Without a free unit, or without enough duty storage, frames go out
//! through a cycle-counted loop instead.

use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::{Duration, Instant};

use crate::chipset::{Chipset, Protocol};
use crate::error::{Error, Result};
use crate::hal::{Clock, Gpio, Level, PinId, PlaybackConfig, Prescaler, PwmPool};
use crate::latch::Latch;
use crate::timing::BitWriter;
use crate::transmitter::{Config, Line, WaveformTransmitter};

/// PWM clock in MHz.
const PWM_CLOCK: u32 = 16;

/// Entries appended after the last bit to hold the idle level.
pub const TERMINATOR_LEN: usize = 2;

/// First phase of the period is high.
pub const POLARITY_HIGH_FIRST: u16 = 0x8000;

static NEXT_OWNER: AtomicU32 = AtomicU32::new(1);

/// Convert nanoseconds to PWM ticks, rounding.
const fn to_ticks(ns: u32) -> u16 {
    ((ns * PWM_CLOCK + 500) / 1000) as u16
}

/// Duty entries needed for `byte_count` bytes.
pub const fn duty_len(byte_count: usize) -> usize {
    byte_count * 8 + TERMINATOR_LEN
}

/// Duty values and period of one chipset at the 16 MHz base clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DutyCycles {
    pub zero: u16,
    pub one: u16,
    pub idle: u16,
    pub counter_top: u16,
}

impl DutyCycles {
    pub const fn new(protocol: &Protocol) -> Self {
        let flag = match protocol.idle_level {
            Level::Low => POLARITY_HIGH_FIRST,
            Level::High => 0,
        };
        Self {
            zero: to_ticks(protocol.timing.zero.active_ns) | flag,
            one: to_ticks(protocol.timing.one.active_ns) | flag,
            idle: flag,
            counter_top: to_ticks(protocol.timing.mean_period_ns()),
        }
    }

    /// Fill `sequence` with the bits of `pixels`, MSB first, followed by the
    /// terminator. Returns the number of entries written, or `None` when
    /// `sequence` is shorter than [`duty_len`] of the pixel data.
    pub fn encode(&self, pixels: &[u8], sequence: &mut [u16]) -> Option<usize> {
        let len = duty_len(pixels.len());
        let (bits, rest) = sequence.get_mut(..len)?.split_at_mut(pixels.len() * 8);
        for (&byte, slots) in pixels.iter().zip(bits.chunks_exact_mut(8)) {
            for (i, slot) in slots.iter_mut().enumerate() {
                *slot = if byte & (0x80u8 >> i) != 0 { self.one } else { self.zero };
            }
        }
        rest.fill(self.idle);
        Some(len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Idle,
    Encoding,
    Playing,
}

/// Transmitter that prefers a DMA-fed PWM unit.
pub struct PwmDma<'d, G, C, P> {
    gpio: G,
    clock: C,
    pool: P,
    chipset: Chipset,
    line: Line,
    latch: Latch,
    duty: &'d mut [u16],
    /// Entries needed for the current frame length; 0 when the storage is too
    /// small.
    duty_len: usize,
    state: State,
    owner: u32,
    max_retries: u8,
    retry_backoff_us: u32,
    overrun_percent: u16,
}

impl<'d, G: Gpio, C: Clock, P: PwmPool> PwmDma<'d, G, C, P> {
    /// `duty` must hold [`duty_len`] entries for the largest frame, or that
    /// frame is sent through the fallback loop.
    pub fn new(config: &Config, gpio: G, clock: C, pool: P, duty: &'d mut [u16]) -> Self {
        Self {
            gpio,
            clock,
            pool,
            chipset: config.chipset,
            line: Line::new(config.pin),
            latch: Latch::new(),
            duty,
            duty_len: 0,
            state: State::Idle,
            owner: NEXT_OWNER.fetch_add(1, Ordering::Relaxed),
            max_retries: config.max_retries.max(1),
            retry_backoff_us: config.retry_backoff_us,
            overrun_percent: config.overrun_percent,
        }
    }

    fn protocol(&self) -> &'static Protocol {
        self.chipset.protocol()
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Whether frames of the current length can be played by a PWM unit.
    pub fn encoder_available(&self) -> bool {
        self.duty_len != 0
    }

    pub fn release(self) -> (G, C, P) {
        (self.gpio, self.clock, self.pool)
    }

    /// A playback future dropped mid-sequence leaves the state behind; the
    /// pool has already stopped the unit.
    fn settle(&mut self) {
        if self.state != State::Idle {
            debug!("neopixel: previous playback was cancelled");
            self.state = State::Idle;
        }
    }

    fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            prescaler: Prescaler::Div1,
            counter_top: DutyCycles::new(self.protocol()).counter_top,
            repeats: 0,
            pin: self.line.pin(),
        }
    }

    /// Returns `Ok(false)` when no unit could be used and nothing was sent.
    async fn transmit_pwm(&mut self, pixels: &[u8]) -> Result<bool> {
        if !self.encoder_available() || duty_len(pixels.len()) != self.duty_len {
            return Ok(false);
        }

        self.state = State::Encoding;
        let Some(len) = DutyCycles::new(self.protocol()).encode(pixels, self.duty) else {
            self.state = State::Idle;
            return Ok(false);
        };

        let Some(unit) = self.pool.claim() else {
            debug!("neopixel: no free pwm unit");
            self.state = State::Idle;
            return Ok(false);
        };
        let config = self.playback_config();
        if let Err(e) = self.pool.configure(unit, &config) {
            self.pool.release(unit);
            self.state = State::Idle;
            return Err(e);
        }

        self.state = State::Playing;
        let result = self.pool.play(unit, self.owner, &self.duty[..len]).await;
        self.pool.release(unit);
        self.state = State::Idle;

        // The line is back under GPIO control once the unit lets go of it.
        self.gpio.set_level(config.pin, self.protocol().idle_level);
        result.map(|()| true)
    }

    fn transmit_fallback(&mut self, pixels: &[u8], latch: Duration) -> Result<()> {
        let protocol = self.protocol();
        let pin = self.line.pin();
        let bytes_per_pixel = protocol.bytes_per_pixel();

        for attempt in 1..=self.max_retries {
            let mut writer = BitWriter::new(&mut self.gpio, &self.clock, pin, protocol);
            let nominal = writer.timing().frame_cycles(pixels);

            let start = self.clock.cycles();
            for pixel in pixels.chunks(bytes_per_pixel) {
                critical_section::with(|_| writer.write(pixel));
            }
            let elapsed = self.clock.cycles().wrapping_sub(start);
            self.latch.record(&self.clock);

            if u64::from(elapsed) * 100 < nominal * u64::from(self.overrun_percent) {
                return Ok(());
            }

            warn!(
                "neopixel: frame took {} cycles, nominal {}, resending (attempt {})",
                elapsed,
                nominal,
                attempt
            );
            self.clock.block_us(self.retry_backoff_us);
            self.latch.wait(&self.clock, latch);
        }

        Err(Error::TimingOverrun {
            attempts: self.max_retries,
        })
    }
}

impl<G: Gpio, C: Clock, P: PwmPool> WaveformTransmitter for PwmDma<'_, G, C, P> {
    fn chipset(&self) -> Chipset {
        self.chipset
    }

    fn pin(&self) -> PinId {
        self.line.pin()
    }

    fn begin(&mut self) -> Result<()> {
        let idle = self.protocol().idle_level;
        self.line.begin(&mut self.gpio, idle)
    }

    fn end(&mut self) {
        self.line.end(&mut self.gpio);
    }

    fn set_pin(&mut self, pin: PinId) -> Result<()> {
        let idle = self.protocol().idle_level;
        self.line.set_pin(&mut self.gpio, pin, idle)
    }

    fn update_length(&mut self, byte_count: usize) {
        self.settle();

        let needed = duty_len(byte_count);
        if needed <= self.duty.len() && needed <= P::MAX_SEQUENCE_LEN {
            self.duty_len = needed;
        } else {
            warn!(
                "neopixel: {} duty entries do not fit storage of {}, using cycle counter",
                needed,
                self.duty.len()
            );
            self.duty_len = 0;
        }
    }

    async fn transmit(&mut self, pixels: &[u8], latch: Duration) -> Result<()> {
        if !self.line.is_started() {
            return Err(Error::NotStarted);
        }
        self.settle();
        self.latch.wait(&self.clock, latch);

        // Nothing to put on the wire, and no nominal duration to check a
        // fallback frame against.
        if pixels.is_empty() {
            self.latch.record(&self.clock);
            return Ok(());
        }

        if self.transmit_pwm(pixels).await? {
            self.latch.record(&self.clock);
            return Ok(());
        }
        self.transmit_fallback(pixels, latch)
    }

    fn last_transmit(&self) -> Option<Instant> {
        self.latch.last_end()
    }
}
