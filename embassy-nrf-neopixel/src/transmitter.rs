use embassy_time::{Duration, Instant};

use crate::bitbang::BitBang;
use crate::chipset::Chipset;
use crate::error::Result;
use crate::hal::{Clock, Gpio, Level, PinId, PwmPool};
use crate::pwm::PwmDma;

/// Turns a pixel byte buffer into the timed waveform on the data line.
pub trait WaveformTransmitter {
    /// Chipset the waveform is shaped for.
    fn chipset(&self) -> Chipset;

    fn pin(&self) -> PinId;

    /// Configure the data pin as an output resting at the idle level.
    fn begin(&mut self) -> Result<()>;

    /// Return the data pin to an input.
    fn end(&mut self);

    /// Move output to `pin`. After [`begin`](Self::begin) the old pin is
    /// released and the new one configured immediately.
    fn set_pin(&mut self, pin: PinId) -> Result<()>;

    /// Prepare for frames of `byte_count` bytes.
    fn update_length(&mut self, byte_count: usize);

    /// Send `pixels`, starting no earlier than `latch` after the previous
    /// frame completed.
    async fn transmit(&mut self, pixels: &[u8], latch: Duration) -> Result<()>;

    /// Completion time of the last frame.
    fn last_transmit(&self) -> Option<Instant>;
}

/// Transmission strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverKind {
    /// Cycle-counted bit-banging with interrupts disabled for the frame.
    BitBang,
    /// PWM duty sequence played by DMA, cycle-counted fallback.
    #[default]
    PwmDma,
}

/// Driver configuration.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub chipset: Chipset,
    /// Data pin.
    pub pin: PinId,
    pub driver: DriverKind,
    /// Frames sent by the fallback loop before giving up on preemption.
    pub max_retries: u8,
    /// Pause before a frame is resent, in µs.
    pub retry_backoff_us: u32,
    /// A frame taking at least this share of its nominal duration, in
    /// percent, counts as preempted.
    pub overrun_percent: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chipset: Chipset::default(),
            pin: PinId(0),
            driver: DriverKind::default(),
            max_retries: 8,
            retry_backoff_us: 300,
            overrun_percent: 125,
        }
    }
}

/// Data line shared by both strategies.
#[derive(Debug)]
pub(crate) struct Line {
    pin: PinId,
    started: bool,
}

impl Line {
    pub(crate) const fn new(pin: PinId) -> Self {
        Self {
            pin,
            started: false,
        }
    }

    pub(crate) fn pin(&self) -> PinId {
        self.pin
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn begin<G: Gpio>(&mut self, gpio: &mut G, idle: Level) -> Result<()> {
        gpio.configure_as_output(self.pin)?;
        gpio.set_level(self.pin, idle);
        self.started = true;
        debug!("neopixel: output on pin {}", self.pin.0);
        Ok(())
    }

    pub(crate) fn end<G: Gpio>(&mut self, gpio: &mut G) {
        if self.started {
            gpio.configure_as_input(self.pin);
            self.started = false;
        }
    }

    pub(crate) fn set_pin<G: Gpio>(&mut self, gpio: &mut G, pin: PinId, idle: Level) -> Result<()> {
        if !self.started {
            self.pin = pin;
            return Ok(());
        }
        self.end(gpio);
        self.pin = pin;
        self.begin(gpio, idle)
    }
}

/// One of the two transmitters, picked from [`Config::driver`].
pub enum Driver<'d, G, C, P> {
    BitBang(BitBang<G, C>),
    PwmDma(PwmDma<'d, G, C, P>),
}

impl<'d, G: Gpio, C: Clock, P: PwmPool> Driver<'d, G, C, P> {
    /// `duty` is only used by [`DriverKind::PwmDma`].
    pub fn new(config: &Config, gpio: G, clock: C, pool: P, duty: &'d mut [u16]) -> Self {
        match config.driver {
            DriverKind::BitBang => Driver::BitBang(BitBang::new(config, gpio, clock)),
            DriverKind::PwmDma => Driver::PwmDma(PwmDma::new(config, gpio, clock, pool, duty)),
        }
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Driver::BitBang(_) => DriverKind::BitBang,
            Driver::PwmDma(_) => DriverKind::PwmDma,
        }
    }
}

impl<G: Gpio, C: Clock, P: PwmPool> WaveformTransmitter for Driver<'_, G, C, P> {
    fn chipset(&self) -> Chipset {
        match self {
            Driver::BitBang(t) => t.chipset(),
            Driver::PwmDma(t) => t.chipset(),
        }
    }

    fn pin(&self) -> PinId {
        match self {
            Driver::BitBang(t) => t.pin(),
            Driver::PwmDma(t) => t.pin(),
        }
    }

    fn begin(&mut self) -> Result<()> {
        match self {
            Driver::BitBang(t) => t.begin(),
            Driver::PwmDma(t) => t.begin(),
        }
    }

    fn end(&mut self) {
        match self {
            Driver::BitBang(t) => t.end(),
            Driver::PwmDma(t) => t.end(),
        }
    }

    fn set_pin(&mut self, pin: PinId) -> Result<()> {
        match self {
            Driver::BitBang(t) => t.set_pin(pin),
            Driver::PwmDma(t) => t.set_pin(pin),
        }
    }

    fn update_length(&mut self, byte_count: usize) {
        match self {
            Driver::BitBang(t) => t.update_length(byte_count),
            Driver::PwmDma(t) => t.update_length(byte_count),
        }
    }

    async fn transmit(&mut self, pixels: &[u8], latch: Duration) -> Result<()> {
        match self {
            Driver::BitBang(t) => t.transmit(pixels, latch).await,
            Driver::PwmDma(t) => t.transmit(pixels, latch).await,
        }
    }

    fn last_transmit(&self) -> Option<Instant> {
        match self {
            Driver::BitBang(t) => t.last_transmit(),
            Driver::PwmDma(t) => t.last_transmit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.chipset, Chipset::Ws2812B);
        assert_eq!(config.driver, DriverKind::PwmDma);
        assert_eq!(config.max_retries, 8);
        assert_eq!(config.retry_backoff_us, 300);
        assert_eq!(config.overrun_percent, 125);
    }
}
