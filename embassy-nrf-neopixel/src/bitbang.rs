//! Cycle-counted bit-banging on any GPIO.
//!
//! Interrupts stay disabled for the whole frame, so a preemption cannot stretch
//! a bit; in exchange, nothing else runs while the frame is on the wire.

use embassy_time::{Duration, Instant};

use crate::chipset::{Chipset, Protocol};
use crate::error::{Error, Result};
use crate::hal::{Clock, Gpio, PinId};
use crate::latch::Latch;
use crate::timing::BitWriter;
use crate::transmitter::{Config, Line, WaveformTransmitter};

pub struct BitBang<G, C> {
    gpio: G,
    clock: C,
    chipset: Chipset,
    line: Line,
    latch: Latch,
}

impl<G: Gpio, C: Clock> BitBang<G, C> {
    pub fn new(config: &Config, gpio: G, clock: C) -> Self {
        Self {
            gpio,
            clock,
            chipset: config.chipset,
            line: Line::new(config.pin),
            latch: Latch::new(),
        }
    }

    fn protocol(&self) -> &'static Protocol {
        self.chipset.protocol()
    }

    pub fn release(self) -> (G, C) {
        (self.gpio, self.clock)
    }
}

impl<G: Gpio, C: Clock> WaveformTransmitter for BitBang<G, C> {
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

    fn update_length(&mut self, _byte_count: usize) {}

    async fn transmit(&mut self, pixels: &[u8], latch: Duration) -> Result<()> {
        if !self.line.is_started() {
            return Err(Error::NotStarted);
        }
        self.latch.wait(&self.clock, latch);

        let protocol = self.protocol();
        let pin = self.line.pin();
        let mut writer = BitWriter::new(&mut self.gpio, &self.clock, pin, protocol);
        let cycles = critical_section::with(|_| writer.write(pixels));

        self.latch.record(&self.clock);
        trace!("neopixel: {} bytes in {} cycles", pixels.len(), cycles);
        Ok(())
    }

    fn last_transmit(&self) -> Option<Instant> {
        self.latch.last_end()
    }
}
