//! Pixel framebuffer in wire order with brightness scaling.

use core::ops::Range;

use heapless::Vec;
use rgb::RGB8;
use smart_leds_trait::SmartLedsWriteAsync;

use crate::chipset::{Chipset, Protocol};
use crate::error::{Error, Result};
use crate::hal::PinId;
use crate::transmitter::WaveformTransmitter;

/// Perceptual steps used by [`brightness_to_pwm`].
const PWM_LEVELS: [u8; 16] = [0, 1, 2, 3, 4, 6, 8, 12, 23, 36, 48, 70, 95, 135, 190, 255];

/// Pack red, green and blue into `0x00RRGGBB`.
pub const fn color(r: u8, g: u8, b: u8) -> u32 {
    (r as u32) << 16 | (g as u32) << 8 | b as u32
}

/// Pack red, green, blue and white into `0xWWRRGGBB`.
pub const fn color_rgbw(r: u8, g: u8, b: u8, w: u8) -> u32 {
    (w as u32) << 24 | color(r, g, b)
}

/// Map a linear 0..=255 brightness onto one of 16 perceptual steps.
pub const fn brightness_to_pwm(brightness: u8) -> u8 {
    PWM_LEVELS[(brightness >> 4) as usize]
}

fn pixel_range(index: usize, bpp: usize) -> Option<Range<usize>> {
    let start = index.checked_mul(bpp)?;
    Some(start..start.checked_add(bpp)?)
}

#[inline(always)]
const fn scale(value: u8, factor: u8) -> u8 {
    ((value as u16 * factor as u16) >> 8) as u8
}

/// A strip of `num_pixels` LEDs holding up to `MAX_BYTES` bytes of pixel
/// data.
///
/// Colors are stored already scaled by the current brightness and already in
/// the chipset's channel order, so [`show`](Self::show) hands the buffer to
/// the transmitter unchanged.
pub struct NeoPixel<T: WaveformTransmitter, const MAX_BYTES: usize> {
    transmitter: T,
    pixels: Vec<u8, MAX_BYTES>,
    /// Brightness plus one, wrapping: 0 means no scaling.
    brightness: u8,
}

impl<T: WaveformTransmitter, const MAX_BYTES: usize> NeoPixel<T, MAX_BYTES> {
    /// Strip with no pixels; call [`update_length`](Self::update_length).
    pub fn new(transmitter: T) -> Self {
        Self {
            transmitter,
            pixels: Vec::new(),
            brightness: 0,
        }
    }

    pub fn with_length(transmitter: T, num_pixels: usize) -> Result<Self> {
        let mut strip = Self::new(transmitter);
        strip.update_length(num_pixels)?;
        Ok(strip)
    }

    pub fn chipset(&self) -> Chipset {
        self.transmitter.chipset()
    }

    fn protocol(&self) -> &'static Protocol {
        self.chipset().protocol()
    }

    pub fn pin(&self) -> PinId {
        self.transmitter.pin()
    }

    pub fn transmitter(&self) -> &T {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut T {
        &mut self.transmitter
    }

    pub fn begin(&mut self) -> Result<()> {
        self.transmitter.begin()
    }

    pub fn end(&mut self) {
        self.transmitter.end();
    }

    pub fn set_pin(&mut self, pin: PinId) -> Result<()> {
        self.transmitter.set_pin(pin)
    }

    /// Resize the strip to `num_pixels` LEDs, all off.
    ///
    /// When the data does not fit in `MAX_BYTES` the strip is left with no
    /// pixels and [`show`](Self::show) does nothing.
    pub fn update_length(&mut self, num_pixels: usize) -> Result<()> {
        let requested = num_pixels.saturating_mul(self.protocol().bytes_per_pixel());
        self.pixels.clear();
        if self.pixels.resize(requested, 0).is_err() {
            warn!(
                "neopixel: {} pixels need {} bytes, capacity is {}",
                num_pixels,
                requested,
                MAX_BYTES
            );
            self.transmitter.update_length(0);
            return Err(Error::BufferCapacity {
                requested,
                capacity: MAX_BYTES,
            });
        }
        self.transmitter.update_length(requested);
        Ok(())
    }

    pub fn num_pixels(&self) -> usize {
        self.pixels.len() / self.protocol().bytes_per_pixel()
    }

    /// Pixel data in wire order.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Send the framebuffer, waiting out the latch interval of the previous
    /// frame first.
    pub async fn show(&mut self) -> Result<()> {
        if self.pixels.is_empty() {
            return Ok(());
        }
        let latch = self.protocol().latch;
        self.transmitter.transmit(&self.pixels, latch).await
    }

    #[inline]
    fn scaled(&self, value: u8) -> u8 {
        match self.brightness {
            0 => value,
            b => scale(value, b),
        }
    }

    fn store(&mut self, index: usize, r: u8, g: u8, b: u8, w: u8) {
        let protocol = self.protocol();
        let bpp = protocol.bytes_per_pixel();
        let offsets = protocol.order.offsets();
        let (r, g, b, w) = (self.scaled(r), self.scaled(g), self.scaled(b), self.scaled(w));
        let Some(pixel) = pixel_range(index, bpp).and_then(|range| self.pixels.get_mut(range)) else {
            return;
        };
        pixel[offsets.red] = protocol.red(r);
        pixel[offsets.green] = g;
        pixel[offsets.blue] = b;
        if let Some(white) = offsets.white {
            pixel[white] = w;
        }
    }

    /// Out-of-range indices are ignored. White is cleared on RGBW strips.
    pub fn set_pixel_color(&mut self, index: usize, r: u8, g: u8, b: u8) {
        self.store(index, r, g, b, 0);
    }

    /// `w` is dropped on strips without a white channel.
    pub fn set_pixel_color_rgbw(&mut self, index: usize, r: u8, g: u8, b: u8, w: u8) {
        self.store(index, r, g, b, w);
    }

    /// Set from a packed `0xWWRRGGBB` color.
    pub fn set_pixel_color_packed(&mut self, index: usize, color: u32) {
        let [w, r, g, b] = color.to_be_bytes();
        self.store(index, r, g, b, w);
    }

    /// Packed `0xWWRRGGBB` color of `index`, brightness scaling undone.
    ///
    /// Scaling is lossy: for brightness 127 and above each channel comes back
    /// within 1 of what was set. Out-of-range indices read as 0.
    pub fn get_pixel_color(&self, index: usize) -> u32 {
        let protocol = self.protocol();
        let bpp = protocol.bytes_per_pixel();
        let offsets = protocol.order.offsets();
        let Some(pixel) = pixel_range(index, bpp).and_then(|range| self.pixels.get(range)) else {
            return 0;
        };
        let unscale = |value: u8| match self.brightness {
            0 => value,
            b => ((u16::from(value) << 8).div_ceil(u16::from(b))).min(255) as u8,
        };
        let w = offsets.white.map_or(0, |white| unscale(pixel[white]));
        color_rgbw(
            unscale(pixel[offsets.red]),
            unscale(pixel[offsets.green]),
            unscale(pixel[offsets.blue]),
            w,
        )
    }

    /// Set a color scaled by `scaling / 256`, on top of the strip brightness.
    pub fn set_color_scaled(&mut self, index: usize, r: u8, g: u8, b: u8, scaling: u8) {
        self.set_pixel_color(index, scale(r, scaling), scale(g, scaling), scale(b, scaling));
    }

    pub fn set_color_scaled_rgbw(&mut self, index: usize, r: u8, g: u8, b: u8, w: u8, scaling: u8) {
        self.set_pixel_color_rgbw(
            index,
            scale(r, scaling),
            scale(g, scaling),
            scale(b, scaling),
            scale(w, scaling),
        );
    }

    /// Like [`set_color_scaled`](Self::set_color_scaled) with `brightness`
    /// mapped through [`brightness_to_pwm`].
    pub fn set_color_dimmed(&mut self, index: usize, r: u8, g: u8, b: u8, brightness: u8) {
        self.set_color_scaled(index, r, g, b, brightness_to_pwm(brightness));
    }

    pub fn set_color_dimmed_rgbw(&mut self, index: usize, r: u8, g: u8, b: u8, w: u8, brightness: u8) {
        self.set_color_scaled_rgbw(index, r, g, b, w, brightness_to_pwm(brightness));
    }

    /// Set output brightness, 0 (off) to 255 (colors used as given).
    ///
    /// Pixels already in the buffer are re-scaled in place; raising the
    /// brightness cannot restore precision lost earlier.
    pub fn set_brightness(&mut self, brightness: u8) {
        let new = brightness.wrapping_add(1);
        if new == self.brightness {
            return;
        }
        let old = self.brightness.wrapping_sub(1);
        let scale: u32 = match (old, brightness) {
            (0, _) => 0,
            (old, 255) => 65535 / u32::from(old),
            (old, _) => ((u32::from(new) << 8) - 1) / u32::from(old),
        };
        for byte in self.pixels.iter_mut() {
            *byte = ((u32::from(*byte) * scale) >> 8) as u8;
        }
        self.brightness = new;
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.wrapping_sub(1)
    }
}

impl<T: WaveformTransmitter, const MAX_BYTES: usize> Drop for NeoPixel<T, MAX_BYTES> {
    fn drop(&mut self) {
        self.transmitter.end();
    }
}

impl<T: WaveformTransmitter, const MAX_BYTES: usize> SmartLedsWriteAsync for NeoPixel<T, MAX_BYTES> {
    type Error = Error;
    type Color = RGB8;

    /// Copy the colors into the framebuffer and show it. Colors beyond the
    /// strip length are ignored.
    async fn write<I, C>(&mut self, iterator: I) -> Result<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<Self::Color>,
    {
        for (index, item) in iterator.into_iter().enumerate().take(self.num_pixels()) {
            let item = item.into();
            self.set_pixel_color(index, item.r, item.g, item.b);
        }
        self.show().await
    }
}
