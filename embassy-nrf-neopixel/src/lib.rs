//! Drive WS281x, SK6812RGBW and TM18xx addressable LED strips.
//!
//! A [`NeoPixel`] strip keeps the framebuffer in wire order and hands it to a
//! [`WaveformTransmitter`]: either [`BitBang`], which cycle-counts every bit
//! with interrupts disabled, or [`PwmDma`], which lets an nRF PWM unit play the
//! bits from RAM and falls back to cycle counting when no unit is free.
//!
//! The hardware is reached through the [`Gpio`], [`Clock`] and [`PwmPool`]
//! traits; enable one of the `nrf52832`, `nrf52833` or `nrf52840` features
//! for the implementations in [`nrf`].
//!
//! ```ignore
//! let mut config = Config::default();
//! config.chipset = Chipset::Ws2812B;
//! config.pin = gpio.add(p.P0_13)?;
//! let driver = Driver::new(&config, gpio, clock, pool, duty);
//! let mut strip = NeoPixel::<_, 96>::with_length(driver, 32)?;
//! strip.begin()?;
//! strip.set_pixel_color(0, 255, 0, 0);
//! strip.show().await?;
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod bitbang;
mod chipset;
mod error;
mod hal;
mod latch;
mod pwm;
mod registry;
mod strip;
pub mod timing;
mod transmitter;

#[cfg(feature = "nrf")]
pub mod nrf;

pub use bitbang::BitBang;
pub use chipset::{BitRate, BitTiming, ChannelOffsets, ChannelOrder, Chipset, Protocol, Pulse};
pub use error::{Error, Result};
pub use hal::{
    Clock, Gpio, Level, NoPwm, OutputPinGpio, PinId, PlaybackConfig, Prescaler, PwmPool, PwmUnit,
};
pub use latch::Latch;
pub use pwm::{DutyCycles, POLARITY_HIGH_FIRST, PwmDma, State, TERMINATOR_LEN, duty_len};
pub use registry::SequenceEndRegistry;
pub use strip::{NeoPixel, brightness_to_pwm, color, color_rgbw};
pub use transmitter::{Config, Driver, DriverKind, WaveformTransmitter};

#[cfg(all(
    feature = "nrf",
    not(any(feature = "nrf52832", feature = "nrf52833", feature = "nrf52840"))
))]
compile_error!("the `nrf` backend needs one of the `nrf52832`, `nrf52833` or `nrf52840` features");
