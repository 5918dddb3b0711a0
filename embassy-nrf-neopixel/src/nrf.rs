//! nRF52 implementations of the hardware seams.
//!
//! PWM units are driven at register level so that the pool can scan for a
//! free unit on every frame instead of owning one for the lifetime of the
//! strip.

use core::sync::atomic::{Ordering, compiler_fence};

use cortex_m::peripheral::{DCB, DWT};
use embassy_nrf::Peri;
use embassy_nrf::gpio::{self, Flex, OutputDrive, Pull};
use embassy_nrf::interrupt::typelevel::{self, Binding, Handler, Interrupt};
use embassy_nrf::pac;
use embassy_time::Instant;
use heapless::Vec;

use crate::error::{Error, Result};
use crate::hal::{Clock, Gpio, PinId, PlaybackConfig, Prescaler, PwmPool, PwmUnit};
use crate::registry::SequenceEndRegistry;

/// HFCLK-derived core clock of the nRF52 series.
pub const CPU_HZ: u32 = 64_000_000;

#[cfg(feature = "nrf52832")]
pub const PWM_UNITS: usize = 3;
#[cfg(not(feature = "nrf52832"))]
pub const PWM_UNITS: usize = 4;

/// Channels per PWM unit.
const CHANNELS: usize = 4;
/// PSEL.OUT with CONNECT set to disconnected.
const PSEL_DISCONNECTED: u32 = 1 << 31;
/// INTEN bit of EVENTS_SEQEND[0].
const INT_SEQEND0: u32 = 1 << 4;
/// SEQ[n].CNT is 15 bits wide.
const MAX_SEQUENCE_LEN: usize = 0x7FFF;

static SEQUENCE_END: SequenceEndRegistry<PWM_UNITS> = SequenceEndRegistry::new();

fn regs(unit: PwmUnit) -> Option<pac::pwm::Pwm> {
    match unit.0 {
        0 => Some(pac::PWM0),
        1 => Some(pac::PWM1),
        2 => Some(pac::PWM2),
        #[cfg(not(feature = "nrf52832"))]
        3 => Some(pac::PWM3),
        _ => None,
    }
}

/// Cycle counter of the DWT unit.
pub struct DwtClock {
    hz: u32,
}

impl DwtClock {
    /// Enable tracing and start the cycle counter.
    pub fn new(dcb: &mut DCB, dwt: &mut DWT) -> Self {
        dcb.enable_trace();
        dwt.enable_cycle_counter();
        Self { hz: CPU_HZ }
    }
}

impl Clock for DwtClock {
    #[inline(always)]
    fn cycles(&self) -> u32 {
        DWT::cycle_count()
    }

    fn cpu_hz(&self) -> u32 {
        self.hz
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// GPIO lines registered up front, addressed by their port/pin number.
pub struct NrfGpio<const N: usize> {
    pins: Vec<(PinId, Flex<'static>), N>,
}

impl<const N: usize> Default for NrfGpio<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> NrfGpio<N> {
    pub const fn new() -> Self {
        Self { pins: Vec::new() }
    }

    /// Register `pin` and return the id used to address it.
    pub fn add<P: gpio::Pin>(&mut self, pin: Peri<'static, P>) -> Result<PinId> {
        let id = PinId(pin.port() as u8 * 32 + pin.pin());
        if self.pins.iter().any(|(known, _)| *known == id) {
            return Ok(id);
        }
        self.pins
            .push((id, Flex::new(pin)))
            .map_err(|_| Error::UnsupportedPin(id))?;
        Ok(id)
    }

    #[inline(always)]
    fn flex(&mut self, pin: PinId) -> Option<&mut Flex<'static>> {
        self.pins
            .iter_mut()
            .find_map(|(id, flex)| (*id == pin).then_some(flex))
    }
}

impl<const N: usize> Gpio for NrfGpio<N> {
    fn configure_as_output(&mut self, pin: PinId) -> Result<()> {
        let flex = self.flex(pin).ok_or(Error::UnsupportedPin(pin))?;
        flex.set_as_output(OutputDrive::Standard);
        Ok(())
    }

    fn configure_as_input(&mut self, pin: PinId) {
        if let Some(flex) = self.flex(pin) {
            flex.set_as_input(Pull::None);
        }
    }

    #[inline(always)]
    fn set_high(&mut self, pin: PinId) {
        if let Some(flex) = self.flex(pin) {
            flex.set_high();
        }
    }

    #[inline(always)]
    fn set_low(&mut self, pin: PinId) {
        if let Some(flex) = self.flex(pin) {
            flex.set_low();
        }
    }
}

/// Sequence-end interrupt handler of PWM unit `UNIT`.
pub struct InterruptHandler<const UNIT: u8> {
    _private: (),
}

macro_rules! impl_handler {
    ($irq:ident, $unit:literal) => {
        impl Handler<typelevel::$irq> for InterruptHandler<$unit> {
            unsafe fn on_interrupt() {
                let r = pac::$irq;
                if r.events_seqend(0).read() != 0 {
                    r.events_seqend(0).write_value(0);
                    r.intenclr().write(|w| w.0 = INT_SEQEND0);
                    SEQUENCE_END.notify(PwmUnit($unit));
                }
            }
        }
    };
}

impl_handler!(PWM0, 0);
impl_handler!(PWM1, 1);
impl_handler!(PWM2, 2);
#[cfg(not(feature = "nrf52832"))]
impl_handler!(PWM3, 3);

/// Stops a unit whose playback future was dropped mid-sequence.
struct StopOnDrop {
    unit: PwmUnit,
    armed: bool,
}

impl StopOnDrop {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.armed {
            if let Some(r) = regs(self.unit) {
                stop(r);
            }
            SEQUENCE_END.finish(self.unit);
        }
    }
}

fn stop(r: pac::pwm::Pwm) {
    r.intenclr().write(|w| w.0 = INT_SEQEND0);
    r.tasks_stop().write_value(1);
    r.enable().write(|w| w.0 = 0);
    for channel in 0..CHANNELS {
        r.psel().out(channel).write(|w| w.0 = PSEL_DISCONNECTED);
    }
    r.events_seqend(0).write_value(0);
}

/// The PWM units of the chip, claimed per frame.
pub struct NrfPwmPool {
    _private: (),
}

impl NrfPwmPool {
    #[cfg(feature = "nrf52832")]
    pub fn new(
        _irqs: impl Binding<typelevel::PWM0, InterruptHandler<0>>
        + Binding<typelevel::PWM1, InterruptHandler<1>>
        + Binding<typelevel::PWM2, InterruptHandler<2>>,
    ) -> Self {
        enable_interrupts();
        Self { _private: () }
    }

    #[cfg(not(feature = "nrf52832"))]
    pub fn new(
        _irqs: impl Binding<typelevel::PWM0, InterruptHandler<0>>
        + Binding<typelevel::PWM1, InterruptHandler<1>>
        + Binding<typelevel::PWM2, InterruptHandler<2>>
        + Binding<typelevel::PWM3, InterruptHandler<3>>,
    ) -> Self {
        enable_interrupts();
        Self { _private: () }
    }
}

fn enable_interrupts() {
    typelevel::PWM0::unpend();
    typelevel::PWM1::unpend();
    typelevel::PWM2::unpend();
    #[cfg(not(feature = "nrf52832"))]
    typelevel::PWM3::unpend();
    unsafe {
        typelevel::PWM0::enable();
        typelevel::PWM1::enable();
        typelevel::PWM2::enable();
        #[cfg(not(feature = "nrf52832"))]
        typelevel::PWM3::enable();
    }
}

fn is_free(r: pac::pwm::Pwm) -> bool {
    r.enable().read().0 == 0
        && (0..CHANNELS).all(|channel| r.psel().out(channel).read().0 & PSEL_DISCONNECTED != 0)
}

impl PwmPool for NrfPwmPool {
    const MAX_SEQUENCE_LEN: usize = MAX_SEQUENCE_LEN;

    fn claim(&mut self) -> Option<PwmUnit> {
        critical_section::with(|_| {
            (0..PWM_UNITS as u8).map(PwmUnit).find(|&unit| match regs(unit) {
                Some(r) if is_free(r) => {
                    r.enable().write(|w| w.0 = 1);
                    true
                }
                _ => false,
            })
        })
    }

    fn configure(&mut self, unit: PwmUnit, config: &PlaybackConfig) -> Result<()> {
        let r = regs(unit).ok_or(Error::PwmBusy(unit.0))?;
        let prescaler = match config.prescaler {
            Prescaler::Div1 => 0,
            Prescaler::Div2 => 1,
            Prescaler::Div4 => 2,
        };

        r.enable().write(|w| w.0 = 1);
        // Up counter, common load, refresh count.
        r.mode().write(|w| w.0 = 0);
        r.prescaler().write(|w| w.0 = prescaler);
        r.countertop().write(|w| w.0 = u32::from(config.counter_top));
        r.decoder().write(|w| w.0 = 0);
        r.loop_().write(|w| w.0 = 0);
        r.seq(0).refresh().write(|w| w.0 = u32::from(config.repeats));
        r.seq(0).enddelay().write(|w| w.0 = 0);
        r.psel().out(0).write(|w| w.0 = u32::from(config.pin.0));
        for channel in 1..CHANNELS {
            r.psel().out(channel).write(|w| w.0 = PSEL_DISCONNECTED);
        }
        trace!("neopixel: pwm{} top {} on pin {}", unit.0, config.counter_top, config.pin.0);
        Ok(())
    }

    async fn play(&mut self, unit: PwmUnit, owner: u32, sequence: &[u16]) -> Result<()> {
        let r = regs(unit).ok_or(Error::PwmBusy(unit.0))?;
        if sequence.len() > MAX_SEQUENCE_LEN {
            return Err(Error::PwmBusy(unit.0));
        }
        SEQUENCE_END.begin_playback(unit, owner)?;
        let guard = StopOnDrop { unit, armed: true };

        r.seq(0).ptr().write_value(sequence.as_ptr() as u32);
        r.seq(0).cnt().write(|w| w.0 = sequence.len() as u32);
        r.events_seqend(0).write_value(0);
        r.intenset().write(|w| w.0 = INT_SEQEND0);

        // Sequence must be in memory before EasyDMA reads it.
        compiler_fence(Ordering::SeqCst);
        r.tasks_seqstart(0).write_value(1);

        SEQUENCE_END.wait(unit).await;
        compiler_fence(Ordering::SeqCst);

        guard.defuse();
        SEQUENCE_END.finish(unit);
        Ok(())
    }

    fn release(&mut self, unit: PwmUnit) {
        if let Some(r) = regs(unit) {
            stop(r);
        }
    }
}
