//! Simulated MCU: one cycle-accurate timeline shared by the clock, the GPIO
//! port and the PWM units, plus a decoder for the recorded waveform.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use embassy_nrf_neopixel::{
    Clock, Error, Gpio, Level, PinId, PlaybackConfig, Protocol, PwmPool, PwmUnit, Result,
    SequenceEndRegistry,
};
use embassy_time::Instant;

pub const CPU_HZ: u32 = 64_000_000;
/// Cycles per 16 MHz PWM tick.
const CYCLES_PER_TICK: u64 = (CPU_HZ / 16_000_000) as u64;
const READ_COST: u64 = 1;
const WRITE_COST: u64 = 2;
/// Idle time that separates two frames when decoding.
const FRAME_GAP_NS: u64 = 15_000;

pub const UNSUPPORTED: PinId = PinId(0xFF);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub at: u64,
    pub pin: PinId,
    pub level: Level,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy)]
struct Preemption {
    /// Clock reads before the stall hits.
    after_reads: u64,
    cycles: u64,
    /// Re-arm after this many reads, if set.
    every: Option<u64>,
}

#[derive(Debug, Default)]
struct PwmUnitState {
    enabled: bool,
    connected: bool,
    config: Option<PlaybackConfig>,
}

#[derive(Default)]
struct State {
    cycles: u64,
    reads: u64,
    preemptions: Vec<Preemption>,
    edges: Vec<Edge>,
    levels: HashMap<PinId, Level>,
    modes: HashMap<PinId, Mode>,
    units: Vec<PwmUnitState>,
    plays: usize,
    /// PWM playback starts but the sequence-end interrupt never fires.
    pwm_stalled: bool,
    /// Playbacks stopped by a dropped future.
    stopped: usize,
}

impl State {
    fn tick(&mut self, cost: u64) {
        self.cycles += cost;
        self.reads += 1;
        let reads = self.reads;
        let mut stall = 0;
        for p in self.preemptions.iter_mut() {
            if p.after_reads == reads {
                stall += p.cycles;
                if let Some(every) = p.every {
                    p.after_reads += every;
                }
            }
        }
        self.cycles += stall;
    }

    fn drive(&mut self, pin: PinId, level: Level) {
        if self.levels.get(&pin) != Some(&level) {
            self.levels.insert(pin, level);
            self.edges.push(Edge {
                at: self.cycles,
                pin,
                level,
            });
        }
    }
}

/// Handle on the simulated MCU.
#[derive(Clone, Default)]
pub struct Sim(Rc<RefCell<State>>);

impl Sim {
    pub fn new() -> Self {
        Self::default()
    }

    /// A simulated MCU with `units` PWM units, all free.
    pub fn with_pwm_units(units: usize) -> Self {
        let sim = Self::new();
        sim.0.borrow_mut().units = (0..units).map(|_| PwmUnitState::default()).collect();
        sim
    }

    pub fn gpio(&self) -> SimGpio {
        SimGpio(self.clone())
    }

    pub fn clock(&self) -> SimClock {
        SimClock(self.clone())
    }

    pub fn pwm(&self) -> SimPwm {
        SimPwm {
            sim: self.clone(),
            registry: SequenceEndRegistry::new(),
        }
    }

    /// Mark a PWM unit as used by some other peripheral driver.
    pub fn occupy_pwm(&self, unit: usize) {
        let mut state = self.0.borrow_mut();
        state.units[unit].enabled = true;
        state.units[unit].connected = true;
    }

    /// Hold every PWM playback until the future is dropped.
    pub fn stall_pwm(&self, stalled: bool) {
        self.0.borrow_mut().pwm_stalled = stalled;
    }

    /// Stall the CPU for `cycles` once, `after_reads` clock reads from now.
    pub fn preempt_once(&self, after_reads: u64, cycles: u64) {
        let mut state = self.0.borrow_mut();
        let after_reads = state.reads + after_reads;
        state.preemptions.push(Preemption {
            after_reads,
            cycles,
            every: None,
        });
    }

    /// Stall the CPU for `cycles` every `every` clock reads.
    pub fn preempt_every(&self, every: u64, cycles: u64) {
        let mut state = self.0.borrow_mut();
        let after_reads = state.reads + every;
        state.preemptions.push(Preemption {
            after_reads,
            cycles,
            every: Some(every),
        });
    }

    pub fn advance(&self, cycles: u64) {
        self.0.borrow_mut().cycles += cycles;
    }

    pub fn cycles(&self) -> u64 {
        self.0.borrow().cycles
    }

    pub fn edges(&self, pin: PinId) -> Vec<Edge> {
        self.0
            .borrow()
            .edges
            .iter()
            .filter(|e| e.pin == pin)
            .copied()
            .collect()
    }

    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.0.borrow().levels.get(&pin).copied()
    }

    pub fn mode(&self, pin: PinId) -> Option<Mode> {
        self.0.borrow().modes.get(&pin).copied()
    }

    /// Playbacks cut short by dropping the future.
    pub fn stopped_plays(&self) -> usize {
        self.0.borrow().stopped
    }

    /// Number of sequences played by PWM units.
    pub fn plays(&self) -> usize {
        self.0.borrow().plays
    }

    pub fn pwm_unit_free(&self, unit: usize) -> bool {
        let state = self.0.borrow();
        !state.units[unit].enabled && !state.units[unit].connected
    }

    pub fn pwm_config(&self, unit: usize) -> Option<PlaybackConfig> {
        self.0.borrow().units[unit].config
    }

    /// Frames recorded on `pin`, decoded against `protocol`.
    pub fn frames(&self, pin: PinId, protocol: &Protocol) -> Vec<Frame> {
        decode(&self.edges(pin), protocol)
    }
}

pub struct SimGpio(Sim);

impl Gpio for SimGpio {
    fn configure_as_output(&mut self, pin: PinId) -> Result<()> {
        if pin == UNSUPPORTED {
            return Err(Error::UnsupportedPin(pin));
        }
        self.0.0.borrow_mut().modes.insert(pin, Mode::Output);
        Ok(())
    }

    fn configure_as_input(&mut self, pin: PinId) {
        self.0.0.borrow_mut().modes.insert(pin, Mode::Input);
    }

    fn set_high(&mut self, pin: PinId) {
        let mut state = self.0.0.borrow_mut();
        state.cycles += WRITE_COST;
        state.drive(pin, Level::High);
    }

    fn set_low(&mut self, pin: PinId) {
        let mut state = self.0.0.borrow_mut();
        state.cycles += WRITE_COST;
        state.drive(pin, Level::Low);
    }
}

pub struct SimClock(Sim);

impl Clock for SimClock {
    fn cycles(&self) -> u32 {
        let mut state = self.0.0.borrow_mut();
        state.tick(READ_COST);
        state.cycles as u32
    }

    fn cpu_hz(&self) -> u32 {
        CPU_HZ
    }

    fn now(&self) -> Instant {
        let mut state = self.0.0.borrow_mut();
        state.tick(READ_COST);
        Instant::from_micros(state.cycles * 1_000_000 / u64::from(CPU_HZ))
    }
}

/// Stops the unit when a playback future is dropped before the sequence end.
struct StopOnDrop<'a> {
    sim: &'a Sim,
    registry: &'a SequenceEndRegistry<4>,
    unit: PwmUnit,
    armed: bool,
}

impl StopOnDrop<'_> {
    fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.sim.0.borrow_mut();
            if let Some(slot) = state.units.get_mut(self.unit.index()) {
                slot.enabled = false;
                slot.connected = false;
            }
            state.stopped += 1;
            drop(state);
            self.registry.finish(self.unit);
        }
    }
}

pub struct SimPwm {
    sim: Sim,
    registry: SequenceEndRegistry<4>,
}

impl PwmPool for SimPwm {
    fn claim(&mut self) -> Option<PwmUnit> {
        let mut state = self.sim.0.borrow_mut();
        let index = state.units.iter().position(|u| !u.enabled && !u.connected)?;
        state.units[index].enabled = true;
        Some(PwmUnit(index as u8))
    }

    fn configure(&mut self, unit: PwmUnit, config: &PlaybackConfig) -> Result<()> {
        let mut state = self.sim.0.borrow_mut();
        let slot = state
            .units
            .get_mut(unit.index())
            .ok_or(Error::PwmBusy(unit.0))?;
        slot.connected = true;
        slot.config = Some(*config);
        Ok(())
    }

    async fn play(&mut self, unit: PwmUnit, owner: u32, sequence: &[u16]) -> Result<()> {
        self.registry.begin_playback(unit, owner)?;
        let guard = StopOnDrop {
            sim: &self.sim,
            registry: &self.registry,
            unit,
            armed: true,
        };
        if self.sim.0.borrow().pwm_stalled {
            self.registry.wait(unit).await;
        }
        {
            let mut state = self.sim.0.borrow_mut();
            let config = state.units[unit.index()]
                .config
                .ok_or(Error::PwmBusy(unit.0))?;
            let top = u64::from(config.counter_top);
            for &duty in sequence {
                let first = if duty & 0x8000 != 0 {
                    Level::High
                } else {
                    Level::Low
                };
                let compare = u64::from(duty & 0x7FFF).min(top);
                let period_start = state.cycles;
                if compare > 0 {
                    state.drive(config.pin, first);
                }
                state.cycles = period_start + compare * CYCLES_PER_TICK;
                if compare < top {
                    state.drive(config.pin, !first);
                }
                state.cycles = period_start + top * CYCLES_PER_TICK;
            }
            state.plays += 1;
        }
        // Sequence-end interrupt.
        self.registry.notify(unit);
        self.registry.wait(unit).await;
        guard.defuse();
        self.registry.finish(unit);
        Ok(())
    }

    fn release(&mut self, unit: PwmUnit) {
        let mut state = self.sim.0.borrow_mut();
        if let Some(slot) = state.units.get_mut(unit.index()) {
            slot.enabled = false;
            slot.connected = false;
        }
    }
}

pub fn cycles_to_ns(cycles: u64) -> u64 {
    cycles * 1_000_000_000 / u64::from(CPU_HZ)
}

/// One bit as seen on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Bit {
    pub active_ns: u64,
    /// `None` for the last bit of a frame.
    pub idle_ns: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Frame {
    /// Cycle of the first active edge.
    pub start: u64,
    /// Cycle of the last idle edge.
    pub end: u64,
    pub bits: Vec<Bit>,
    /// Bits classified by the closer of the two active durations.
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Assert every phase is within the protocol tolerance.
    pub fn assert_compliant(&self, protocol: &Protocol) {
        let tolerance = u64::from(protocol.tolerance_ns);
        for (i, (bit, value)) in self.bits.iter().zip(self.values()).enumerate() {
            let pulse = protocol.timing.pulse(value);
            let active = u64::from(pulse.active_ns);
            assert!(
                bit.active_ns.abs_diff(active) <= tolerance,
                "bit {}: active {} ns, expected {} ns",
                i,
                bit.active_ns,
                active
            );
            if let Some(idle_ns) = bit.idle_ns {
                let idle = u64::from(pulse.idle_ns);
                assert!(
                    idle_ns.abs_diff(idle) <= tolerance,
                    "bit {}: idle {} ns, expected {} ns",
                    i,
                    idle_ns,
                    idle
                );
            }
        }
    }

    fn values(&self) -> impl Iterator<Item = bool> + '_ {
        self.bytes
            .iter()
            .flat_map(|byte| (0..8).rev().map(move |shift| (byte >> shift) & 1 == 1))
    }
}

/// Split `edges` into frames and decode their bits.
pub fn decode(edges: &[Edge], protocol: &Protocol) -> Vec<Frame> {
    let active = protocol.active_level();
    let zero = u64::from(protocol.timing.zero.active_ns);
    let one = u64::from(protocol.timing.one.active_ns);

    // (rise, fall) of every active pulse.
    let mut pulses = Vec::new();
    let mut rise = None;
    for edge in edges {
        if edge.level == active {
            rise = Some(edge.at);
        } else if let Some(at) = rise.take() {
            pulses.push((at, edge.at));
        }
    }

    let mut frames: Vec<Frame> = Vec::new();
    let mut current: Vec<(u64, u64)> = Vec::new();
    let mut flush = |current: &mut Vec<(u64, u64)>| {
        if current.is_empty() {
            return;
        }
        let bits: Vec<Bit> = current
            .iter()
            .enumerate()
            .map(|(i, &(rise, fall))| Bit {
                active_ns: cycles_to_ns(fall - rise),
                idle_ns: current.get(i + 1).map(|&(next, _)| cycles_to_ns(next - fall)),
            })
            .collect();
        let bytes = bits
            .chunks(8)
            .map(|chunk| {
                chunk.iter().fold(0u8, |byte, bit| {
                    let is_one = bit.active_ns.abs_diff(one) < bit.active_ns.abs_diff(zero);
                    byte << 1 | u8::from(is_one)
                })
            })
            .collect();
        frames.push(Frame {
            start: current[0].0,
            end: current[current.len() - 1].1,
            bits,
            bytes,
        });
        current.clear();
    };

    for pulse in pulses {
        if let Some(&(_, fall)) = current.last() {
            if cycles_to_ns(pulse.0 - fall) > FRAME_GAP_NS {
                flush(&mut current);
            }
        }
        current.push(pulse);
    }
    flush(&mut current);
    frames
}

/// `n` pseudo-random bytes, reproducible.
pub fn pattern(n: usize) -> Vec<u8> {
    let mut x: u32 = 0x1234_5678;
    (0..n)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}
