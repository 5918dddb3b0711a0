//! Sequence-end dispatch from PWM interrupts to the waiting driver.

use core::cell::Cell;

use critical_section::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::{Error, Result};
use crate::hal::PwmUnit;

/// One slot per PWM unit: which driver is playing on it, and the signal the
/// interrupt handler raises when the sequence ends.
pub struct SequenceEndRegistry<const N: usize> {
    ends: [Signal<CriticalSectionRawMutex, ()>; N],
    owners: Mutex<Cell<[Option<u32>; N]>>,
}

impl<const N: usize> Default for SequenceEndRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SequenceEndRegistry<N> {
    pub const fn new() -> Self {
        Self {
            ends: [const { Signal::new() }; N],
            owners: Mutex::new(Cell::new([None; N])),
        }
    }

    /// Register `owner` as the driver playing on `unit`.
    pub fn begin_playback(&self, unit: PwmUnit, owner: u32) -> Result<()> {
        let index = unit.index();
        if index >= N {
            return Err(Error::PwmBusy(unit.0));
        }
        critical_section::with(|cs| {
            let cell = self.owners.borrow(cs);
            let mut owners = cell.get();
            match owners[index] {
                Some(current) if current != owner => Err(Error::PwmBusy(unit.0)),
                _ => {
                    owners[index] = Some(owner);
                    cell.set(owners);
                    self.ends[index].reset();
                    Ok(())
                }
            }
        })
    }

    /// Called from the interrupt handler of `unit`.
    pub fn notify(&self, unit: PwmUnit) {
        if let Some(end) = self.ends.get(unit.index()) {
            end.signal(());
        }
    }

    /// Resolve once the interrupt handler reported the end of the sequence.
    pub async fn wait(&self, unit: PwmUnit) {
        if let Some(end) = self.ends.get(unit.index()) {
            end.wait().await;
        }
    }

    /// Clear the slot of `unit`.
    pub fn finish(&self, unit: PwmUnit) {
        let index = unit.index();
        if index >= N {
            return;
        }
        critical_section::with(|cs| {
            let cell = self.owners.borrow(cs);
            let mut owners = cell.get();
            owners[index] = None;
            cell.set(owners);
        });
        self.ends[index].reset();
    }

    pub fn owner(&self, unit: PwmUnit) -> Option<u32> {
        critical_section::with(|cs| self.owners.borrow(cs).get().get(unit.index()).copied().flatten())
    }
}
