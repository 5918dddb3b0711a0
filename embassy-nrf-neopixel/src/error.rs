use core::fmt;

use crate::hal::PinId;

/// Error during NeoPixel driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The pixel storage cannot hold the requested number of bytes.
    ///
    /// The strip is left with zero pixels; `show` becomes a no-op until a
    /// length that fits is requested.
    BufferCapacity {
        /// Bytes needed for the requested pixel count.
        requested: usize,
        /// Bytes the storage can hold.
        capacity: usize,
    },
    /// The pin cannot be resolved or driven by the GPIO backend.
    UnsupportedPin(PinId),
    /// `show` was called before `begin`.
    NotStarted,
    /// The cycle-counted fallback was preempted on every attempt.
    TimingOverrun {
        /// Number of frames sent before giving up.
        attempts: u8,
    },
    /// A PWM unit was already registered as playing for another driver.
    PwmBusy(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::BufferCapacity {
                requested,
                capacity,
            } => write!(
                f,
                "pixel buffer of {} bytes exceeds capacity of {} bytes",
                requested, capacity
            ),
            Error::UnsupportedPin(pin) => write!(f, "pin {} is not supported", pin.0),
            Error::NotStarted => write!(f, "strip output not started, call begin() first"),
            Error::TimingOverrun { attempts } => {
                write!(f, "frame timing overrun after {} attempts", attempts)
            }
            Error::PwmBusy(unit) => write!(f, "pwm unit {} is already playing", unit),
        }
    }
}

impl core::error::Error for Error {}

/// Result type used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
