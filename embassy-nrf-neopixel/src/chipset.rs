//! Protocol/timing table for the supported LED driver ICs.
//!
//! Every chipset maps to an immutable [`Protocol`] describing channel order,
//! bit timing and the latch interval the chain needs to commit a frame.

use embassy_time::Duration;

use crate::hal::Level;

/// LED driver IC on the strip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chipset {
    /// 400 kHz RGB.
    Ws2811,
    /// 800 kHz GRB, also WS2812 and WS2813.
    #[default]
    Ws2812B,
    /// WS2812B with the short 50 µs latch.
    Ws2812BFast,
    /// Alternate WS2812B type flag with identical timing.
    Ws2812B2,
    /// [`Ws2812B2`](Chipset::Ws2812B2) with the short 50 µs latch.
    Ws2812B2Fast,
    /// 400 kHz RGB (Radio Shack tri-color strip).
    Tm1803,
    /// 800 kHz RBG with inverted polarity.
    Tm1829,
    /// 800 kHz RGBW.
    Sk6812Rgbw,
}

impl Chipset {
    pub const WS2812: Chipset = Chipset::Ws2812B;
    pub const WS2813: Chipset = Chipset::Ws2812B;

    /// Numeric type flag of the chipset.
    pub const fn tag(self) -> u8 {
        match self {
            Chipset::Ws2811 => 0x00,
            Chipset::Ws2812B => 0x02,
            Chipset::Tm1803 => 0x03,
            Chipset::Tm1829 => 0x04,
            Chipset::Ws2812B2 => 0x05,
            Chipset::Sk6812Rgbw => 0x06,
            Chipset::Ws2812BFast => 0x07,
            Chipset::Ws2812B2Fast => 0x08,
        }
    }

    pub fn protocol(self) -> &'static Protocol {
        match self {
            Chipset::Ws2811 => &WS2811,
            Chipset::Ws2812B | Chipset::Ws2812B2 => &WS2812B,
            Chipset::Ws2812BFast | Chipset::Ws2812B2Fast => &WS2812B_FAST,
            Chipset::Tm1803 => &TM1803,
            Chipset::Tm1829 => &TM1829,
            Chipset::Sk6812Rgbw => &SK6812RGBW,
        }
    }
}

impl TryFrom<u8> for Chipset {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => Chipset::Ws2811,
            0x02 => Chipset::Ws2812B,
            0x03 => Chipset::Tm1803,
            0x04 => Chipset::Tm1829,
            0x05 => Chipset::Ws2812B2,
            0x06 => Chipset::Sk6812Rgbw,
            0x07 => Chipset::Ws2812BFast,
            0x08 => Chipset::Ws2812B2Fast,
            _ => return Err("invalid chipset type"),
        })
    }
}

/// Order of the color channels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelOrder {
    Rgb,
    Grb,
    Rbg,
    Rgbw,
}

/// Byte offsets of each channel within one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOffsets {
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    pub white: Option<usize>,
}

impl ChannelOrder {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ChannelOrder::Rgbw => 4,
            _ => 3,
        }
    }

    pub const fn offsets(self) -> ChannelOffsets {
        let (red, green, blue, white) = match self {
            ChannelOrder::Rgb => (0, 1, 2, None),
            ChannelOrder::Grb => (1, 0, 2, None),
            ChannelOrder::Rbg => (0, 2, 1, None),
            ChannelOrder::Rgbw => (0, 1, 2, Some(3)),
        };
        ChannelOffsets {
            red,
            green,
            blue,
            white,
        }
    }
}

/// Bit-stream frequency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitRate {
    Khz400,
    Khz800,
}

impl BitRate {
    pub const fn kilohertz(self) -> u16 {
        match self {
            BitRate::Khz400 => 400,
            BitRate::Khz800 => 800,
        }
    }
}

/// One bit on the wire: the line sits at the active level, then returns to
/// the idle level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub active_ns: u32,
    pub idle_ns: u32,
}

impl Pulse {
    pub const fn period_ns(self) -> u32 {
        self.active_ns + self.idle_ns
    }
}

/// Pulse shapes for a 0-bit and a 1-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitTiming {
    pub zero: Pulse,
    pub one: Pulse,
}

impl BitTiming {
    #[inline(always)]
    pub const fn pulse(&self, bit: bool) -> Pulse {
        if bit { self.one } else { self.zero }
    }

    /// Single bit period for generators that cannot vary it per bit.
    pub const fn mean_period_ns(&self) -> u32 {
        (self.zero.period_ns() + self.one.period_ns()) / 2
    }
}

/// Immutable wire description of a chipset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub order: ChannelOrder,
    pub rate: BitRate,
    pub timing: BitTiming,
    /// Level the line rests at between bits and between frames.
    pub idle_level: Level,
    /// Silence needed after a frame before the chain latches it.
    pub latch: Duration,
    /// Accepted deviation of every phase, in ns.
    pub tolerance_ns: u32,
    /// A red value of 255 switches the IC into a special mode.
    pub clamp_full_red: bool,
}

impl Protocol {
    pub const fn bytes_per_pixel(&self) -> usize {
        self.order.bytes_per_pixel()
    }

    /// Level driven at the start of every bit.
    pub fn active_level(&self) -> Level {
        !self.idle_level
    }

    /// Value actually written for the red channel.
    #[inline]
    pub const fn red(&self, r: u8) -> u8 {
        if self.clamp_full_red && r == 255 { 254 } else { r }
    }
}

const WS2812B_TIMING: BitTiming = BitTiming {
    zero: Pulse {
        active_ns: 350,
        idle_ns: 800,
    },
    one: Pulse {
        active_ns: 700,
        idle_ns: 600,
    },
};

const WS2811: Protocol = Protocol {
    order: ChannelOrder::Rgb,
    rate: BitRate::Khz400,
    timing: BitTiming {
        zero: Pulse {
            active_ns: 500,
            idle_ns: 2000,
        },
        one: Pulse {
            active_ns: 1200,
            idle_ns: 1300,
        },
    },
    idle_level: Level::Low,
    latch: Duration::from_micros(50),
    tolerance_ns: 150,
    clamp_full_red: false,
};

const WS2812B: Protocol = Protocol {
    order: ChannelOrder::Grb,
    rate: BitRate::Khz800,
    timing: WS2812B_TIMING,
    idle_level: Level::Low,
    latch: Duration::from_micros(300),
    tolerance_ns: 150,
    clamp_full_red: false,
};

const WS2812B_FAST: Protocol = Protocol {
    latch: Duration::from_micros(50),
    ..WS2812B
};

const TM1803: Protocol = Protocol {
    order: ChannelOrder::Rgb,
    rate: BitRate::Khz400,
    timing: BitTiming {
        zero: Pulse {
            active_ns: 680,
            idle_ns: 1360,
        },
        one: Pulse {
            active_ns: 1360,
            idle_ns: 680,
        },
    },
    idle_level: Level::Low,
    latch: Duration::from_micros(24),
    tolerance_ns: 150,
    clamp_full_red: false,
};

// Bit value is carried by the length of the leading low phase.
const TM1829: Protocol = Protocol {
    order: ChannelOrder::Rbg,
    rate: BitRate::Khz800,
    timing: BitTiming {
        zero: Pulse {
            active_ns: 300,
            idle_ns: 800,
        },
        one: Pulse {
            active_ns: 800,
            idle_ns: 300,
        },
    },
    idle_level: Level::High,
    latch: Duration::from_micros(500),
    tolerance_ns: 150,
    clamp_full_red: true,
};

const SK6812RGBW: Protocol = Protocol {
    order: ChannelOrder::Rgbw,
    rate: BitRate::Khz800,
    timing: BitTiming {
        zero: Pulse {
            active_ns: 300,
            idle_ns: 900,
        },
        one: Pulse {
            active_ns: 600,
            idle_ns: 600,
        },
    },
    idle_level: Level::Low,
    latch: Duration::from_micros(80),
    tolerance_ns: 150,
    clamp_full_red: false,
};
