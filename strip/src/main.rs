#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_nrf::bind_interrupts;
use embassy_nrf_neopixel::nrf::{DwtClock, InterruptHandler, NrfGpio, NrfPwmPool};
use embassy_nrf_neopixel::{Chipset, Config, Driver, NeoPixel, duty_len};
use embassy_time::{Duration, Timer};
use smart_leds::{
    RGB8, SmartLedsWriteAsync as _,
    hsv::{Hsv, hsv2rgb},
};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

const NUM_LEDS: usize = 8;
const NUM_BYTES: usize = NUM_LEDS * 3;
static DUTY: StaticCell<[u16; duty_len(NUM_BYTES)]> = StaticCell::new();

bind_interrupts!(struct Irqs {
    PWM0 => InterruptHandler<0>;
    PWM1 => InterruptHandler<1>;
    PWM2 => InterruptHandler<2>;
    PWM3 => InterruptHandler<3>;
});

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());
    let mut core = defmt::unwrap!(cortex_m::Peripherals::take());

    let mut gpio: NrfGpio<1> = NrfGpio::new();
    let pin = defmt::unwrap!(gpio.add(p.P0_13));
    let clock = DwtClock::new(&mut core.DCB, &mut core.DWT);

    let mut config = Config::default();
    config.chipset = Chipset::Ws2812B;
    config.pin = pin;

    let duty = DUTY.init([0u16; duty_len(NUM_BYTES)]);
    let driver = Driver::new(&config, gpio, clock, NrfPwmPool::new(Irqs), duty);
    let mut strip: NeoPixel<_, NUM_BYTES> = defmt::unwrap!(NeoPixel::with_length(driver, NUM_LEDS));
    defmt::unwrap!(strip.begin());
    strip.set_brightness(64);

    defmt::info!("Running {} pixels on {}", strip.num_pixels(), strip.chipset());

    let mut hue_offset = 0u8;
    loop {
        let mut colors = [RGB8::default(); NUM_LEDS];

        for (i, color) in colors.iter_mut().enumerate() {
            let hue = hue_offset.wrapping_add((i as u8) * 32);
            *color = hsv2rgb(Hsv { hue, sat: 255, val: 255 });
        }

        if let Err(e) = strip.write(colors).await {
            defmt::warn!("Frame dropped: {}", e);
        }
        hue_offset = hue_offset.wrapping_add(4);
        Timer::after(Duration::from_millis(25)).await;
    }
}
