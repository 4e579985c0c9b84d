// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Pico board bring-up and the board side of the loader hooks.

use brisk_core::entry::Backdoor;
use brisk_core::{ErrorKind, Hooks, Watchdog};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use rp2040_hal::clocks::{init_clocks_and_plls, UsbClock};
use rp2040_hal::fugit::ExtU32;
use rp2040_hal::gpio::bank0::{Gpio2, Gpio25};
use rp2040_hal::gpio::{FunctionSioInput, FunctionSioOutput, Pin, PullDown, PullUp};
use rp2040_hal::{pac, Sio, Timer};

const XTAL_FREQ_HZ: u32 = 12_000_000;

/// Longest the loader may run without servicing the watchdog.
const WATCHDOG_PERIOD_US: u32 = 2_000_000;

pub type LedPin = Pin<Gpio25, FunctionSioOutput, PullDown>;
pub type TriggerPin = Pin<Gpio2, FunctionSioInput, PullUp>;

/// USB peripheral, only brought up in update mode.
pub struct UsbParts {
    pub regs: pac::USBCTRL_REGS,
    pub dpram: pac::USBCTRL_DPRAM,
    pub clock: UsbClock,
    pub resets: pac::RESETS,
}

pub struct Board {
    pub timer: Timer,
    pub hooks: BoardHooks,
    pub backdoor: PinBackdoor,
    pub watchdog: BoardWatchdog,
    pub usb: UsbParts,
}

impl Board {
    pub fn init() -> Option<Self> {
        let mut pac = pac::Peripherals::take()?;
        let mut watchdog = rp2040_hal::Watchdog::new(pac.WATCHDOG);

        let clocks = init_clocks_and_plls(
            XTAL_FREQ_HZ,
            pac.XOSC,
            pac.CLOCKS,
            pac.PLL_SYS,
            pac.PLL_USB,
            &mut pac.RESETS,
            &mut watchdog,
        )
        .ok()?;

        let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
        let sio = Sio::new(pac.SIO);
        let pins = rp2040_hal::gpio::Pins::new(
            pac.IO_BANK0,
            pac.PADS_BANK0,
            sio.gpio_bank0,
            &mut pac.RESETS,
        );

        Some(Self {
            timer,
            hooks: BoardHooks {
                led: pins.gpio25.into_push_pull_output(),
                timer,
            },
            backdoor: PinBackdoor {
                pin: pins.gpio2.into_pull_up_input(),
                timer,
            },
            watchdog: BoardWatchdog { inner: watchdog },
            usb: UsbParts {
                regs: pac.USBCTRL_REGS,
                dpram: pac.USBCTRL_DPRAM,
                clock: clocks.usb_clock,
                resets: pac.RESETS,
            },
        })
    }
}

/// Blink an LED a specified number of times.
pub fn blink(led: &mut impl OutputPin, timer: &mut impl DelayNs, count: u32, period_ms: u32) {
    for _ in 0..count {
        led.set_high().ok();
        timer.delay_ms(period_ms);
        led.set_low().ok();
        timer.delay_ms(period_ms);
    }
}

/// Stop here; the watchdog, once started, resets the chip.
pub fn halt() -> ! {
    loop {
        cortex_m::asm::nop();
    }
}

/// Drives the status LED and forwards log lines to RTT.
pub struct BoardHooks {
    led: LedPin,
    timer: Timer,
}

impl BoardHooks {
    pub fn led_on(&mut self) {
        self.led.set_high().ok();
    }

    pub fn blink(&mut self, count: u32) {
        blink(&mut self.led, &mut self.timer, count, 100);
    }
}

impl Hooks for BoardHooks {
    fn on_log_entry(&mut self, text: &str) {
        defmt::println!("{=str}", text);
    }

    fn on_error(&mut self, kind: ErrorKind) {
        defmt::warn!("update failed: {}", kind);
        self.blink(3);
        self.led_on();
    }

    fn on_update_started(&mut self) {
        self.led.set_high().ok();
    }

    fn on_update_completed(&mut self) {
        self.led.set_low().ok();
    }
}

/// GP2 pulled low at reset keeps the loader in update mode.
pub struct PinBackdoor {
    pin: TriggerPin,
    timer: Timer,
}

impl Backdoor for PinBackdoor {
    fn sample(&mut self, window_ms: u32) -> bool {
        let start = self.timer.get_counter().ticks();
        let window_us = window_ms as u64 * 1_000;
        loop {
            if self.pin.is_low().unwrap_or(false) {
                return true;
            }
            if self.timer.get_counter().ticks() - start >= window_us {
                return false;
            }
        }
    }
}

pub struct BoardWatchdog {
    inner: rp2040_hal::Watchdog,
}

impl Watchdog for BoardWatchdog {
    fn init(&mut self) {
        self.inner.pause_on_debug(true);
        self.inner.start(WATCHDOG_PERIOD_US.micros());
    }

    fn service(&mut self) {
        self.inner.feed();
    }
}
