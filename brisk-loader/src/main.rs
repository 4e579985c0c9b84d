// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

#![no_std]
#![no_main]

mod board;
mod boot;
mod flash;
mod retained;
mod usb_transport;

use brisk_core::boot::launch;
use brisk_core::entry::{decide, validate_application, RetainedState, Verdict};
use brisk_core::protocol::{LOADER_VERSION, MAX_PAYLOAD};
use brisk_core::{
    AbortPolicy, ByteOrder, Config, FileConfig, NvmDriver, PortConfig, SessionOutcome, Transports,
    UpdateSession, Watchdog,
};
use cortex_m::peripheral::SCB;
use defmt_rtt as _;
use panic_probe as _;
use rp2040_hal::usb::UsbBus;
use usb_device::class_prelude::UsbBusAllocator;

use board::{Board, BoardHooks, BoardWatchdog};
use flash::RomFlash;
use retained::RetainedRam;
use usb_transport::UsbStream;

defmt::timestamp!("{=u64:us}", { 0 });

use cortex_m_rt::entry;

#[unsafe(link_section = ".boot2")]
#[used]
pub static BOOT2: [u8; 256] = rp2040_boot2::BOOT_LOADER_GENERIC_03H;

/// The USB CDC port is the only stream.
const USB_CHANNEL: u8 = 0;

/// Time given to the host to read the final response before a reset.
const DRAIN_US: u64 = 50_000;

fn loader_config() -> Config {
    let mut ports = heapless::Vec::new();
    let _ = ports.push(PortConfig {
        max_rx_payload: MAX_PAYLOAD as u8,
        max_tx_payload: MAX_PAYLOAD as u8,
        ..PortConfig::uart(USB_CHANNEL, 0)
    });

    Config {
        ports,
        file: FileConfig {
            enabled: false,
            chunk_size: 128,
        },
        idle_timeout_ms: 30_000,
        poll_timeout_ms: 10,
        inter_byte_timeout_ms: 100,
        verify_after_program: true,
        backdoor_window_ms: 100,
        byte_order: ByteOrder::Little,
        abort_policy: AbortPolicy::AwaitRestart,
    }
}

#[entry]
fn main() -> ! {
    defmt::println!("brisk loader {=str}", LOADER_VERSION);

    let Some(mut board) = Board::init() else {
        defmt::error!("Board init failed");
        board::halt();
    };
    board.hooks.blink(2);
    flash::init();
    board.watchdog.init();

    let layout = boot::MemoryLayout::from_linker();
    let nvm = match layout.regions() {
        Ok(regions) => NvmDriver::new(RomFlash, regions, layout.signature),
        Err(e) => Err(e),
    };
    let mut nvm = match nvm {
        Ok(nvm) => nvm,
        Err(e) => {
            defmt::error!("Bad memory layout: {}", e);
            board::halt();
        }
    };

    let config = loader_config();
    let mut retained_ram = RetainedRam::new(layout.retained);
    let (verdict, mut retained) = decide(
        &mut nvm,
        RetainedState::load(&mut retained_ram),
        &mut board.hooks,
        &mut board.backdoor,
        &mut board.watchdog,
        &config,
    );
    retained.save(&mut retained_ram);

    match verdict {
        Verdict::Application(signature) => {
            if boot::validate_image(signature.start, signature.length).is_some() {
                launch(&mut board.hooks, &mut boot::CortexJumper, &signature);
                defmt::println!("Application start vetoed, staying in loader");
            } else {
                defmt::warn!("No vector table at 0x{:08x}", signature.start);
            }
        }
        Verdict::Update(reason) => defmt::println!("Update mode: {}", reason),
    }

    let board::UsbParts {
        regs,
        dpram,
        clock,
        mut resets,
    } = board.usb;
    let Some(usb_bus) = cortex_m::singleton!(: UsbBusAllocator<UsbBus> = UsbBusAllocator::new(
        UsbBus::new(regs, dpram, clock, true, &mut resets),
    )) else {
        board::halt();
    };
    let mut usb = match UsbStream::new(usb_bus, board.timer) {
        Ok(usb) => usb,
        Err(e) => {
            defmt::error!("Failed to initialize USB transport: {:?}", e);
            board::halt();
        }
    };
    defmt::println!("USB CDC initialized");
    board.hooks.led_on();

    update_mode(
        &config,
        nvm,
        &mut usb,
        &mut board.hooks,
        &mut board.watchdog,
        &mut retained,
        &mut retained_ram,
    )
}

/// Serve update sessions until one completes or the loader can hand off.
fn update_mode(
    config: &Config,
    mut nvm: NvmDriver<RomFlash>,
    usb: &mut UsbStream,
    hooks: &mut BoardHooks,
    watchdog: &mut BoardWatchdog,
    retained: &mut RetainedState,
    retained_ram: &mut RetainedRam,
) -> ! {
    loop {
        let mut transports = Transports::new();
        if transports.add_stream(USB_CHANNEL, &mut *usb).is_err() {
            board::halt();
        }
        let mut session = match UpdateSession::new(config, nvm, transports, &mut *hooks, &mut *watchdog) {
            Ok(session) => session,
            Err(e) => {
                defmt::error!("Bad loader configuration: {}", e);
                board::halt();
            }
        };

        let outcome = session.run();
        retained.last_error = session.last_error();
        let (returned, _, _) = session.into_parts();
        nvm = returned;
        retained.save(retained_ram);

        match outcome {
            SessionOutcome::Completed(signature) => {
                defmt::println!("Update complete: {} bytes at 0x{:08x}", signature.length, signature.start);
                usb.drain(DRAIN_US);
                SCB::sys_reset();
            }
            SessionOutcome::TimedOut => {
                if validate_application(&mut nvm, &mut *watchdog).is_ok() {
                    defmt::println!("Idle timeout, restarting into application");
                    usb.drain(DRAIN_US);
                    SCB::sys_reset();
                }
            }
            SessionOutcome::Aborted(kind) => defmt::warn!("Session aborted: {}", kind),
        }
    }
}
