// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use brisk_core::boot::Jumper;
use brisk_core::{ConfigError, MemoryRegion, RegionTable};

use crate::flash::SECTOR_SIZE;

const RAM_START: u32 = 0x2000_0000;
const RAM_END: u32 = 0x2004_2000;

unsafe extern "C" {
    static __app_start: u32;
    static __app_size: u32;
    static __signature_start: u32;
    static __retained_start: u32;
}

macro_rules! linker_addr {
    ($sym:ident) => {
        unsafe { &$sym as *const u32 as u32 }
    };
}

/// Addresses placed by the linker script.
pub struct MemoryLayout {
    pub app_start: u32,
    pub app_size: u32,
    pub signature: u32,
    pub retained: u32,
}

impl MemoryLayout {
    pub fn from_linker() -> Self {
        Self {
            app_start: linker_addr!(__app_start),
            app_size: linker_addr!(__app_size),
            signature: linker_addr!(__signature_start),
            retained: linker_addr!(__retained_start),
        }
    }

    /// The application region followed by the one-sector signature region.
    pub fn regions(&self) -> Result<RegionTable, ConfigError> {
        RegionTable::new(&[
            MemoryRegion::new(self.app_start, self.app_size, SECTOR_SIZE),
            MemoryRegion::new(self.signature, SECTOR_SIZE, SECTOR_SIZE),
        ])
    }
}

struct VectorTable {
    initial_sp: u32,
    reset_vector: u32,
}

impl VectorTable {
    unsafe fn read_from(addr: u32) -> Self {
        Self {
            initial_sp: (addr as *const u32).read_volatile(),
            reset_vector: (addr as *const u32).offset(1).read_volatile(),
        }
    }

    /// Stack in SRAM, reset handler a Thumb address inside the image.
    fn is_valid_for(&self, image_start: u32, image_end: u32) -> bool {
        (RAM_START..=RAM_END).contains(&self.initial_sp)
            && self.reset_vector & 1 == 1
            && (image_start..image_end).contains(&(self.reset_vector & !1))
    }
}

/// Check the vector table at the start of the image. Returns `(sp, reset)`.
pub fn validate_image(start: u32, length: u32) -> Option<(u32, u32)> {
    let vt = unsafe { VectorTable::read_from(start) };
    if vt.is_valid_for(start, start.saturating_add(length)) {
        Some((vt.initial_sp, vt.reset_vector))
    } else {
        None
    }
}

/// Runs the application in place from XIP flash.
pub struct CortexJumper;

impl Jumper for CortexJumper {
    fn jump(&mut self, entry: u32) -> ! {
        defmt::println!("Jumping to application at 0x{:08x}", entry);
        unsafe {
            relocate_vector_table(entry);
            let vt = VectorTable::read_from(entry);
            jump_to_firmware(vt.initial_sp, vt.reset_vector)
        }
    }
}

unsafe fn relocate_vector_table(base: u32) {
    cortex_m::interrupt::disable();

    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

unsafe fn jump_to_firmware(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
