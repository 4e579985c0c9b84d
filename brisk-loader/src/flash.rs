// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! QSPI flash backend on the RP2040 boot ROM routines.
//!
//! Erase and program run with XIP torn down:
//!   1. connect_internal_flash()
//!   2. flash_exit_xip()
//!   3. flash_range_erase() or flash_range_program()
//!   4. flash_flush_cache()
//!   5. flash_enter_cmd_xip()
//!
//! Everything executing during steps 1-5 must live in RAM, so the two entry
//! points are placed in `.data` and the ROM function pointers are resolved
//! up front by [`init`].

use core::sync::atomic::{AtomicUsize, Ordering};

use brisk_core::Flash;

/// Start of the XIP window.
pub const FLASH_BASE: u32 = 0x1000_0000;
/// 2M on the Pico.
pub const FLASH_SIZE: u32 = 0x0020_0000;
/// Smallest erasable unit.
pub const SECTOR_SIZE: u32 = 4096;
/// Program granularity of the ROM routine.
pub const PAGE_SIZE: usize = 256;

const SECTOR_ERASE_CMD: u8 = 0x20;

// RP2040 datasheet 2.8.3: 16-bit pointers to the function table and lookup.
const ROM_FUNC_TABLE_PTR: *const u16 = 0x0000_0014 as *const u16;
const ROM_TABLE_LOOKUP_PTR: *const u16 = 0x0000_0018 as *const u16;

type RomFnVoid = unsafe extern "C" fn();
type RomFnErase = unsafe extern "C" fn(u32, usize, u32, u8);
type RomFnProgram = unsafe extern "C" fn(u32, *const u8, usize);

static ROM_CONNECT_INTERNAL_FLASH: AtomicUsize = AtomicUsize::new(0);
static ROM_FLASH_EXIT_XIP: AtomicUsize = AtomicUsize::new(0);
static ROM_FLASH_RANGE_ERASE: AtomicUsize = AtomicUsize::new(0);
static ROM_FLASH_RANGE_PROGRAM: AtomicUsize = AtomicUsize::new(0);
static ROM_FLASH_FLUSH_CACHE: AtomicUsize = AtomicUsize::new(0);
static ROM_FLASH_ENTER_CMD_XIP: AtomicUsize = AtomicUsize::new(0);

unsafe fn rom_func_lookup(tag: &[u8; 2]) -> usize {
    let fn_table = *ROM_FUNC_TABLE_PTR as *const u16;
    let lookup: unsafe extern "C" fn(*const u16, u32) -> usize =
        core::mem::transmute::<usize, unsafe extern "C" fn(*const u16, u32) -> usize>(
            *ROM_TABLE_LOOKUP_PTR as usize,
        );

    let code = u16::from_le_bytes(*tag) as u32;
    lookup(fn_table, code)
}

/// Resolve the ROM flash routines. Call once, with XIP still active, before
/// touching [`RomFlash`].
pub fn init() {
    unsafe {
        ROM_CONNECT_INTERNAL_FLASH.store(rom_func_lookup(b"IF"), Ordering::Release);
        ROM_FLASH_EXIT_XIP.store(rom_func_lookup(b"EX"), Ordering::Release);
        ROM_FLASH_RANGE_ERASE.store(rom_func_lookup(b"RE"), Ordering::Release);
        ROM_FLASH_RANGE_PROGRAM.store(rom_func_lookup(b"RP"), Ordering::Release);
        ROM_FLASH_FLUSH_CACHE.store(rom_func_lookup(b"FC"), Ordering::Release);
        ROM_FLASH_ENTER_CMD_XIP.store(rom_func_lookup(b"CX"), Ordering::Release);
    }
}

/// # Safety
/// [`init`] must have run. `offset` and `size` must be sector aligned.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_erase(offset: u32, size: u32) {
    let connect: RomFnVoid = core::mem::transmute(ROM_CONNECT_INTERNAL_FLASH.load(Ordering::Acquire));
    let exit_xip: RomFnVoid = core::mem::transmute(ROM_FLASH_EXIT_XIP.load(Ordering::Acquire));
    let erase: RomFnErase = core::mem::transmute(ROM_FLASH_RANGE_ERASE.load(Ordering::Acquire));
    let flush: RomFnVoid = core::mem::transmute(ROM_FLASH_FLUSH_CACHE.load(Ordering::Acquire));
    let enter_xip: RomFnVoid = core::mem::transmute(ROM_FLASH_ENTER_CMD_XIP.load(Ordering::Acquire));

    cortex_m::interrupt::disable();
    connect();
    exit_xip();
    erase(offset, size as usize, SECTOR_SIZE, SECTOR_ERASE_CMD);
    flush();
    enter_xip();
    cortex_m::interrupt::enable();
}

/// # Safety
/// [`init`] must have run. `offset` must be page aligned, `data` must point to
/// a whole page in RAM.
#[link_section = ".data"]
#[inline(never)]
unsafe fn rom_program_page(offset: u32, data: *const u8) {
    let connect: RomFnVoid = core::mem::transmute(ROM_CONNECT_INTERNAL_FLASH.load(Ordering::Acquire));
    let exit_xip: RomFnVoid = core::mem::transmute(ROM_FLASH_EXIT_XIP.load(Ordering::Acquire));
    let program: RomFnProgram = core::mem::transmute(ROM_FLASH_RANGE_PROGRAM.load(Ordering::Acquire));
    let flush: RomFnVoid = core::mem::transmute(ROM_FLASH_FLUSH_CACHE.load(Ordering::Acquire));
    let enter_xip: RomFnVoid = core::mem::transmute(ROM_FLASH_ENTER_CMD_XIP.load(Ordering::Acquire));

    cortex_m::interrupt::disable();
    connect();
    exit_xip();
    program(offset, data, PAGE_SIZE);
    flush();
    enter_xip();
    cortex_m::interrupt::enable();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum RomFlashError {
    OutOfRange,
    Unaligned,
}

/// The on-board QSPI flash, addressed through the XIP window.
pub struct RomFlash;

impl RomFlash {
    fn offset(address: u32, len: usize) -> Result<u32, RomFlashError> {
        let offset = address.checked_sub(FLASH_BASE).ok_or(RomFlashError::OutOfRange)?;
        let end = offset as u64 + len as u64;
        if end > FLASH_SIZE as u64 {
            return Err(RomFlashError::OutOfRange);
        }
        Ok(offset)
    }
}

impl Flash for RomFlash {
    type Error = RomFlashError;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), RomFlashError> {
        Self::offset(address, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = unsafe { ((address + i as u32) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn erase_block(&mut self, address: u32, size: u32) -> Result<(), RomFlashError> {
        let offset = Self::offset(address, size as usize)?;
        if offset % SECTOR_SIZE != 0 || size % SECTOR_SIZE != 0 {
            return Err(RomFlashError::Unaligned);
        }
        unsafe { rom_erase(offset, size) };
        Ok(())
    }

    /// Program arbitrary spans by writing whole pages padded with 0xFF, which
    /// leaves the surrounding bytes unchanged.
    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), RomFlashError> {
        let mut offset = Self::offset(address, data.len())?;
        let mut rest = data;
        let mut page = [0xFFu8; PAGE_SIZE];

        while !rest.is_empty() {
            let in_page = offset as usize % PAGE_SIZE;
            let n = rest.len().min(PAGE_SIZE - in_page);

            page.fill(0xFF);
            page[in_page..in_page + n].copy_from_slice(&rest[..n]);
            unsafe { rom_program_page(offset - in_page as u32, page.as_ptr()) };

            offset += n as u32;
            rest = &rest[n..];
        }
        Ok(())
    }
}
