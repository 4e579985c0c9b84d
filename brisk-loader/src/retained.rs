// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Retained record in SRAM5, shared with the application.
//!
//! The application requests update mode by writing a `RetainedState` with
//! `update_requested` set to the same address and resetting.

use brisk_core::entry::{RetainedStore, RETAINED_LEN};

pub struct RetainedRam {
    base: *mut u8,
}

impl RetainedRam {
    /// `base` is the linker-provided `__retained_start`.
    pub fn new(base: u32) -> Self {
        Self {
            base: base as *mut u8,
        }
    }
}

impl RetainedStore for RetainedRam {
    fn load(&mut self, record: &mut [u8; RETAINED_LEN]) {
        for (i, byte) in record.iter_mut().enumerate() {
            *byte = unsafe { self.base.add(i).read_volatile() };
        }
    }

    fn store(&mut self, record: &[u8; RETAINED_LEN]) {
        for (i, byte) in record.iter().enumerate() {
            unsafe { self.base.add(i).write_volatile(*byte) };
        }
    }
}
