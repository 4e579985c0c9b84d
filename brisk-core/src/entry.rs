// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot-time decision between update mode and the installed application.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ErrorKind;
use crate::hooks::{Hooks, Watchdog};
use crate::nvm::{AppSignature, Flash, NvmDriver};

/// Size of the record kept in retained memory.
pub const RETAINED_LEN: usize = 32;

/// Marks an initialized retained record ("BRRT" little-endian).
const RETAINED_MAGIC: u32 = 0x5452_5242;

/// Asks the board whether the user wants to stay in the loader (a pin, a key).
pub trait Backdoor {
    /// Watch the trigger for up to `window_ms`; `true` requests update mode.
    fn sample(&mut self, window_ms: u32) -> bool;
}

impl<T: Backdoor + ?Sized> Backdoor for &mut T {
    fn sample(&mut self, window_ms: u32) -> bool {
        (**self).sample(window_ms)
    }
}

/// Backdoor that never asserts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackdoor;

impl Backdoor for NoBackdoor {
    fn sample(&mut self, _window_ms: u32) -> bool {
        false
    }
}

/// Memory that survives a reset but not a power cycle.
pub trait RetainedStore {
    fn load(&mut self, record: &mut [u8; RETAINED_LEN]);
    fn store(&mut self, record: &[u8; RETAINED_LEN]);
}

impl<T: RetainedStore + ?Sized> RetainedStore for &mut T {
    fn load(&mut self, record: &mut [u8; RETAINED_LEN]) {
        (**self).load(record)
    }

    fn store(&mut self, record: &[u8; RETAINED_LEN]) {
        (**self).store(record)
    }
}

/// State handed between the application, the loader and the next boot.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetainedState {
    /// Set by the application to enter update mode on the next reset.
    pub update_requested: bool,
    /// Why the last update session failed, if it did.
    pub last_error: Option<ErrorKind>,
}

impl RetainedState {
    /// Read the record, falling back to the default on a blank or corrupt store.
    pub fn load<S: RetainedStore + ?Sized>(store: &mut S) -> Self {
        let mut record = [0u8; RETAINED_LEN];
        store.load(&mut record);
        if u32::from_le_bytes([record[0], record[1], record[2], record[3]]) != RETAINED_MAGIC {
            return Self::default();
        }
        postcard::from_bytes(&record[4..]).unwrap_or_default()
    }

    pub fn save<S: RetainedStore + ?Sized>(&self, store: &mut S) {
        let mut record = [0u8; RETAINED_LEN];
        record[..4].copy_from_slice(&RETAINED_MAGIC.to_le_bytes());
        if postcard::to_slice(self, &mut record[4..]).is_err() {
            // The store keeps its previous record.
            return;
        }
        store.store(&record);
    }
}

/// Why the loader stays in update mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EntryReason {
    /// `Hooks::backdoor_override` forced it.
    Override,
    /// The application asked for it through retained state.
    Requested,
    /// The backdoor trigger was asserted.
    Backdoor,
    NoApplication,
    InvalidApplication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    /// Hand off to the validated application.
    Application(AppSignature),
    Update(EntryReason),
}

/// Decide what to do at boot.
///
/// Takes the retained state in and returns it with any consumed request
/// cleared; the caller writes it back.
pub fn decide<F, H, B, W>(
    nvm: &mut NvmDriver<F>,
    mut retained: RetainedState,
    hooks: &mut H,
    backdoor: &mut B,
    watchdog: &mut W,
    config: &Config,
) -> (Verdict, RetainedState)
where
    F: Flash,
    H: Hooks + ?Sized,
    B: Backdoor + ?Sized,
    W: Watchdog + ?Sized,
{
    match hooks.backdoor_override() {
        Some(true) => {
            info!("entry: update forced by hook");
            return (Verdict::Update(EntryReason::Override), retained);
        }
        Some(false) => debug!("entry: backdoor disabled by hook"),
        None => {
            if retained.update_requested {
                retained.update_requested = false;
                info!("entry: update requested by application");
                return (Verdict::Update(EntryReason::Requested), retained);
            }
            watchdog.service();
            if backdoor.sample(config.backdoor_window_ms) {
                info!("entry: backdoor asserted");
                return (Verdict::Update(EntryReason::Backdoor), retained);
            }
        }
    }

    match validate_application(nvm, watchdog) {
        Ok(signature) => (Verdict::Application(signature), retained),
        Err(reason) => (Verdict::Update(reason), retained),
    }
}

/// Check the installed image against its signature.
pub fn validate_application<F, W>(nvm: &mut NvmDriver<F>, watchdog: &mut W) -> Result<AppSignature, EntryReason>
where
    F: Flash,
    W: Watchdog + ?Sized,
{
    let Some(signature) = nvm.read_signature() else {
        info!("entry: no application signature");
        return Err(EntryReason::NoApplication);
    };
    if signature.length == 0 || nvm.regions().find_range(signature.start, signature.length).is_err() {
        warn!("entry: signature span outside memory map");
        return Err(EntryReason::InvalidApplication);
    }

    match nvm.image_crc(signature.start, signature.length, watchdog) {
        Ok(crc) if crc == signature.crc32 => Ok(signature),
        Ok(crc) => {
            warn!(
                "entry: application CRC mismatch: expected 0x{:08x}, got 0x{:08x}",
                signature.crc32, crc
            );
            Err(EntryReason::InvalidApplication)
        }
        Err(_) => Err(EntryReason::InvalidApplication),
    }
}
