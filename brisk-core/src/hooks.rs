// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Device-specific callbacks injected at construction.
//!
//! Every method has a no-op default, so an implementation only overrides the
//! slots it cares about. [`NoHooks`] and [`NoWatchdog`] are the "absent" variants.

use core::fmt::{self, Write};

use crate::error::ErrorKind;

/// Maximum length of a single log entry handed to [`Hooks::on_log_entry`].
pub const LOG_ENTRY_LEN: usize = 96;

pub trait Hooks {
    /// A human-readable progress line for the current update.
    fn on_log_entry(&mut self, _text: &str) {}

    /// The current session failed and was aborted.
    fn on_error(&mut self, _kind: ErrorKind) {}

    fn on_update_started(&mut self) {}

    fn on_update_completed(&mut self) {}

    /// Replace the default backdoor check.
    ///
    /// `Some(true)` forces update mode, `Some(false)` disables the backdoor
    /// entirely and `None` keeps the default behavior.
    fn backdoor_override(&mut self) -> Option<bool> {
        None
    }

    /// Called right before control is handed to the application.
    /// Returning `false` keeps the loader resident.
    fn before_app_start(&mut self) -> bool {
        true
    }
}

impl<T: Hooks + ?Sized> Hooks for &mut T {
    fn on_log_entry(&mut self, text: &str) {
        (**self).on_log_entry(text)
    }

    fn on_error(&mut self, kind: ErrorKind) {
        (**self).on_error(kind)
    }

    fn on_update_started(&mut self) {
        (**self).on_update_started()
    }

    fn on_update_completed(&mut self) {
        (**self).on_update_completed()
    }

    fn backdoor_override(&mut self) -> Option<bool> {
        (**self).backdoor_override()
    }

    fn before_app_start(&mut self) -> bool {
        (**self).before_app_start()
    }
}

/// Hook table with every slot empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// Watchdog collaborator. The loader never configures the watchdog itself.
pub trait Watchdog {
    fn init(&mut self) {}

    fn service(&mut self) {}
}

impl<T: Watchdog + ?Sized> Watchdog for &mut T {
    fn init(&mut self) {
        (**self).init()
    }

    fn service(&mut self) {
        (**self).service()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {}

/// Format a log entry into a bounded buffer and pass it to the log hook.
/// Entries longer than [`LOG_ENTRY_LEN`] are truncated.
pub(crate) fn log_entry<H: Hooks + ?Sized>(hooks: &mut H, args: fmt::Arguments<'_>) {
    let mut line = Truncating(heapless::String::new());
    let _ = line.write_fmt(args);
    hooks.on_log_entry(line.0.as_str());
}

struct Truncating(heapless::String<LOG_ENTRY_LEN>);

impl Write for Truncating {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}
