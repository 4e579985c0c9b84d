// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Application handoff contract.

use crate::hooks::Hooks;
use crate::nvm::AppSignature;

/// Transfers control to an application. Architecture specific.
pub trait Jumper {
    /// Start the application whose image begins at `entry`.
    fn jump(&mut self, entry: u32) -> !;
}

/// Start the application described by `signature`.
///
/// Returns only when [`Hooks::before_app_start`] vetoes the handoff; the loader
/// then stays resident.
pub fn launch<H, J>(hooks: &mut H, jumper: &mut J, signature: &AppSignature)
where
    H: Hooks + ?Sized,
    J: Jumper + ?Sized,
{
    if !hooks.before_app_start() {
        warn!("handoff vetoed by hook");
        return;
    }
    info!("starting application at 0x{:08x}", signature.start);
    jumper.jump(signature.start)
}
