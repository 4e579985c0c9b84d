// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware update state machine.
//!
//! This module implements the update protocol:
//! - `GetInfo`: Query protocol version, payload limits and current state
//! - `StartUpdate`: Open a session bound to the requesting transport
//! - `Erase`: Erase whole blocks (invalidates the installed image first)
//! - `ProgramChunk`: Program the next sequential chunk of the image
//! - `Verify`: Compare memory content with the given bytes
//! - `Finalize`: Check the image CRC, then write the application signature
//! - `Abort`: Drop the session
//! - `Read` / `RegionInfo`: Read memory and describe the region table
mod commands;
mod state;

pub use commands::{CommandProcessor, Context, Origin, Outcome, Reply};
pub use state::{ProcessorState, Session};
