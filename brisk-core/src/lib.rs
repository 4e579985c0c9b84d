// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Firmware-update engine for the brisk loader.
//!
//! This crate supports both `no_std` (embedded) and `std` (host) environments:
//! - Default: `no_std` mode for embedded targets
//! - `std` feature: Enables `std` support for host tools
//! - `defmt` feature: Routes internal logging to `defmt`
//!
//! The engine is split the way the loader uses it at boot:
//! - [`region`] and [`nvm`]: memory layout and erase/program/verify primitives
//! - [`transport`] and [`codec`]: byte channels and the framed wire format
//! - [`update`]: the command processor state machine
//! - [`entry`]: the boot-time decision between update mode and the application
//! - [`session`]: one end-to-end update over the enabled transports
//! - [`boot`]: the application handoff contract

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod log;

pub mod boot;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod hooks;
pub mod image;
pub mod nvm;
pub mod protocol;
pub mod region;
pub mod session;
pub mod transport;
pub mod update;

// Re-export commonly used types
pub use config::{AbortPolicy, Config, FileConfig, PortConfig};
pub use error::{ConfigError, ErrorKind, TransportError};
pub use hooks::{Hooks, NoHooks, NoWatchdog, Watchdog};
pub use nvm::{AppSignature, Flash, NvmDriver};
pub use protocol::{ByteOrder, Command, Packet, Response, Status};
pub use region::{MemoryRegion, RegionTable};
pub use session::{SessionOutcome, Transports, UpdateSession};
pub use transport::{FileSource, Stream, TransportId};
pub use update::{CommandProcessor, ProcessorState};
