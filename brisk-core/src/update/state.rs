// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use crc::Digest;
use serde::{Deserialize, Serialize};

use crate::protocol::IMAGE_CRC;
use crate::transport::TransportId;

/// Command processor states.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcessorState {
    /// No session open.
    Idle,
    /// Session open, waiting for the next command.
    AwaitingCommand,
    Erasing,
    Programming,
    Verifying,
    Finalizing,
    /// Terminal for the session; the processor returns to `Idle`.
    Aborted,
    /// Terminal for the session; the processor returns to `Idle`.
    Completed,
}

/// Bookkeeping for the one open update session.
pub struct Session {
    pub(super) transport: TransportId,
    /// Address of the first programmed byte, fixed by the first chunk.
    pub(super) start: Option<u32>,
    /// Next address a chunk must start at.
    pub(super) cursor: u32,
    pub(super) bytes_received: u32,
    pub(super) digest: Digest<'static, u32>,
    /// Whether this session already erased the application signature.
    pub(super) signature_cleared: bool,
}

impl Session {
    pub(super) fn new(transport: TransportId) -> Self {
        Self {
            transport,
            start: None,
            cursor: 0,
            bytes_received: 0,
            digest: IMAGE_CRC.digest(),
            signature_cleared: false,
        }
    }

    pub fn transport(&self) -> TransportId {
        self.transport
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    /// Address the next chunk must be written to, once the first chunk landed.
    pub fn write_cursor(&self) -> Option<u32> {
        self.start.map(|_| self.cursor)
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }
}
