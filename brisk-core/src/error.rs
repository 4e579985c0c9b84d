// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Error kinds shared by the codec, the NVM driver and the command processor.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Failure reported in a response status byte and to the error hook.
///
/// The discriminant is the wire code; `0x00` is reserved for success.
#[repr(u8)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// Frame length out of bounds, truncated frame or malformed payload.
    Framing = 0x01,
    /// Frame CRC mismatch, or image CRC mismatch at finalize.
    Checksum = 0x02,
    /// Command out of order for the current session state.
    Sequence = 0x03,
    /// Erase address or length not a multiple of the erase block.
    Alignment = 0x04,
    /// Address range outside every declared region, or not erased.
    Range = 0x05,
    /// Read-back content differs from what was written.
    VerifyMismatch = 0x06,
    /// `StartUpdate` while a session is already open.
    SessionBusy = 0x07,
    /// Idle session expired.
    Timeout = 0x08,
    /// The flash backend reported a failure.
    NvmFault = 0x09,
    /// The host aborted the session.
    Aborted = 0x0A,
    /// The bound transport failed while a session was open.
    TransportFault = 0x0B,
}

impl ErrorKind {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x01 => Self::Framing,
            0x02 => Self::Checksum,
            0x03 => Self::Sequence,
            0x04 => Self::Alignment,
            0x05 => Self::Range,
            0x06 => Self::VerifyMismatch,
            0x07 => Self::SessionBusy,
            0x08 => Self::Timeout,
            0x09 => Self::NvmFault,
            0x0A => Self::Aborted,
            0x0B => Self::TransportFault,
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Framing => "framing error",
            Self::Checksum => "checksum error",
            Self::Sequence => "sequence error",
            Self::Alignment => "alignment error",
            Self::Range => "range error",
            Self::VerifyMismatch => "verify mismatch",
            Self::SessionBusy => "session busy",
            Self::Timeout => "timeout",
            Self::NvmFault => "nvm fault",
            Self::Aborted => "aborted",
            Self::TransportFault => "transport fault",
        };
        f.write_str(text)
    }
}

/// Failure of a byte channel or image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    /// Nothing arrived within the requested bound.
    Timeout,
    /// The medium went away (cable unplugged, volume removed).
    Disconnected,
    /// Any other device-reported failure.
    Io,
}

impl From<TransportError> for ErrorKind {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => ErrorKind::Timeout,
            TransportError::Disconnected | TransportError::Io => ErrorKind::TransportFault,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Io => f.write_str("i/o failure"),
        }
    }
}

/// Invalid start-up configuration, detected before any session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    NoRegions,
    TooManyRegions,
    EmptyRegion,
    BadBlockSize,
    MisalignedRegion,
    OverlappingRegions,
    TooManyBlocks,
    /// The signature block is not a whole block inside a declared region.
    BadSignatureAddress,
    /// Payload limit is zero or above what the codec can frame.
    BadPayloadLimit,
    BadTimeout,
    NoTransport,
    /// A link was supplied for a port that is not enabled, or the reverse.
    PortMismatch,
    DuplicatePort,
    TooManyPorts,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoRegions => "no memory regions declared",
            Self::TooManyRegions => "too many memory regions",
            Self::EmptyRegion => "memory region has zero size",
            Self::BadBlockSize => "erase block size must be a non-zero power of two",
            Self::MisalignedRegion => "region base or size not a multiple of its block size",
            Self::OverlappingRegions => "regions overlap or are not sorted by base",
            Self::TooManyBlocks => "regions exceed the tracked block capacity",
            Self::BadSignatureAddress => "signature block outside declared regions",
            Self::BadPayloadLimit => "payload limit out of range",
            Self::BadTimeout => "timeouts must be non-zero",
            Self::NoTransport => "no transport enabled",
            Self::PortMismatch => "stream links do not match enabled ports",
            Self::DuplicatePort => "port channel configured twice",
            Self::TooManyPorts => "too many stream ports",
        };
        f.write_str(text)
    }
}
