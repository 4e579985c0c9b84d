// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Shared protocol types for loader <-> host communication.
//!
//! This module provides types that work in both `no_std` (embedded) and `std` (host)
//! environments. A request is a [`Packet`] whose code is an [`Opcode`]; a reply is a
//! [`Packet`] whose code is a [`Status`]. Framing lives in [`crate::codec`].

use crc::{Crc, CRC_16_XMODEM, CRC_32_ISO_HDLC};
use heapless::Vec;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::update::ProcessorState;

/// Protocol revision reported by `GetInfo`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Version of this crate, packed into `GetInfo` replies.
pub const LOADER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest payload any port may be configured for.
pub const MAX_PAYLOAD: usize = 250;

/// Bytes of the address field in program and verify requests.
pub const ADDRESS_LEN: usize = 4;

/// Frame checksum: CRC-16/XMODEM over length, code and payload.
pub static FRAME_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Image checksum: CRC-32/ISO-HDLC over the programmed bytes.
pub static IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub type Payload = Vec<u8, MAX_PAYLOAD>;

/// Byte order of multi-byte payload fields.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ByteOrder {
    /// Intel order, least significant byte first.
    #[default]
    Little,
    /// Motorola order, most significant byte first.
    Big,
}

impl ByteOrder {
    pub fn u32_to_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Little => value.to_le_bytes(),
            Self::Big => value.to_be_bytes(),
        }
    }

    pub fn u32_from_bytes(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::Little => u32::from_le_bytes(bytes),
            Self::Big => u32::from_be_bytes(bytes),
        }
    }
}

/// Request codes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Opcode {
    GetInfo = 0x01,
    StartUpdate = 0x02,
    Erase = 0x03,
    ProgramChunk = 0x04,
    Verify = 0x05,
    Finalize = 0x06,
    Abort = 0x07,
    Read = 0x08,
    RegionInfo = 0x09,
}

impl TryFrom<u8> for Opcode {
    type Error = ErrorKind;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0x01 => Self::GetInfo,
            0x02 => Self::StartUpdate,
            0x03 => Self::Erase,
            0x04 => Self::ProgramChunk,
            0x05 => Self::Verify,
            0x06 => Self::Finalize,
            0x07 => Self::Abort,
            0x08 => Self::Read,
            0x09 => Self::RegionInfo,
            _ => return Err(ErrorKind::Framing),
        })
    }
}

/// One deframed message: a code byte and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: u8,
    pub payload: Payload,
}

impl Packet {
    pub fn new(code: u8, payload: &[u8]) -> Result<Self, ErrorKind> {
        Ok(Self {
            code,
            payload: Payload::from_slice(payload).map_err(|_| ErrorKind::Framing)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetInfo,
    StartUpdate,
    Erase { address: u32, length: u32 },
    ProgramChunk { address: u32, data: Payload },
    Verify { address: u32, data: Payload },
    Finalize { expected_crc: u32 },
    Abort,
    Read { address: u32, length: u8 },
    RegionInfo { index: u8 },
}

/// Cursor over a request payload.
struct Fields<'a> {
    bytes: &'a [u8],
    order: ByteOrder,
}

impl<'a> Fields<'a> {
    fn u8(&mut self) -> Result<u8, ErrorKind> {
        let (&first, rest) = self.bytes.split_first().ok_or(ErrorKind::Framing)?;
        self.bytes = rest;
        Ok(first)
    }

    fn u32(&mut self) -> Result<u32, ErrorKind> {
        if self.bytes.len() < 4 {
            return Err(ErrorKind::Framing);
        }
        let (head, rest) = self.bytes.split_at(4);
        self.bytes = rest;
        Ok(self
            .order
            .u32_from_bytes([head[0], head[1], head[2], head[3]]))
    }

    /// Remaining bytes as data; at least one byte required.
    fn data(&mut self) -> Result<Payload, ErrorKind> {
        if self.bytes.is_empty() {
            return Err(ErrorKind::Framing);
        }
        let data = Payload::from_slice(self.bytes).map_err(|_| ErrorKind::Framing)?;
        self.bytes = &[];
        Ok(data)
    }

    fn finish(self) -> Result<(), ErrorKind> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(ErrorKind::Framing)
        }
    }
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::GetInfo => Opcode::GetInfo,
            Self::StartUpdate => Opcode::StartUpdate,
            Self::Erase { .. } => Opcode::Erase,
            Self::ProgramChunk { .. } => Opcode::ProgramChunk,
            Self::Verify { .. } => Opcode::Verify,
            Self::Finalize { .. } => Opcode::Finalize,
            Self::Abort => Opcode::Abort,
            Self::Read { .. } => Opcode::Read,
            Self::RegionInfo { .. } => Opcode::RegionInfo,
        }
    }

    /// Interpret a received packet. Unknown codes and malformed payloads are
    /// framing errors.
    pub fn from_packet(packet: &Packet, order: ByteOrder) -> Result<Self, ErrorKind> {
        let mut fields = Fields {
            bytes: &packet.payload,
            order,
        };
        let command = match Opcode::try_from(packet.code)? {
            Opcode::GetInfo => Self::GetInfo,
            Opcode::StartUpdate => Self::StartUpdate,
            Opcode::Erase => Self::Erase {
                address: fields.u32()?,
                length: fields.u32()?,
            },
            Opcode::ProgramChunk => Self::ProgramChunk {
                address: fields.u32()?,
                data: fields.data()?,
            },
            Opcode::Verify => Self::Verify {
                address: fields.u32()?,
                data: fields.data()?,
            },
            Opcode::Finalize => Self::Finalize {
                expected_crc: fields.u32()?,
            },
            Opcode::Abort => Self::Abort,
            Opcode::Read => Self::Read {
                address: fields.u32()?,
                length: fields.u8()?,
            },
            Opcode::RegionInfo => Self::RegionInfo { index: fields.u8()? },
        };
        fields.finish()?;
        Ok(command)
    }

    /// Build the request packet. Fails when the data does not fit a payload.
    pub fn to_packet(&self, order: ByteOrder) -> Result<Packet, ErrorKind> {
        let mut payload = Payload::new();
        let mut put = |bytes: &[u8]| payload.extend_from_slice(bytes).map_err(|_| ErrorKind::Framing);

        match self {
            Self::GetInfo | Self::StartUpdate | Self::Abort => {}
            Self::Erase { address, length } => {
                put(&order.u32_to_bytes(*address))?;
                put(&order.u32_to_bytes(*length))?;
            }
            Self::ProgramChunk { address, data } | Self::Verify { address, data } => {
                put(&order.u32_to_bytes(*address))?;
                put(data)?;
            }
            Self::Finalize { expected_crc } => put(&order.u32_to_bytes(*expected_crc))?,
            Self::Read { address, length } => {
                put(&order.u32_to_bytes(*address))?;
                put(&[*length])?;
            }
            Self::RegionInfo { index } => put(&[*index])?,
        }

        Ok(Packet {
            code: self.opcode() as u8,
            payload,
        })
    }
}

/// Reply status byte: `0x00` on success, the [`ErrorKind`] code otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Status {
    Ok,
    Error(ErrorKind),
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::Error(kind) => kind.code(),
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Ok),
            other => ErrorKind::from_code(other).map(Self::Error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub payload: Payload,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            payload: Payload::new(),
        }
    }

    pub fn ok_with(payload: Payload) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn error(kind: ErrorKind) -> Self {
        Self {
            status: Status::Error(kind),
            payload: Payload::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    pub fn to_packet(&self) -> Packet {
        Packet {
            code: self.status.code(),
            payload: self.payload.clone(),
        }
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, ErrorKind> {
        let status = Status::from_code(packet.code).ok_or(ErrorKind::Framing)?;
        Ok(Self {
            status,
            payload: packet.payload.clone(),
        })
    }
}

/// Reply body of `GetInfo`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub protocol_version: u8,
    /// Loader version packed with [`pack_semver`].
    pub loader_version: u32,
    pub max_rx_payload: u8,
    pub max_tx_payload: u8,
    pub region_count: u8,
    pub byte_order: ByteOrder,
    pub state: ProcessorState,
}

/// Serialize a reply body with postcard.
pub fn encode_body<T: Serialize>(value: &T) -> Result<Payload, ErrorKind> {
    let mut buf = [0u8; MAX_PAYLOAD];
    let used = postcard::to_slice(value, &mut buf).map_err(|_| ErrorKind::Framing)?;
    Payload::from_slice(used).map_err(|_| ErrorKind::Framing)
}

/// Deserialize a reply body written by [`encode_body`].
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ErrorKind> {
    postcard::from_bytes(bytes).map_err(|_| ErrorKind::Framing)
}

pub fn pack_semver(major: u8, minor: u8, patch: u8) -> u32 {
    (major as u32) << 16 | (minor as u32) << 8 | patch as u32
}

pub fn unpack_semver(packed: u32) -> (u8, u8, u8) {
    ((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
}

/// Parse `major.minor.patch`, ignoring any pre-release suffix.
pub fn parse_semver(version: &str) -> Option<u32> {
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|part| part.parse::<u8>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    Some(pack_semver(major, minor, patch))
}
