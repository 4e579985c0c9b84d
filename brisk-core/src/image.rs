// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update files for the file transport.
//!
//! ```text
//! header  : magic "BRSK", load address, length   (u32 LE each)
//! image   : length bytes
//! trailer : length, crc32                         (u32 LE each)
//! ```
//!
//! The file is consumed without framing and replayed through the same
//! [`CommandProcessor`] as a stream session.

use crate::error::ErrorKind;
use crate::hooks::{log_entry, Hooks, Watchdog};
use crate::nvm::Flash;
use crate::protocol::{Command, Payload, Status, MAX_PAYLOAD};
use crate::transport::{fill, FileSource, TransportId};
use crate::update::{CommandProcessor, Context, Origin, Outcome, Reply};

/// "BRSK" read as a little-endian word.
pub const IMAGE_MAGIC: u32 = 0x4B53_5242;
pub const HEADER_LEN: usize = 12;
pub const TRAILER_LEN: usize = 8;

fn word(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub load_address: u32,
    pub length: u32,
}

impl ImageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&IMAGE_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.load_address.to_le_bytes());
        out[8..12].copy_from_slice(&self.length.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Self, ErrorKind> {
        if word(bytes, 0) != IMAGE_MAGIC {
            return Err(ErrorKind::Framing);
        }
        Ok(Self {
            load_address: word(bytes, 4),
            length: word(bytes, 8),
        })
    }

    /// Size of a well-formed file carrying this header.
    pub fn file_size(&self) -> u64 {
        (HEADER_LEN + TRAILER_LEN) as u64 + self.length as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageTrailer {
    pub length: u32,
    pub crc32: u32,
}

impl ImageTrailer {
    pub fn to_bytes(&self) -> [u8; TRAILER_LEN] {
        let mut out = [0u8; TRAILER_LEN];
        out[0..4].copy_from_slice(&self.length.to_le_bytes());
        out[4..8].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    pub fn parse(bytes: &[u8; TRAILER_LEN]) -> Self {
        Self {
            length: word(bytes, 0),
            crc32: word(bytes, 4),
        }
    }
}

/// Program the update file in `source` (of `size` bytes) through `processor`.
///
/// Any failure after `StartUpdate` aborts the session it opened.
pub fn run_file_update<F, S, H, W>(
    processor: &mut CommandProcessor<F>,
    ctx: &mut Context<'_, H, W>,
    source: &mut S,
    size: u32,
    chunk_size: usize,
) -> Outcome
where
    F: Flash,
    S: FileSource + ?Sized,
    H: Hooks + ?Sized,
    W: Watchdog + ?Sized,
{
    let chunk_size = chunk_size.clamp(1, MAX_PAYLOAD);
    let origin = Origin {
        transport: TransportId::File,
        max_rx_payload: chunk_size as u8,
        max_tx_payload: MAX_PAYLOAD as u8,
    };

    if let Err(kind) = accepted(processor.dispatch(ctx, origin, Command::StartUpdate)) {
        return Outcome::Aborted(kind);
    }
    log_entry(ctx.hooks, format_args!("Update file found ({} bytes)", size));

    match replay(processor, ctx, origin, source, size, chunk_size) {
        Ok(outcome) => outcome,
        Err(kind) => processor.abort(ctx, kind).unwrap_or(Outcome::Aborted(kind)),
    }
}

fn accepted(reply: Reply) -> Result<Outcome, ErrorKind> {
    match reply.response.status {
        Status::Ok => Ok(reply.outcome),
        Status::Error(kind) => Err(kind),
    }
}

/// Read exactly `buf.len()` bytes; running out of data is a framing error.
fn read_exact<S: FileSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> Result<(), ErrorKind> {
    if fill(source, buf)? == buf.len() {
        Ok(())
    } else {
        warn!("update file truncated");
        Err(ErrorKind::Framing)
    }
}

fn replay<F, S, H, W>(
    processor: &mut CommandProcessor<F>,
    ctx: &mut Context<'_, H, W>,
    origin: Origin,
    source: &mut S,
    size: u32,
    chunk_size: usize,
) -> Result<Outcome, ErrorKind>
where
    F: Flash,
    S: FileSource + ?Sized,
    H: Hooks + ?Sized,
    W: Watchdog + ?Sized,
{
    let mut raw = [0u8; HEADER_LEN];
    read_exact(source, &mut raw)?;
    let header = ImageHeader::parse(&raw)?;
    if header.length == 0 || header.file_size() != size as u64 {
        warn!("update file size {} does not match header length {}", size, header.length);
        return Err(ErrorKind::Framing);
    }
    info!(
        "file update: {} bytes at 0x{:08x}",
        header.length, header.load_address
    );

    let (_, region) = processor.nvm().regions().find(header.load_address).ok_or(ErrorKind::Range)?;
    let erase_length = header
        .length
        .checked_next_multiple_of(region.block_size)
        .ok_or(ErrorKind::Range)?;
    accepted(processor.dispatch(
        ctx,
        origin,
        Command::Erase {
            address: header.load_address,
            length: erase_length,
        },
    ))?;

    let mut buf = [0u8; MAX_PAYLOAD];
    let mut address = header.load_address;
    let mut remaining = header.length as usize;
    while remaining > 0 {
        let n = remaining.min(chunk_size);
        read_exact(source, &mut buf[..n])?;
        let data = Payload::from_slice(&buf[..n]).map_err(|_| ErrorKind::Framing)?;
        accepted(processor.dispatch(ctx, origin, Command::ProgramChunk { address, data }))?;
        address += n as u32;
        remaining -= n;
    }

    let mut raw = [0u8; TRAILER_LEN];
    read_exact(source, &mut raw)?;
    let trailer = ImageTrailer::parse(&raw);
    if trailer.length != header.length {
        warn!("update file trailer length {} != {}", trailer.length, header.length);
        return Err(ErrorKind::Framing);
    }

    accepted(processor.dispatch(
        ctx,
        origin,
        Command::Finalize {
            expected_crc: trailer.crc32,
        },
    ))
}
