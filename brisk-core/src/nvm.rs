// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Erase/program/verify primitives over the region table.
//!
//! The hardware sits behind [`Flash`]. [`NvmDriver`] adds the rules the loader
//! depends on:
//!   1. every operation maps into exactly one declared region
//!   2. erases are whole blocks
//!   3. programs only land in blocks erased in the current session
//!   4. the application signature block is never reachable from the host
//!
//! Erased state is tracked in a bitmap at block granularity so rule 3 never
//! needs a hardware read.

use crate::error::{ConfigError, ErrorKind};
use crate::hooks::Watchdog;
use crate::protocol::IMAGE_CRC;
use crate::region::{RegionTable, MAX_TRACKED_BLOCKS};

/// Raw non-volatile memory backend.
///
/// Addresses are absolute. Implementations block until the operation is done.
pub trait Flash {
    type Error;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Erase `size` bytes starting at the block-aligned `address`.
    fn erase_block(&mut self, address: u32, size: u32) -> Result<(), Self::Error>;

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;
}

impl<T: Flash + ?Sized> Flash for &mut T {
    type Error = T::Error;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).read(address, buf)
    }

    fn erase_block(&mut self, address: u32, size: u32) -> Result<(), Self::Error> {
        (**self).erase_block(address, size)
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        (**self).program(address, data)
    }
}

/// Failure of an [`Extended`] backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendedError<I, E> {
    Internal(I),
    External(E),
    /// The operation crosses the boundary between the two memories.
    Straddle,
}

/// Routes addresses at or above `boundary` to a second memory, such as an
/// external SPI flash, and everything below to the internal one.
pub struct Extended<I, E> {
    internal: I,
    external: E,
    boundary: u32,
}

impl<I: Flash, E: Flash> Extended<I, E> {
    pub fn new(internal: I, external: E, boundary: u32) -> Self {
        Self {
            internal,
            external,
            boundary,
        }
    }

    pub fn into_parts(self) -> (I, E) {
        (self.internal, self.external)
    }

    fn is_external(&self, address: u32, len: usize) -> Result<bool, ExtendedError<I::Error, E::Error>> {
        let end = address as u64 + len as u64;
        if address >= self.boundary {
            Ok(true)
        } else if end <= self.boundary as u64 {
            Ok(false)
        } else {
            Err(ExtendedError::Straddle)
        }
    }
}

impl<I: Flash, E: Flash> Flash for Extended<I, E> {
    type Error = ExtendedError<I::Error, E::Error>;

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.is_external(address, buf.len())? {
            self.external.read(address, buf).map_err(ExtendedError::External)
        } else {
            self.internal.read(address, buf).map_err(ExtendedError::Internal)
        }
    }

    fn erase_block(&mut self, address: u32, size: u32) -> Result<(), Self::Error> {
        if self.is_external(address, size as usize)? {
            self.external
                .erase_block(address, size)
                .map_err(ExtendedError::External)
        } else {
            self.internal
                .erase_block(address, size)
                .map_err(ExtendedError::Internal)
        }
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error> {
        if self.is_external(address, data.len())? {
            self.external.program(address, data).map_err(ExtendedError::External)
        } else {
            self.internal.program(address, data).map_err(ExtendedError::Internal)
        }
    }
}

/// Magic word opening a valid [`AppSignature`].
pub const SIGNATURE_MAGIC: u32 = 0xA55A_B015;

/// Size of an encoded [`AppSignature`].
pub const SIGNATURE_LEN: usize = 16;

/// Validity stamp written after a successful finalize.
///
/// Stored little-endian as `magic, start, length, crc32`. An erased block reads
/// back as all `0xFF` and therefore never decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AppSignature {
    /// First address of the image, also the application entry point.
    pub start: u32,
    pub length: u32,
    pub crc32: u32,
}

impl AppSignature {
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[0..4].copy_from_slice(&SIGNATURE_MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&self.start.to_le_bytes());
        out[8..12].copy_from_slice(&self.length.to_le_bytes());
        out[12..16].copy_from_slice(&self.crc32.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8; SIGNATURE_LEN]) -> Option<Self> {
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        if word(0) != SIGNATURE_MAGIC {
            return None;
        }
        Some(Self {
            start: word(4),
            length: word(8),
            crc32: word(12),
        })
    }
}

/// Blocks erased and not yet reused, one bit per block.
#[derive(Clone)]
struct BlockMap {
    words: [u32; MAX_TRACKED_BLOCKS / 32],
}

impl BlockMap {
    const fn new() -> Self {
        Self {
            words: [0; MAX_TRACKED_BLOCKS / 32],
        }
    }

    fn set(&mut self, index: usize) {
        self.words[index / 32] |= 1 << (index % 32);
    }

    fn clear(&mut self, index: usize) {
        self.words[index / 32] &= !(1 << (index % 32));
    }

    fn get(&self, index: usize) -> bool {
        self.words[index / 32] & (1 << (index % 32)) != 0
    }
}

/// Blocks covered by one erase request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockSpan {
    pub region: usize,
    pub first: u32,
    pub count: u32,
}

impl BlockSpan {
    pub fn blocks(&self) -> impl Iterator<Item = u32> {
        self.first..self.first + self.count
    }
}

const READ_CHUNK: usize = 256;

pub struct NvmDriver<F: Flash> {
    flash: F,
    regions: RegionTable,
    erased: BlockMap,
    signature_region: usize,
    signature_block: u32,
    signature_address: u32,
}

impl<F: Flash> NvmDriver<F> {
    /// Wrap `flash`, reserving the block at `signature_address` for the
    /// application signature.
    pub fn new(flash: F, regions: RegionTable, signature_address: u32) -> Result<Self, ConfigError> {
        let Some((signature_region, region)) = regions.find(signature_address) else {
            return Err(ConfigError::BadSignatureAddress);
        };
        if !region.is_aligned(signature_address) || (region.block_size as usize) < SIGNATURE_LEN {
            return Err(ConfigError::BadSignatureAddress);
        }
        let signature_block = region.block_of(signature_address);

        Ok(Self {
            flash,
            regions,
            erased: BlockMap::new(),
            signature_region,
            signature_block,
            signature_address,
        })
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn signature_address(&self) -> u32 {
        self.signature_address
    }

    /// Whether `block` of region `region` was erased since the erase map was
    /// last cleared.
    pub fn is_erased(&self, region: usize, block: u32) -> bool {
        self.regions
            .get(region)
            .is_some_and(|r| block < r.block_count())
            && self.erased.get(self.regions.global_block(region, block))
    }

    /// Forget every erase, so programming needs a fresh erase first.
    pub fn forget_erased(&mut self) {
        self.erased = BlockMap::new();
    }

    fn is_signature_block(&self, region: usize, block: u32) -> bool {
        region == self.signature_region && block == self.signature_block
    }

    /// Map an erase request onto whole blocks of one region.
    pub fn block_span(&self, address: u32, length: u32) -> Result<BlockSpan, ErrorKind> {
        let Some((index, region)) = self.regions.find(address) else {
            return Err(ErrorKind::Range);
        };
        if length == 0 || !region.is_aligned(address) || !region.is_aligned(length) {
            return Err(ErrorKind::Alignment);
        }
        if !region.contains_range(address, length) {
            return Err(ErrorKind::Range);
        }

        let span = BlockSpan {
            region: index,
            first: region.block_of(address),
            count: length / region.block_size,
        };
        if span.blocks().any(|block| self.is_signature_block(index, block)) {
            return Err(ErrorKind::Range);
        }
        Ok(span)
    }

    /// Erase one block.
    pub fn erase(&mut self, region: usize, block: u32) -> Result<(), ErrorKind> {
        let Some(r) = self.regions.get(region) else {
            return Err(ErrorKind::Range);
        };
        if block >= r.block_count() || self.is_signature_block(region, block) {
            return Err(ErrorKind::Range);
        }
        self.erase_raw(region, block)
    }

    fn erase_raw(&mut self, region: usize, block: u32) -> Result<(), ErrorKind> {
        let Some(r) = self.regions.get(region).copied() else {
            return Err(ErrorKind::Range);
        };
        let address = r.block_base(block);
        let global = self.regions.global_block(region, block);

        trace!("nvm: erase block 0x{:08x} ({} bytes)", address, r.block_size);
        self.erased.clear(global);
        if self.flash.erase_block(address, r.block_size).is_err() {
            warn!("nvm: erase failed at 0x{:08x}", address);
            return Err(ErrorKind::NvmFault);
        }
        self.erased.set(global);
        Ok(())
    }

    /// Program a contiguous run that lies in erased blocks.
    pub fn program(&mut self, address: u32, data: &[u8]) -> Result<(), ErrorKind> {
        let length = u32::try_from(data.len()).map_err(|_| ErrorKind::Range)?;
        let (index, region) = self.regions.find_range(address, length)?;
        let first = region.block_of(address);
        let last = region.block_of(address + (length - 1));

        for block in first..=last {
            if self.is_signature_block(index, block) || !self.is_erased(index, block) {
                return Err(ErrorKind::Range);
            }
        }

        trace!("nvm: program 0x{:08x} ({} bytes)", address, data.len());
        self.flash.program(address, data).map_err(|_| {
            warn!("nvm: program failed at 0x{:08x}", address);
            ErrorKind::NvmFault
        })
    }

    /// Read memory back and compare it with `expected`.
    pub fn verify(&mut self, address: u32, expected: &[u8]) -> Result<(), ErrorKind> {
        let length = u32::try_from(expected.len()).map_err(|_| ErrorKind::Range)?;
        self.regions.find_range(address, length)?;

        let mut buf = [0u8; 32];
        for (i, want) in expected.chunks(buf.len()).enumerate() {
            let at = address + (i * buf.len()) as u32;
            let got = &mut buf[..want.len()];
            self.flash.read(at, got).map_err(|_| ErrorKind::NvmFault)?;
            if got != want {
                warn!("nvm: verify mismatch near 0x{:08x}", at);
                return Err(ErrorKind::VerifyMismatch);
            }
        }
        Ok(())
    }

    /// Read memory inside a declared region.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), ErrorKind> {
        let length = u32::try_from(buf.len()).map_err(|_| ErrorKind::Range)?;
        self.regions.find_range(address, length)?;
        self.flash.read(address, buf).map_err(|_| ErrorKind::NvmFault)
    }

    /// CRC-32 of `[address, address + length)`, servicing the watchdog per chunk.
    pub fn image_crc<W: Watchdog + ?Sized>(
        &mut self,
        address: u32,
        length: u32,
        watchdog: &mut W,
    ) -> Result<u32, ErrorKind> {
        self.regions.find_range(address, length)?;

        let mut digest = IMAGE_CRC.digest();
        let mut chunk = [0u8; READ_CHUNK];
        let mut remaining = length as usize;
        let mut at = address;

        while remaining > 0 {
            let n = remaining.min(chunk.len());
            self.flash
                .read(at, &mut chunk[..n])
                .map_err(|_| ErrorKind::NvmFault)?;
            digest.update(&chunk[..n]);
            at = at.wrapping_add(n as u32);
            remaining -= n;
            watchdog.service();
        }

        Ok(digest.finalize())
    }

    pub fn read_signature(&mut self) -> Option<AppSignature> {
        let mut bytes = [0u8; SIGNATURE_LEN];
        self.flash.read(self.signature_address(), &mut bytes).ok()?;
        AppSignature::from_bytes(&bytes)
    }

    /// Erase the signature block so no image is trusted until the next finalize.
    pub fn invalidate_signature(&mut self) -> Result<(), ErrorKind> {
        trace!("nvm: invalidating application signature");
        self.erase_raw(self.signature_region, self.signature_block)
    }

    pub fn write_signature(&mut self, signature: &AppSignature) -> Result<(), ErrorKind> {
        let global = self
            .regions
            .global_block(self.signature_region, self.signature_block);
        if !self.erased.get(global) {
            self.erase_raw(self.signature_region, self.signature_block)?;
        }

        let address = self.signature_address();
        self.erased.clear(global);
        self.flash
            .program(address, &signature.to_bytes())
            .map_err(|_| ErrorKind::NvmFault)
    }
}
