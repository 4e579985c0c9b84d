// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Static description of the programmable memory.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ErrorKind};

/// Maximum number of regions in a table.
pub const MAX_REGIONS: usize = 8;

/// Maximum number of erase blocks tracked across all regions.
pub const MAX_TRACKED_BLOCKS: usize = 2048;

/// One contiguous range of non-volatile memory with a uniform erase block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
    pub block_size: u32,
}

impl MemoryRegion {
    pub const fn new(base: u32, size: u32, block_size: u32) -> Self {
        Self {
            base,
            size,
            block_size,
        }
    }

    /// One past the last address, widened so the top of the address space fits.
    pub fn end(&self) -> u64 {
        self.base as u64 + self.size as u64
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.base && (address as u64) < self.end()
    }

    /// Whether `[address, address + length)` lies entirely in this region.
    pub fn contains_range(&self, address: u32, length: u32) -> bool {
        length > 0 && self.contains(address) && address as u64 + length as u64 <= self.end()
    }

    pub fn block_count(&self) -> u32 {
        self.size / self.block_size
    }

    /// Index of the block holding `address`. The address must be inside the region.
    pub fn block_of(&self, address: u32) -> u32 {
        (address - self.base) / self.block_size
    }

    pub fn block_base(&self, index: u32) -> u32 {
        self.base + index * self.block_size
    }

    pub fn is_aligned(&self, value: u32) -> bool {
        value % self.block_size == 0
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::EmptyRegion);
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(ConfigError::BadBlockSize);
        }
        if self.base % self.block_size != 0 || self.size % self.block_size != 0 {
            return Err(ConfigError::MisalignedRegion);
        }
        if self.end() > u32::MAX as u64 + 1 {
            return Err(ConfigError::MisalignedRegion);
        }
        Ok(())
    }
}

/// Validated, sorted set of non-overlapping regions.
#[derive(Debug, Clone)]
pub struct RegionTable {
    regions: Vec<MemoryRegion, MAX_REGIONS>,
    /// Global index of each region's first block, for the erased bitmap.
    first_block: Vec<usize, MAX_REGIONS>,
}

impl RegionTable {
    pub fn new(regions: &[MemoryRegion]) -> Result<Self, ConfigError> {
        if regions.is_empty() {
            return Err(ConfigError::NoRegions);
        }

        let mut table = Self {
            regions: Vec::new(),
            first_block: Vec::new(),
        };
        let mut total_blocks = 0usize;
        let mut previous_end = 0u64;

        for region in regions {
            region.validate()?;
            if !table.regions.is_empty() && (region.base as u64) < previous_end {
                return Err(ConfigError::OverlappingRegions);
            }
            previous_end = region.end();

            table
                .first_block
                .push(total_blocks)
                .map_err(|_| ConfigError::TooManyRegions)?;
            table
                .regions
                .push(*region)
                .map_err(|_| ConfigError::TooManyRegions)?;

            total_blocks += region.block_count() as usize;
            if total_blocks > MAX_TRACKED_BLOCKS {
                return Err(ConfigError::TooManyBlocks);
            }
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&MemoryRegion> {
        self.regions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    /// Region holding `address`, with its index.
    pub fn find(&self, address: u32) -> Option<(usize, &MemoryRegion)> {
        self.regions
            .iter()
            .enumerate()
            .find(|(_, region)| region.contains(address))
    }

    /// Region holding the whole of `[address, address + length)`.
    pub fn find_range(&self, address: u32, length: u32) -> Result<(usize, &MemoryRegion), ErrorKind> {
        match self.find(address) {
            Some((index, region)) if region.contains_range(address, length) => Ok((index, region)),
            _ => Err(ErrorKind::Range),
        }
    }

    /// Global bitmap index of `block` in region `index`.
    pub(crate) fn global_block(&self, index: usize, block: u32) -> usize {
        self.first_block[index] + block as usize
    }
}
