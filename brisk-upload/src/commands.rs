// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for loader operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use brisk_core::image::IMAGE_MAGIC;
use brisk_core::protocol::{decode_body, unpack_semver, DeviceInfo, Payload, ADDRESS_LEN, IMAGE_CRC};
use brisk_core::{Command, MemoryRegion, Response, Status};

use crate::pack::{pack_image, unpack_image};
use crate::transport::Transport;

/// Erasing the whole application region takes tens of seconds.
const ERASE_TIMEOUT_MS: u64 = 60_000;
/// Finalize re-reads the image to check its CRC.
const FINALIZE_TIMEOUT_MS: u64 = 10_000;

/// Fail on an error status, naming the request.
fn expect_ok(response: Response, what: &str) -> Result<Response> {
    match response.status {
        Status::Ok => Ok(response),
        Status::Error(kind) => bail!("{} failed: {}", what, kind),
    }
}

struct Target {
    info: DeviceInfo,
    regions: Vec<MemoryRegion>,
}

/// Query limits and memory map, and adopt the loader's byte order.
fn query(transport: &mut Transport) -> Result<Target> {
    let response = expect_ok(transport.send_recv(&Command::GetInfo)?, "GetInfo")?;
    let info: DeviceInfo =
        decode_body(&response.payload).map_err(|kind| anyhow!("Bad GetInfo reply: {}", kind))?;
    transport.set_order(info.byte_order);

    let mut regions = Vec::with_capacity(info.region_count as usize);
    for index in 0..info.region_count {
        let response = expect_ok(
            transport.send_recv(&Command::RegionInfo { index })?,
            "RegionInfo",
        )?;
        let region: MemoryRegion = decode_body(&response.payload)
            .map_err(|kind| anyhow!("Bad RegionInfo reply: {}", kind))?;
        regions.push(region);
    }

    Ok(Target { info, regions })
}

/// Get and display loader information.
pub fn info(transport: &mut Transport) -> Result<()> {
    let Target { info, regions } = query(transport)?;
    let (major, minor, patch) = unpack_semver(info.loader_version);

    println!("Loader Info:");
    println!("  Loader:      {}.{}.{}", major, minor, patch);
    println!("  Protocol:    {}", info.protocol_version);
    println!("  Payload:     rx {} / tx {} bytes", info.max_rx_payload, info.max_tx_payload);
    println!("  Byte order:  {:?}", info.byte_order);
    println!("  State:       {:?}", info.state);
    println!("  Regions:");
    for (i, region) in regions.iter().enumerate() {
        println!(
            "    {}: 0x{:08x}..0x{:08x} ({} KB, {} byte blocks)",
            i,
            region.base,
            region.end(),
            region.size / 1024,
            region.block_size
        );
    }

    Ok(())
}

/// Upload a firmware image and finalize it.
pub fn upload(transport: &mut Transport, file: &Path, address: Option<u32>) -> Result<()> {
    let contents = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let target = query(transport)?;

    let (address, firmware) = if contents.starts_with(&IMAGE_MAGIC.to_le_bytes()) {
        let (header, image) = unpack_image(&contents)?;
        if address.is_some_and(|a| a != header.load_address) {
            bail!("Update file is for 0x{:08x}", header.load_address);
        }
        (header.load_address, image)
    } else {
        let default = target
            .regions
            .first()
            .map(|region| region.base)
            .ok_or_else(|| anyhow!("Loader reports no memory regions"))?;
        (address.unwrap_or(default), contents.as_slice())
    };

    let size = u32::try_from(firmware.len()).context("Firmware too large")?;
    if size == 0 {
        bail!("Firmware is empty");
    }
    let Some(region) = target
        .regions
        .iter()
        .find(|region| region.contains_range(address, size))
    else {
        bail!("0x{:08x}+{} does not fit a loader region", address, size);
    };
    let erase_length = size
        .checked_next_multiple_of(region.block_size)
        .context("Firmware too large")?;
    let crc32 = IMAGE_CRC.checksum(firmware);
    let chunk_size = (target.info.max_rx_payload as usize)
        .checked_sub(ADDRESS_LEN)
        .filter(|&n| n > 0)
        .ok_or_else(|| anyhow!("Loader payload limit too small"))?;

    println!(
        "Firmware: {} ({} bytes, CRC32: 0x{:08x})",
        file.display(),
        size,
        crc32
    );
    println!("Target:   0x{:08x}", address);
    println!();

    expect_ok(transport.send_recv(&Command::StartUpdate)?, "StartUpdate")?;

    print!("Erasing {} bytes... ", erase_length);
    std::io::stdout().flush()?;
    expect_ok(
        transport.send_recv_timeout(
            &Command::Erase {
                address,
                length: erase_length,
            },
            ERASE_TIMEOUT_MS,
        )?,
        "Erase",
    )?;
    println!("OK");

    let pb = ProgressBar::new(size as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );

    for (i, chunk) in firmware.chunks(chunk_size).enumerate() {
        let offset = (i * chunk_size) as u32;
        let data = Payload::from_slice(chunk).map_err(|_| anyhow!("Chunk exceeds payload size"))?;
        let response = transport.send_recv(&Command::ProgramChunk {
            address: address + offset,
            data,
        })?;

        if let Status::Error(kind) = response.status {
            pb.abandon();
            bail!("ProgramChunk failed at offset {}: {}", offset, kind);
        }

        pb.set_position(offset as u64 + chunk.len() as u64);
    }

    pb.finish_with_message("Upload complete");
    println!();

    print!("Finalizing... ");
    std::io::stdout().flush()?;
    expect_ok(
        transport.send_recv_timeout(&Command::Finalize { expected_crc: crc32 }, FINALIZE_TIMEOUT_MS)?,
        "Finalize",
    )?;
    println!("OK");

    println!();
    println!("Firmware uploaded successfully, the device restarts into it.");
    println!(
        "Use 'brisk-upload --port {} info' once it is back in the loader.",
        transport.port_name()
    );

    Ok(())
}

/// Abort the session in progress.
pub fn abort(transport: &mut Transport) -> Result<()> {
    print!("Aborting update... ");
    std::io::stdout().flush()?;

    expect_ok(transport.send_recv(&Command::Abort)?, "Abort")?;
    println!("OK");

    Ok(())
}

/// Read device memory into a file or a hex dump.
pub fn read(transport: &mut Transport, address: u32, length: u32, output: Option<&Path>) -> Result<()> {
    let target = query(transport)?;
    let max = target.info.max_tx_payload as u32;

    let mut data = Vec::with_capacity(length as usize);
    let mut at = address;
    let end = address.checked_add(length).context("Range overflows")?;
    while at < end {
        let n = (end - at).min(max);
        let response = expect_ok(
            transport.send_recv(&Command::Read {
                address: at,
                length: n as u8,
            })?,
            "Read",
        )?;
        if response.payload.len() != n as usize {
            bail!("Short read at 0x{:08x}", at);
        }
        data.extend_from_slice(&response.payload);
        at += n;
    }

    match output {
        Some(path) => {
            fs::write(path, &data).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Read {} bytes into {}", data.len(), path.display());
        }
        None => {
            for (i, line) in data.chunks(16).enumerate() {
                let hex: Vec<String> = line.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{:08x}: {}", address as usize + i * 16, hex.join(" "));
            }
        }
    }

    Ok(())
}

/// Write an update file for the file transport.
pub fn pack(input: &Path, output: &Path, address: u32) -> Result<()> {
    let image = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let file = pack_image(address, &image)?;

    fs::write(output, &file).with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Update file: {} ({} bytes at 0x{:08x}, CRC32: 0x{:08x})",
        output.display(),
        image.len(),
        address,
        IMAGE_CRC.checksum(&image)
    );

    Ok(())
}
