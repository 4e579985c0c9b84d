// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Update files for the loader's file transport.

use anyhow::{bail, Result};

use brisk_core::image::{ImageHeader, ImageTrailer, HEADER_LEN, TRAILER_LEN};
use brisk_core::protocol::IMAGE_CRC;

/// Wrap a raw image in the header and trailer the loader expects.
pub fn pack_image(load_address: u32, image: &[u8]) -> Result<Vec<u8>> {
    if image.is_empty() {
        bail!("Image is empty");
    }
    let Ok(length) = u32::try_from(image.len()) else {
        bail!("Image too large ({} bytes)", image.len());
    };

    let mut out = Vec::with_capacity(HEADER_LEN + image.len() + TRAILER_LEN);
    out.extend_from_slice(
        &ImageHeader {
            load_address,
            length,
        }
        .to_bytes(),
    );
    out.extend_from_slice(image);
    out.extend_from_slice(
        &ImageTrailer {
            length,
            crc32: IMAGE_CRC.checksum(image),
        }
        .to_bytes(),
    );
    Ok(out)
}

/// Check a packed file and return its header and image bytes.
pub fn unpack_image(file: &[u8]) -> Result<(ImageHeader, &[u8])> {
    if file.len() < HEADER_LEN + TRAILER_LEN {
        bail!("File too short for an update image");
    }
    let mut raw = [0u8; HEADER_LEN];
    raw.copy_from_slice(&file[..HEADER_LEN]);
    let Ok(header) = ImageHeader::parse(&raw) else {
        bail!("Not an update image (bad magic)");
    };
    if header.file_size() != file.len() as u64 {
        bail!(
            "Header announces {} bytes, file holds {}",
            header.file_size(),
            file.len()
        );
    }

    let image = &file[HEADER_LEN..file.len() - TRAILER_LEN];
    let mut raw = [0u8; TRAILER_LEN];
    raw.copy_from_slice(&file[file.len() - TRAILER_LEN..]);
    let trailer = ImageTrailer::parse(&raw);
    if trailer.length != header.length {
        bail!("Trailer length {} != header length {}", trailer.length, header.length);
    }
    let crc = IMAGE_CRC.checksum(image);
    if trailer.crc32 != crc {
        bail!("CRC mismatch: trailer 0x{:08x}, image 0x{:08x}", trailer.crc32, crc);
    }
    Ok((header, image))
}
